use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use hail_shared::SignalError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Event stream already attached")]
    StreamTaken,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Signal(signal) => {
                let status = match signal {
                    SignalError::UnknownEndpoint(_) | SignalError::SessionNotActive(_) => {
                        StatusCode::NOT_FOUND
                    }
                    SignalError::DuplicateSession(_)
                    | SignalError::EndpointUnavailable(_)
                    | SignalError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    SignalError::Unauthorized(_) | SignalError::NotAParticipant { .. } => {
                        StatusCode::FORBIDDEN
                    }
                    SignalError::SessionTerminated(_) => StatusCode::GONE,
                    SignalError::DeliveryFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
                    SignalError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = match signal {
                    // Internal detail stays out of responses.
                    SignalError::Persistence(_) => "Internal server error".to_string(),
                    other => other.to_string(),
                };
                (status, message)
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::StreamTaken => (StatusCode::CONFLICT, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hail_shared::types::{EndpointId, SessionId};

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn signal_errors_map_to_distinct_statuses() {
        assert_eq!(
            status_of(SignalError::UnknownEndpoint(EndpointId::new()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SignalError::SessionTerminated(SessionId::new()).into()),
            StatusCode::GONE
        );
        assert_eq!(
            status_of(SignalError::Unauthorized(EndpointId::new()).into()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(SignalError::DeliveryFailed(EndpointId::new()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn persistence_detail_is_not_leaked() {
        let response =
            ApiError::from(SignalError::Persistence("table is on fire".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
