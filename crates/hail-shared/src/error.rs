use thiserror::Error;

use crate::types::{EndpointId, SessionId, UserId};

/// Errors returned synchronously by coordinator operations.
///
/// Timer-triggered failures (ring timeout, heartbeat eviction) have no
/// caller to return to; they are pushed to the affected endpoints as
/// state-transition frames instead.
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),

    #[error("User {0} already has a live endpoint")]
    DuplicateSession(UserId),

    #[error("Endpoint unavailable for user {0}")]
    EndpointUnavailable(UserId),

    #[error("Invalid transition: session {session} is {state}, cannot {operation}")]
    InvalidTransition {
        session: SessionId,
        state: &'static str,
        operation: &'static str,
    },

    #[error("Endpoint {0} is not authorized for this operation")]
    Unauthorized(EndpointId),

    #[error("Session {0} has already terminated")]
    SessionTerminated(SessionId),

    #[error("Endpoint {endpoint} is not a participant of session {session}")]
    NotAParticipant {
        session: SessionId,
        endpoint: EndpointId,
    },

    #[error("No active session {0}")]
    SessionNotActive(SessionId),

    #[error("Delivery to endpoint {0} failed")]
    DeliveryFailed(EndpointId),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Convenience alias used throughout the coordinator.
pub type Result<T> = std::result::Result<T, SignalError>;
