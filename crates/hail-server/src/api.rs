use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::Method,
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use hail_core::Coordinator;
use hail_shared::types::{
    Capabilities, CallKind, CallOutcome, EndpointId, PresenceStatus, SessionId, UserId,
};
use hail_store::{CallDirection, CallHistoryEntry, HistoryCursor};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::push;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

const DEFAULT_HISTORY_PAGE: u32 = 50;
const MAX_HISTORY_PAGE: u32 = 200;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/endpoints", post(register_endpoint))
        .route("/endpoints/{id}", delete(deregister_endpoint))
        .route("/endpoints/{id}/heartbeat", post(heartbeat))
        .route("/endpoints/{id}/events", get(push::events_stream))
        .route("/calls", post(initiate_call))
        .route("/calls/{id}/accept", post(accept_call))
        .route("/calls/{id}/decline", post(decline_call))
        .route("/calls/{id}/terminate", post(terminate_call))
        .route("/calls/{id}/signal", post(relay_signal))
        .route("/calls/history", get(call_history))
        .route("/presence/subscribe", post(presence_subscribe))
        .route("/presence/unsubscribe", post(presence_unsubscribe))
        .route("/presence/{user_id}", get(presence_record))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    endpoints: usize,
    multi_device: bool,
    ring_timeout_secs: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        endpoints: state.coordinator.registry.endpoint_count().await,
        multi_device: state.config.multi_device,
        ring_timeout_secs: state.config.ring_timeout.as_secs(),
    })
}

// ─── Endpoint lifecycle ───

#[derive(Deserialize)]
struct RegisterRequest {
    user_id: UserId,
    #[serde(default)]
    capabilities: Capabilities,
}

#[derive(Serialize)]
struct RegisterResponse {
    endpoint_id: EndpointId,
}

async fn register_endpoint(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let endpoint = state
        .coordinator
        .register(req.user_id, req.capabilities)
        .await?;

    info!(endpoint = %endpoint.id, user = %req.user_id.short(), "Endpoint registered via API");

    Ok(Json(RegisterResponse {
        endpoint_id: endpoint.id,
    }))
}

async fn deregister_endpoint(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.coordinator.deregister(id).await?;
    Ok(Json(serde_json::json!({ "deregistered": true })))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.coordinator.registry.heartbeat(id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ─── Calls ───

#[derive(Deserialize)]
struct InitiateRequest {
    caller_endpoint_id: EndpointId,
    callee_user_id: UserId,
    kind: CallKind,
}

#[derive(Serialize)]
struct InitiateResponse {
    session_id: SessionId,
}

async fn initiate_call(
    State(state): State<AppState>,
    Json(req): Json<InitiateRequest>,
) -> Result<Json<InitiateResponse>, ApiError> {
    let session_id = state
        .coordinator
        .calls
        .initiate(req.caller_endpoint_id, req.callee_user_id, req.kind)
        .await?;
    Ok(Json(InitiateResponse { session_id }))
}

#[derive(Deserialize)]
struct ParticipantRequest {
    endpoint_id: EndpointId,
}

async fn accept_call(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<ParticipantRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.coordinator.calls.accept(id, req.endpoint_id).await?;
    Ok(Json(serde_json::json!({ "state": "connected" })))
}

async fn decline_call(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<ParticipantRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.coordinator.calls.decline(id, req.endpoint_id).await?;
    Ok(Json(serde_json::json!({ "state": "declined" })))
}

async fn terminate_call(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<ParticipantRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.coordinator.calls.terminate(id, req.endpoint_id).await?;
    Ok(Json(serde_json::json!({ "state": "ended" })))
}

#[derive(Deserialize)]
struct SignalRequest {
    endpoint_id: EndpointId,
    /// Base64-encoded opaque negotiation payload.
    payload: String,
}

async fn relay_signal(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<SignalRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let payload = base64::engine::general_purpose::STANDARD
        .decode(&req.payload)
        .map_err(|e| ApiError::BadRequest(format!("Invalid payload encoding: {e}")))?;

    state
        .coordinator
        .router
        .relay(id, req.endpoint_id, payload)
        .await?;
    Ok(Json(serde_json::json!({ "relayed": true })))
}

// ─── Call history ───

#[derive(Deserialize)]
struct HistoryQuery {
    user_id: UserId,
    cursor: Option<String>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct HistoryEntryView {
    session_id: SessionId,
    caller: UserId,
    callee: UserId,
    kind: CallKind,
    outcome: CallOutcome,
    direction: CallDirection,
    duration_secs: Option<i64>,
    started_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct HistoryResponse {
    entries: Vec<HistoryEntryView>,
    next_cursor: Option<String>,
}

async fn call_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_PAGE)
        .min(MAX_HISTORY_PAGE);
    let cursor = query.cursor.as_deref().map(parse_cursor).transpose()?;

    let entries = state
        .coordinator
        .ledger
        .history_for_user(query.user_id, cursor, limit)
        .await?;

    let next_cursor = if entries.len() == limit as usize {
        entries.last().map(encode_cursor)
    } else {
        None
    };

    let entries = entries
        .into_iter()
        .map(|entry| HistoryEntryView {
            session_id: entry.session_id,
            caller: entry.caller,
            callee: entry.callee,
            kind: entry.kind,
            outcome: entry.outcome,
            direction: entry.direction_for(query.user_id),
            duration_secs: entry.duration_secs,
            started_at: entry.started_at,
        })
        .collect();

    Ok(Json(HistoryResponse {
        entries,
        next_cursor,
    }))
}

fn parse_cursor(s: &str) -> Result<HistoryCursor, ApiError> {
    let (ts, id) = s
        .split_once('~')
        .ok_or_else(|| ApiError::BadRequest("Malformed cursor".to_string()))?;
    let started_at = DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ApiError::BadRequest(format!("Malformed cursor timestamp: {e}")))?;
    let session_id = Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Malformed cursor id: {e}")))?;
    Ok(HistoryCursor {
        started_at,
        session_id: SessionId(session_id),
    })
}

fn encode_cursor(entry: &CallHistoryEntry) -> String {
    format!("{}~{}", entry.started_at.to_rfc3339(), entry.session_id)
}

// ─── Presence ───

#[derive(Deserialize)]
struct SubscriptionRequest {
    observer_endpoint_id: EndpointId,
    user_id: UserId,
}

async fn presence_subscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .coordinator
        .presence
        .subscribe(req.user_id, req.observer_endpoint_id)
        .await?;
    Ok(Json(serde_json::json!({ "subscribed": true })))
}

async fn presence_unsubscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .coordinator
        .presence
        .unsubscribe(req.user_id, req.observer_endpoint_id)
        .await;
    Ok(Json(serde_json::json!({ "subscribed": false })))
}

#[derive(Serialize)]
struct PresenceResponse {
    user_id: UserId,
    status: PresenceStatus,
    last_seen: Option<DateTime<Utc>>,
}

async fn presence_record(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<PresenceResponse> {
    // Users the coordinator has never seen are simply offline.
    let record = state.coordinator.presence.record(user_id).await;
    Json(PresenceResponse {
        user_id,
        status: record
            .map(|r| r.status)
            .unwrap_or(PresenceStatus::Offline),
        last_seen: record.map(|r| r.last_seen),
    })
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
