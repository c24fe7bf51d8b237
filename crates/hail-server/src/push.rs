//! The server→client push channel.
//!
//! Each endpoint opens one WebSocket; frames are bincode-encoded
//! [`PushFrame`]s carrying state transitions, relayed signaling payloads
//! and presence updates.  The receiver half of the endpoint's mailbox is
//! handed out exactly once; a second connection attempt is rejected
//! rather than splitting the stream.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use tokio::sync::mpsc;
use tracing::{debug, error};

use hail_shared::protocol::PushFrame;
use hail_shared::types::EndpointId;

use crate::api::AppState;
use crate::error::ApiError;

pub async fn events_stream(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let rx = state
        .coordinator
        .registry
        .take_receiver(id)
        .await?
        .ok_or(ApiError::StreamTaken)?;

    debug!(endpoint = %id, "Attaching push channel");
    Ok(ws.on_upgrade(move |socket| stream_frames(socket, id, rx)))
}

async fn stream_frames(
    mut socket: WebSocket,
    endpoint: EndpointId,
    mut rx: mpsc::Receiver<PushFrame>,
) {
    // recv() yields None once the endpoint is deregistered and its mailbox
    // dropped, which closes the socket from our side.
    while let Some(frame) = rx.recv().await {
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(endpoint = %endpoint, error = %e, "Failed to encode push frame");
                break;
            }
        };
        if socket.send(Message::Binary(bytes.into())).await.is_err() {
            debug!(endpoint = %endpoint, "Push channel client went away");
            break;
        }
    }

    debug!(endpoint = %endpoint, "Push channel closed");
}
