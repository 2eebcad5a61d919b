use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

/// Identity supplied by the upstream auth layer.
#[derive(Deserialize)]
pub struct ConnectParams {
    name: String,
}

/// Attach a WebSocket as one live connection of a user's session. Published
/// frames flow out as JSON text messages; inbound traffic is only used to
/// detect the close.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<super::AppState>>,
    Query(params): Query<ConnectParams>,
) -> Result<Response, StatusCode> {
    let user = state
        .store
        .upsert_user(&params.name)
        .await
        .map_err(|error| {
            warn!(%error, "failed to resolve connecting user");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user.id, user.name)))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<super::AppState>,
    user_id: crate::store::UserId,
    name: String,
) {
    let (conn_id, mut frames) = state.presence.connect(user_id, &name);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(%error, "failed to serialize outbound frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // This service has no inbound WebSocket protocol;
                    // operations arrive over the REST surface.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    debug!(user = %name, %conn_id, "websocket closed");
    state.presence.disconnect(user_id, conn_id);
}
