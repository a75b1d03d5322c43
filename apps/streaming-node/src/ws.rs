//! WebSocket termination: upgrade gating, the per-connection writer pump,
//! and the inbound frame loop.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use matinee_protocol::ClientFrame;

use crate::hub::SyncHub;
use crate::NodeState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "sessionID")]
    session_id: Option<String>,
    #[serde(rename = "isHost")]
    is_host: Option<String>,
}

/// GET /ws?sessionID=&isHost= - viewer attach.
pub async fn ws_handler(
    State(state): State<NodeState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing session ID").into_response();
    };

    // The director only avoids over-capacity nodes; admission is enforced
    // here.
    if state.hub.current_load() >= state.identity.capacity as usize {
        warn!(session = %session_id, capacity = state.identity.capacity, "refusing viewer, node at capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "node at capacity").into_response();
    }

    let is_host = query.is_host.as_deref() == Some("true");
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, is_host, hub))
}

async fn handle_socket(socket: WebSocket, session_id: String, is_host: bool, hub: SyncHub) {
    let (mut sink, mut stream) = socket.split();
    let (viewer_id, mut outbound) = hub.attach(&session_id, is_host).await;

    // Single writer per socket: everything outbound flows through the
    // bounded queue and this pump.
    let pump_session = session_id.clone();
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(err) => {
                    error!(session = %pump_session, error = %err, "failed to encode outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        debug!(session = %pump_session, "writer pump ended");
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(session = %session_id, viewer = %viewer_id, error = %err, "socket read error");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                dispatch_frame(&hub, &session_id, viewer_id, &text).await;
            }
            Message::Binary(data) => {
                // Some clients ship JSON in binary frames.
                match std::str::from_utf8(&data) {
                    Ok(text) => dispatch_frame(&hub, &session_id, viewer_id, text).await,
                    Err(_) => {
                        debug!(session = %session_id, viewer = %viewer_id, "ignoring non-UTF8 binary frame")
                    }
                }
            }
            Message::Close(_) => break,
            // Ping/Pong are handled by the protocol layer.
            _ => {}
        }
    }

    hub.detach(&session_id, viewer_id);
}

/// One malformed frame never aborts the connection: log, skip, continue.
async fn dispatch_frame(hub: &SyncHub, session_id: &str, viewer_id: Uuid, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => hub.handle_frame(session_id, viewer_id, frame).await,
        Err(err) => {
            warn!(session = %session_id, viewer = %viewer_id, error = %err, "skipping malformed frame");
        }
    }
}
