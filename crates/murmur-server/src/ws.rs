//! WebSocket transport: one duplex connection per client.
//!
//! The socket task multiplexes three sources: the connection's outbound
//! queue, inbound client frames, and an idle timer. Whatever ends the loop,
//! the connection is closed through the manager so no room membership
//! outlives the socket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use murmur_shared::protocol::{ClientFrame, ServerEvent};
use murmur_shared::types::{ConnectionId, UserId};

use crate::api::AppState;
use crate::connections::ConnectionManager;
use crate::error::ServerError;
use crate::fanout::encode;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: String,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let user = match UserId::parse(&params.user_id) {
        Ok(user) => user,
        Err(e) => return ServerError::from(e).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(state, user, socket))
}

async fn handle_socket(state: AppState, user: UserId, socket: WebSocket) {
    let connections = state.connections.clone();
    let (id, mut outbound) = connections.connect();

    if let Err(e) = connections.open(id, user.clone()) {
        warn!(connection = %id, error = %e, "Failed to open connection");
        connections.close(id);
        return;
    }

    let (mut sink, mut stream) = socket.split();
    let idle_timeout = state.config.ws_idle_timeout;
    let mut deadline = Instant::now() + idle_timeout;

    let reason = loop {
        tokio::select! {
            maybe = outbound.recv() => {
                let Some(payload) = maybe else { break "outbound queue closed" };
                if sink.send(Message::Text(payload.to_string())).await.is_err() {
                    break "send failed";
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        deadline = Instant::now() + idle_timeout;
                        let reply = handle_frame(&connections, id, &text);
                        if let Ok(payload) = encode(&reply) {
                            connections.send_to(id, payload);
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Protocol-level pings are answered by the framework.
                        deadline = Instant::now() + idle_timeout;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        deadline = Instant::now() + idle_timeout;
                        let event = ServerEvent::Error { message: "binary frames are not supported".into() };
                        if let Ok(payload) = encode(&event) {
                            connections.send_to(id, payload);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break "client closed",
                    Some(Err(e)) => {
                        debug!(connection = %id, error = %e, "WebSocket receive error");
                        break "protocol error";
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => break "idle timeout",
        }
    };

    let rooms = connections.close(id);
    info!(connection = %id, user = %user, rooms, reason, "WebSocket closed");
}

/// Apply one client frame and return the event to send back.
pub(crate) fn handle_frame(
    connections: &ConnectionManager,
    id: ConnectionId,
    text: &str,
) -> ServerEvent {
    let frame = match ClientFrame::from_json(text) {
        Ok(frame) => frame,
        Err(e) => {
            return ServerEvent::Error {
                message: format!("malformed frame: {e}"),
            }
        }
    };

    let result = match frame {
        ClientFrame::Join { room } => connections
            .join(id, &room)
            .map(|_| ServerEvent::Joined { room }),
        ClientFrame::Leave { room } => connections
            .leave(id, &room)
            .map(|_| ServerEvent::Left { room }),
        ClientFrame::Ping => return ServerEvent::Pong,
    };

    result.unwrap_or_else(|e| ServerEvent::Error {
        message: e.to_string(),
    })
}
