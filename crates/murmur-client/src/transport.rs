//! Push side of the server API: the WebSocket.
//!
//! A [`PushLink`] is a pair of channels. Frames written to `frames` go to
//! the server; decoded events come out of `events`. When the socket dies the
//! `events` channel closes, which is how the session notices a disconnect.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use murmur_shared::protocol::{ClientFrame, ServerEvent};
use murmur_shared::types::UserId;

use crate::error::{ClientError, Result};

/// Keep-alive period. Must stay below the server idle timeout.
const PING_INTERVAL: Duration = Duration::from_secs(30);

const LINK_CAPACITY: usize = 256;

pub struct PushLink {
    pub frames: mpsc::Sender<ClientFrame>,
    pub events: mpsc::Receiver<ServerEvent>,
}

#[async_trait]
pub trait PushConnector: Send + Sync + 'static {
    async fn connect(&self, user: &UserId) -> Result<PushLink>;
}

pub struct WsConnector {
    ws_url: String,
}

impl WsConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, user: &UserId) -> Result<PushLink> {
        let url = reqwest::Url::parse_with_params(&self.ws_url, &[("user_id", user.as_str())])
            .map_err(|e| ClientError::InvalidConfig(format!("invalid ws url: {e}")))?;

        let (socket, _response) = connect_async(url.as_str()).await?;
        info!(url = %self.ws_url, user = %user, "Push connection open");

        let (mut sink, mut stream) = socket.split();
        let (frames_tx, mut frames_rx) = mpsc::channel::<ClientFrame>(LINK_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<ServerEvent>(LINK_CAPACITY);

        tokio::spawn(async move {
            let mut ping = tokio::time::interval(PING_INTERVAL);
            ping.tick().await;

            let reason = loop {
                tokio::select! {
                    frame = frames_rx.recv() => {
                        let Some(frame) = frame else { break "link dropped" };
                        let text = match frame.to_json() {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode frame");
                                continue;
                            }
                        };
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            break "send failed";
                        }
                    }
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Text(text))) => match ServerEvent::from_json(&text) {
                                Ok(event) => {
                                    if events_tx.send(event).await.is_err() {
                                        break "session gone";
                                    }
                                }
                                Err(e) => debug!(error = %e, "Ignoring undecodable event"),
                            },
                            Some(Ok(WsMessage::Close(_))) | None => break "server closed",
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                debug!(error = %e, "WebSocket receive error");
                                break "receive error";
                            }
                        }
                    }
                    _ = ping.tick() => {
                        let Ok(text) = ClientFrame::Ping.to_json() else { continue };
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            break "ping failed";
                        }
                    }
                }
            };

            let _ = sink.close().await;
            info!(reason, "Push connection closed");
        });

        Ok(PushLink {
            frames: frames_tx,
            events: events_rx,
        })
    }
}
