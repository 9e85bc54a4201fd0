//! Request/response side of the server API.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use murmur_shared::constants::DEFAULT_MESSAGE_PAGE;
use murmur_shared::protocol::{
    ChatMessage, ConversationSummary, MarkReadRequest, MarkReadResponse, Notification,
    ResolveDirectRequest, ResolveDirectResponse, SendMessageRequest,
};
use murmur_shared::types::{RoomId, UserId};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn send_message(&self, room: &RoomId, sender: &UserId, content: &str)
        -> Result<ChatMessage>;

    /// One page of a room's messages in server order.
    async fn list_messages_page(
        &self,
        room: &RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>>;

    /// The full message list of a room. Pages until a short page comes back.
    async fn list_messages(&self, room: &RoomId) -> Result<Vec<ChatMessage>> {
        let mut messages = Vec::new();
        loop {
            let offset = u32::try_from(messages.len()).unwrap_or(u32::MAX);
            let page = self
                .list_messages_page(room, DEFAULT_MESSAGE_PAGE, offset)
                .await?;
            let short = page.len() < DEFAULT_MESSAGE_PAGE as usize;
            messages.extend(page);
            if short {
                return Ok(messages);
            }
        }
    }

    async fn list_conversations(&self, user: &UserId) -> Result<Vec<ConversationSummary>>;

    async fn resolve_direct(&self, user: &UserId, peer: &UserId) -> Result<RoomId>;

    async fn list_notifications(&self, user: &UserId, unread_only: bool)
        -> Result<Vec<Notification>>;

    async fn mark_notification_read(&self, id: Uuid, user: &UserId) -> Result<bool>;
}

/// [`ChatApi`] over HTTP.
#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: Url,
}

impl HttpChatApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::InvalidConfig(format!("invalid base url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidConfig(format!(
                "base url cannot carry a path: {base_url}"
            )));
        }
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Base URL with `segments` appended, each one percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let message = match response.json::<serde_json::Value>().await {
        Ok(body) => body["error"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn send_message(
        &self,
        room: &RoomId,
        sender: &UserId,
        content: &str,
    ) -> Result<ChatMessage> {
        debug!(room = %room, "POST message");
        let response = self
            .client
            .post(self.url(&["rooms", room.as_str(), "messages"]))
            .json(&SendMessageRequest {
                sender_id: sender.clone(),
                content: content.to_string(),
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn list_messages_page(
        &self,
        room: &RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>> {
        let response = self
            .client
            .get(self.url(&["rooms", room.as_str(), "messages"]))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        decode(response).await
    }

    async fn list_conversations(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        let response = self
            .client
            .get(self.url(&["users", user.as_str(), "conversations"]))
            .send()
            .await?;
        decode(response).await
    }

    async fn resolve_direct(&self, user: &UserId, peer: &UserId) -> Result<RoomId> {
        let response = self
            .client
            .post(self.url(&["conversations", "direct"]))
            .json(&ResolveDirectRequest {
                user_id: user.clone(),
                peer_id: peer.clone(),
            })
            .send()
            .await?;
        let resolved: ResolveDirectResponse = decode(response).await?;
        Ok(resolved.room_id)
    }

    async fn list_notifications(
        &self,
        user: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let response = self
            .client
            .get(self.url(&["users", user.as_str(), "notifications"]))
            .query(&[("unread_only", unread_only)])
            .send()
            .await?;
        decode(response).await
    }

    async fn mark_notification_read(&self, id: Uuid, user: &UserId) -> Result<bool> {
        let id = id.to_string();
        let response = self
            .client
            .post(self.url(&["notifications", &id, "read"]))
            .json(&MarkReadRequest {
                user_id: user.clone(),
            })
            .send()
            .await?;
        let body: MarkReadResponse = decode(response).await?;
        Ok(body.updated)
    }
}
