use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::PREVIEW_CHARS;
use crate::error::SharedError;
use crate::types::{ConversationKind, RoomId, UserId};

/// Frames a client sends over its WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe this connection to a room
    Join { room: RoomId },

    /// Unsubscribe this connection from a room
    Leave { room: RoomId },

    /// Keep-alive
    Ping,
}

/// Events the server pushes to connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// A persisted message, published to its conversation room
    #[serde(rename = "new_message")]
    NewMessage(ChatMessage),

    /// Sidebar-level update, published to participants' personal rooms
    #[serde(rename = "conversation:touched")]
    ConversationTouched(ConversationTouched),

    /// A persisted notification, published to the target's personal room
    #[serde(rename = "notification:new")]
    NotificationNew(Notification),

    /// A notification changed to read, published to the owner's personal room
    #[serde(rename = "notification:read")]
    NotificationRead { id: Uuid },

    #[serde(rename = "joined")]
    Joined { room: RoomId },

    #[serde(rename = "left")]
    Left { room: RoomId },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, SharedError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, SharedError> {
        Ok(serde_json::from_str(data)?)
    }
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, SharedError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, SharedError> {
        Ok(serde_json::from_str(data)?)
    }
}

/// An authoritative, server-persisted chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned id
    pub id: Uuid,
    /// Server assignment order. Authoritative for ordering within a room;
    /// `created_at` is display only.
    pub seq: u64,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    /// Server timestamp
    pub created_at: DateTime<Utc>,
}

/// Lightweight "a conversation changed" event for inactive sidebars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTouched {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub preview: String,
    /// Total message count of the conversation after this message
    pub message_count: u64,
    pub last_message_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FriendRequest,
    GroupInvite,
    TaskAssigned,
    TaskUpdated,
    ChatMention,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FriendRequest => "friend_request",
            Self::GroupInvite => "group_invite",
            Self::TaskAssigned => "task_assigned",
            Self::TaskUpdated => "task_updated",
            Self::ChatMention => "chat_mention",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SharedError> {
        match s {
            "friend_request" => Ok(Self::FriendRequest),
            "group_invite" => Ok(Self::GroupInvite),
            "task_assigned" => Ok(Self::TaskAssigned),
            "task_updated" => Ok(Self::TaskUpdated),
            "chat_mention" => Ok(Self::ChatMention),
            "system" => Ok(Self::System),
            other => Err(SharedError::UnknownNotificationKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Server-side view of a conversation as listed for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: RoomId,
    pub name: String,
    pub kind: ConversationKind,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u64,
}

/// Shorten message content for sidebar previews.
pub fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

// ─── HTTP request / response bodies ───

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveDirectRequest {
    pub user_id: UserId,
    pub peer_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveDirectResponse {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotificationRequest {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: bool,
}
