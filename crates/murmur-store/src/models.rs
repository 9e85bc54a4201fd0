//! Domain model structs persisted in the SQLite database.
//!
//! Messages and notifications are stored as the shared wire types
//! ([`ChatMessage`](murmur_shared::protocol::ChatMessage),
//! [`Notification`](murmur_shared::protocol::Notification)) so the server can
//! publish them without another conversion step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use murmur_shared::types::{ConversationKind, RoomId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A durable conversation: a named group or a direct pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: Uuid,
    /// Routing key the conversation resolves to.
    pub room_id: RoomId,
    pub kind: ConversationKind,
    /// Display name (empty for direct conversations).
    pub name: String,
    /// Canonical pair key for direct conversations.
    pub pair_key: Option<String>,
    pub created_at: DateTime<Utc>,
}
