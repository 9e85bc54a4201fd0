use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DIRECT_ROOM_PREFIX, PERSONAL_ROOM_PREFIX};
use crate::error::SharedError;

// User identity is an opaque string issued by the external auth collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn parse(s: &str) -> Result<Self, SharedError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SharedError::InvalidIdentifier("user id is empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The personal room this user's connections self-subscribe to.
    pub fn personal_room(&self) -> RoomId {
        RoomId(format!("{PERSONAL_ROOM_PREFIX}{}", self.0))
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque routing key. Rooms carry no state beyond their subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Room for a persisted direct conversation record.
    pub fn direct(conversation_id: Uuid) -> Self {
        Self(format!("{DIRECT_ROOM_PREFIX}{conversation_id}"))
    }

    pub fn is_personal(&self) -> bool {
        self.0.starts_with(PERSONAL_ROOM_PREFIX)
    }

    pub fn is_direct(&self) -> bool {
        self.0.starts_with(DIRECT_ROOM_PREFIX)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical, unordered pair of participants in a direct conversation.
///
/// The two ids are sorted on construction so `(a, b)` and `(b, a)` produce
/// the same pair and the same lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectPair {
    low: UserId,
    high: UserId,
}

impl DirectPair {
    pub fn new(a: UserId, b: UserId) -> Result<Self, SharedError> {
        if a == b {
            return Err(SharedError::SelfConversation(a.0));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    pub fn low(&self) -> &UserId {
        &self.low
    }

    pub fn high(&self) -> &UserId {
        &self.high
    }

    /// Key used for the uniqueness constraint in the store.
    pub fn key(&self) -> String {
        format!("{}\u{1f}{}", self.low, self.high)
    }
}

/// A logical conversation reference, before resolution to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationRef {
    Group(String),
    Direct(UserId, UserId),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Group,
    Direct,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Direct => "direct",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "group" => Some(Self::Group),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_pair_is_unordered() {
        let ab = DirectPair::new("alice".into(), "bob".into()).unwrap();
        let ba = DirectPair::new("bob".into(), "alice".into()).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.key(), ba.key());
        assert_eq!(ab.low().as_str(), "alice");
    }

    #[test]
    fn test_direct_pair_rejects_self() {
        let err = DirectPair::new("alice".into(), "alice".into()).unwrap_err();
        assert!(matches!(err, SharedError::SelfConversation(_)));
    }

    #[test]
    fn test_pair_key_does_not_collide_on_concatenation() {
        let a = DirectPair::new("ab".into(), "c".into()).unwrap();
        let b = DirectPair::new("a".into(), "bc".into()).unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_personal_room_namespace() {
        let user = UserId::parse("  carol ").unwrap();
        let room = user.personal_room();
        assert_eq!(room.as_str(), "user:carol");
        assert!(room.is_personal());
        assert!(!room.is_direct());
    }

    #[test]
    fn test_empty_user_id_rejected() {
        assert!(UserId::parse("   ").is_err());
    }
}
