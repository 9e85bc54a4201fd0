//! Visible message list of one conversation.
//!
//! Entries are keyed by [`EntryKey`]. Confirmed entries have set semantics on
//! the server id: inserting an id that is already present is a no-op, which
//! is what absorbs the race between a send response and its fan-out echo.
//! Confirmed entries are ordered by the server sequence, never by clock.
//! Provisional entries always sit after every confirmed entry.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use murmur_shared::protocol::ChatMessage;
use murmur_shared::types::{RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum EntryKey {
    /// Local id of a not-yet-confirmed send. Never collides with server ids
    /// because it lives in a different variant.
    Provisional(Uuid),
    Confirmed(Uuid),
}

impl EntryKey {
    pub fn is_provisional(&self) -> bool {
        matches!(self, EntryKey::Provisional(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub key: EntryKey,
    /// Server sequence, `None` while provisional.
    pub seq: Option<u64>,
    pub sender_id: UserId,
    pub content: String,
    /// Server timestamp once confirmed, local clock while provisional.
    pub created_at: DateTime<Utc>,
}

impl TimelineEntry {
    fn confirmed(message: ChatMessage) -> Self {
        Self {
            key: EntryKey::Confirmed(message.id),
            seq: Some(message.seq),
            sender_id: message.sender_id,
            content: message.content,
            created_at: message.created_at,
        }
    }

    fn matches(&self, sender: &UserId, content: &str) -> bool {
        self.key.is_provisional() && &self.sender_id == sender && self.content == content
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    room: RoomId,
    entries: Vec<TimelineEntry>,
    confirmed: HashSet<Uuid>,
}

impl Timeline {
    pub fn new(room: RoomId) -> Self {
        Self {
            room,
            entries: Vec::new(),
            confirmed: HashSet::new(),
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Optimistically append a local message. Returns its provisional id.
    pub fn insert_provisional(&mut self, sender: &UserId, content: &str) -> Uuid {
        let local_id = Uuid::new_v4();
        self.entries.push(TimelineEntry {
            key: EntryKey::Provisional(local_id),
            seq: None,
            sender_id: sender.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
        });
        local_id
    }

    /// Insert a server-confirmed message that arrived by push.
    ///
    /// The oldest provisional entry with the same sender and content is
    /// replaced by it. Returns `false` if the id was already present.
    pub fn confirm(&mut self, message: ChatMessage) -> bool {
        if self.confirmed.contains(&message.id) {
            return false;
        }
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.matches(&message.sender_id, &message.content))
        {
            self.entries.remove(pos);
        }
        self.insert_confirmed(message);
        true
    }

    /// Resolve a specific provisional entry with the send response.
    ///
    /// Returns `false` if the echo got here first; the list is unchanged in
    /// that case apart from dropping a still-present provisional entry.
    pub fn confirm_provisional(&mut self, local_id: Uuid, message: ChatMessage) -> bool {
        self.discard_provisional(local_id);
        if self.confirmed.contains(&message.id) {
            return false;
        }
        self.insert_confirmed(message);
        true
    }

    /// Roll back a failed send.
    pub fn discard_provisional(&mut self, local_id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.key != EntryKey::Provisional(local_id));
        self.entries.len() != before
    }

    /// Merge a freshly fetched message list into the timeline.
    ///
    /// Messages are immutable once persisted, so confirmed entries already
    /// present are kept even if a fetch that started earlier does not list
    /// them. Pending provisional entries stay at the tail, except those whose
    /// message shows up in the fetch for the first time.
    pub fn merge_confirmed(&mut self, messages: Vec<ChatMessage>) {
        let (mut entries, mut pending): (Vec<TimelineEntry>, Vec<TimelineEntry>) = self
            .entries
            .drain(..)
            .partition(|e| !e.key.is_provisional());

        for message in messages {
            if !self.confirmed.insert(message.id) {
                continue;
            }
            if let Some(pos) = pending
                .iter()
                .position(|e| e.matches(&message.sender_id, &message.content))
            {
                pending.remove(pos);
            }
            entries.push(TimelineEntry::confirmed(message));
        }
        entries.sort_by_key(|e| e.seq);
        entries.extend(pending);

        self.entries = entries;
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len() - self.confirmed.len()
    }

    pub fn contains_confirmed(&self, id: Uuid) -> bool {
        self.confirmed.contains(&id)
    }

    /// Confirmed entries are ordered by server sequence and always precede
    /// provisional ones.
    fn insert_confirmed(&mut self, message: ChatMessage) {
        self.confirmed.insert(message.id);
        let pos = self
            .entries
            .iter()
            .position(|e| e.seq.map_or(true, |seq| seq > message.seq))
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, TimelineEntry::confirmed(message));
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn message(sender: &str, content: &str, seq: u64) -> ChatMessage {
        message_at(sender, content, seq, seq as i64)
    }

    fn message_at(sender: &str, content: &str, seq: u64, millis: i64) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            seq,
            room_id: RoomId::from("dm:1"),
            sender_id: sender.into(),
            content: content.into(),
            created_at: Utc.timestamp_millis_opt(millis).unwrap(),
        }
    }

    fn timeline() -> Timeline {
        Timeline::new(RoomId::from("dm:1"))
    }

    #[test]
    fn test_response_then_echo_renders_once() {
        let mut t = timeline();
        let me = UserId::from("alice");
        let local = t.insert_provisional(&me, "hello");
        let server = message("alice", "hello", 10);

        assert!(t.confirm_provisional(local, server.clone()));
        assert!(!t.confirm(server.clone()));

        assert_eq!(t.len(), 1);
        assert_eq!(t.entries()[0].key, EntryKey::Confirmed(server.id));
    }

    #[test]
    fn test_echo_then_response_renders_once() {
        let mut t = timeline();
        let me = UserId::from("alice");
        let local = t.insert_provisional(&me, "hello");
        let server = message("alice", "hello", 10);

        assert!(t.confirm(server.clone()));
        assert_eq!(t.pending_count(), 0);
        assert!(!t.confirm_provisional(local, server.clone()));

        assert_eq!(t.len(), 1);
        assert_eq!(t.confirmed_count(), 1);
    }

    #[test]
    fn test_failed_send_is_rolled_back() {
        let mut t = timeline();
        let local = t.insert_provisional(&"alice".into(), "lost");
        assert!(t.discard_provisional(local));
        assert!(t.is_empty());
        assert!(!t.discard_provisional(local));
    }

    #[test]
    fn test_provisional_stays_after_confirmed() {
        let mut t = timeline();
        t.insert_provisional(&"alice".into(), "pending");
        t.confirm(message("bob", "from bob", 5));

        let keys: Vec<bool> = t.entries().iter().map(|e| e.key.is_provisional()).collect();
        assert_eq!(keys, vec![false, true]);
    }

    #[test]
    fn test_confirmed_ordered_by_server_sequence() {
        let mut t = timeline();
        t.confirm(message("alice", "second", 20));
        t.confirm(message("bob", "first", 10));

        let contents: Vec<&str> = t.entries().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn test_clock_skew_does_not_reorder() {
        // Assigned later but stamped earlier, e.g. after a clock step back.
        let first = message_at("bob", "first", 1, 5_000);
        let second = message_at("alice", "second", 2, 1_000);
        let third = message_at("bob", "third", 3, 3_000);

        let mut pushed = timeline();
        pushed.confirm(third.clone());
        pushed.confirm(first.clone());
        pushed.confirm(second.clone());

        let mut fetched = timeline();
        fetched.merge_confirmed(vec![third, second, first]);

        for t in [&pushed, &fetched] {
            let seqs: Vec<Option<u64>> = t.entries().iter().map(|e| e.seq).collect();
            assert_eq!(seqs, vec![Some(1), Some(2), Some(3)]);
        }
    }

    #[test]
    fn test_echo_only_replaces_matching_provisional() {
        let mut t = timeline();
        let me = UserId::from("alice");
        t.insert_provisional(&me, "one");
        t.insert_provisional(&me, "two");

        t.confirm(message("alice", "two", 10));
        let pending: Vec<&str> = t
            .entries()
            .iter()
            .filter(|e| e.key.is_provisional())
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(pending, vec!["one"]);

        // Someone else saying "one" does not resolve our pending entry.
        t.confirm(message("bob", "one", 20));
        assert_eq!(t.pending_count(), 1);
    }

    #[test]
    fn test_refetch_absorbs_persisted_provisional() {
        let mut t = timeline();
        let me = UserId::from("alice");
        let existing = message("bob", "hi", 5);
        t.confirm(existing.clone());
        let local = t.insert_provisional(&me, "hello");
        let persisted = message("alice", "hello", 10);

        t.merge_confirmed(vec![existing.clone(), persisted.clone(), existing.clone()]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.pending_count(), 0);

        // The late response is now a no-op.
        assert!(!t.confirm_provisional(local, persisted));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_stale_fetch_keeps_newer_confirmed() {
        let mut t = timeline();
        let older = message("bob", "hi", 5);
        let newer = message("alice", "just sent", 10);
        t.confirm(newer.clone());

        t.merge_confirmed(vec![older]);
        let contents: Vec<&str> = t.entries().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "just sent"]);
        assert_eq!(t.confirmed_count(), 2);
    }

    #[test]
    fn test_refetch_keeps_unrelated_pending() {
        let mut t = timeline();
        t.insert_provisional(&"alice".into(), "still sending");
        t.merge_confirmed(vec![message("bob", "hi", 5)]);
        assert_eq!(t.len(), 2);
        assert!(t.entries()[1].key.is_provisional());
    }
}
