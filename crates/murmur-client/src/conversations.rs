//! Client-held conversation list (the sidebar).
//!
//! Always sorted by last-message time, most recent first. Conversations
//! without any message sort after those with one.

use chrono::{DateTime, Utc};
use serde::Serialize;

use murmur_shared::protocol::{ConversationSummary, ConversationTouched};
use murmur_shared::types::{ConversationKind, RoomId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationView {
    pub id: RoomId,
    pub name: String,
    pub kind: ConversationKind,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub unread: u64,
}

impl From<ConversationSummary> for ConversationView {
    fn from(summary: ConversationSummary) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            kind: summary.kind,
            last_message: summary.last_message,
            last_message_at: summary.last_message_at,
            message_count: summary.message_count,
            unread: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    Updated,
    /// Not in the list; the caller should re-fetch the whole set.
    Unknown,
}

/// `max(0, total - acknowledged)`
pub fn unread_count(total: u64, acknowledged: u64) -> u64 {
    total.saturating_sub(acknowledged)
}

#[derive(Debug, Clone, Default)]
pub struct ConversationList {
    items: Vec<ConversationView>,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list after a full fetch. `acknowledged` supplies the read
    /// cursor of each conversation.
    pub fn replace_all(
        &mut self,
        summaries: Vec<ConversationSummary>,
        acknowledged: impl Fn(&RoomId) -> u64,
    ) {
        self.items = summaries
            .into_iter()
            .map(|summary| {
                let mut view = ConversationView::from(summary);
                view.unread = unread_count(view.message_count, acknowledged(&view.id));
                view
            })
            .collect();
        self.sort();
    }

    pub fn apply_touched(&mut self, touched: &ConversationTouched) -> TouchOutcome {
        let Some(view) = self.items.iter_mut().find(|c| c.id == touched.room_id) else {
            return TouchOutcome::Unknown;
        };

        // A delayed event must not roll the summary back.
        if touched.message_count >= view.message_count {
            view.message_count = touched.message_count;
            view.last_message = Some(touched.preview.clone());
            view.last_message_at = Some(touched.last_message_at);
        }
        self.sort();
        TouchOutcome::Updated
    }

    /// Recompute the badge of one conversation.
    pub fn set_acknowledged(&mut self, room: &RoomId, acknowledged: u64) {
        if let Some(view) = self.items.iter_mut().find(|c| &c.id == room) {
            view.unread = unread_count(view.message_count, acknowledged);
        }
    }

    pub fn get(&self, room: &RoomId) -> Option<&ConversationView> {
        self.items.iter().find(|c| &c.id == room)
    }

    pub fn items(&self) -> &[ConversationView] {
        &self.items
    }

    fn sort(&mut self) {
        // Stable: equal timestamps keep their relative order.
        self.items
            .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn summary(id: &str, count: u64, last: Option<i64>) -> ConversationSummary {
        ConversationSummary {
            id: RoomId::from(id),
            name: id.to_string(),
            kind: ConversationKind::Group,
            last_message: last.map(|_| "earlier".to_string()),
            last_message_at: last.map(at),
            message_count: count,
        }
    }

    fn touched(id: &str, count: u64, secs: i64) -> ConversationTouched {
        ConversationTouched {
            room_id: RoomId::from(id),
            sender_id: "bob".into(),
            preview: "new".into(),
            message_count: count,
            last_message_at: at(secs),
        }
    }

    #[test]
    fn test_unread_never_negative() {
        assert_eq!(unread_count(5, 2), 3);
        assert_eq!(unread_count(2, 5), 0);
    }

    #[test]
    fn test_replace_all_sorts_and_computes_unread() {
        let mut list = ConversationList::new();
        list.replace_all(
            vec![
                summary("quiet", 0, None),
                summary("old", 3, Some(100)),
                summary("recent", 5, Some(200)),
            ],
            |room| if room.as_str() == "recent" { 4 } else { 0 },
        );

        let order: Vec<&str> = list.items().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["recent", "old", "quiet"]);
        assert_eq!(list.get(&"recent".into()).unwrap().unread, 1);
        assert_eq!(list.get(&"old".into()).unwrap().unread, 3);
    }

    #[test]
    fn test_touched_moves_conversation_to_top() {
        let mut list = ConversationList::new();
        list.replace_all(
            vec![summary("a", 1, Some(200)), summary("b", 1, Some(100))],
            |_| 1,
        );

        assert_eq!(list.apply_touched(&touched("b", 2, 300)), TouchOutcome::Updated);
        assert_eq!(list.items()[0].id.as_str(), "b");
        assert_eq!(list.items()[0].last_message.as_deref(), Some("new"));
        assert_eq!(list.items()[0].message_count, 2);
    }

    #[test]
    fn test_unknown_conversation_reported() {
        let mut list = ConversationList::new();
        assert_eq!(list.apply_touched(&touched("new-dm", 1, 10)), TouchOutcome::Unknown);
        assert!(list.items().is_empty());
    }

    #[test]
    fn test_stale_touch_does_not_roll_back() {
        let mut list = ConversationList::new();
        list.replace_all(vec![summary("a", 5, Some(500))], |_| 0);
        list.apply_touched(&touched("a", 4, 400));
        let view = list.get(&"a".into()).unwrap();
        assert_eq!(view.message_count, 5);
        assert_eq!(view.last_message_at, Some(at(500)));
    }
}
