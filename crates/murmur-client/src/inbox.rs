//! Notifications as seen by the client, newest first, deduplicated by id.

use std::collections::HashSet;

use uuid::Uuid;

use murmur_shared::protocol::Notification;

#[derive(Debug, Clone, Default)]
pub struct NotificationInbox {
    items: Vec<Notification>,
    ids: HashSet<Uuid>,
}

impl NotificationInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the inbox with a fetched list (already newest first).
    pub fn replace_all(&mut self, notifications: Vec<Notification>) {
        self.items.clear();
        self.ids.clear();
        for notification in notifications {
            if self.ids.insert(notification.id) {
                self.items.push(notification);
            }
        }
    }

    /// Add a pushed notification. Returns `false` for a duplicate.
    pub fn insert(&mut self, notification: Notification) -> bool {
        if !self.ids.insert(notification.id) {
            return false;
        }
        self.items.insert(0, notification);
        true
    }

    /// Returns `true` if the notification was unread.
    pub fn mark_read(&mut self, id: Uuid) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        }
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use murmur_shared::protocol::NotificationKind;

    use super::*;

    fn notification(title: &str) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: "bob".into(),
            kind: NotificationKind::ChatMention,
            title: title.into(),
            message: "you were mentioned".into(),
            read: false,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_push_after_fetch_is_deduplicated() {
        let mut inbox = NotificationInbox::new();
        let first = notification("first");
        inbox.replace_all(vec![first.clone()]);

        assert!(!inbox.insert(first));
        let second = notification("second");
        assert!(inbox.insert(second.clone()));

        assert_eq!(inbox.items().len(), 2);
        assert_eq!(inbox.items()[0].id, second.id);
        assert_eq!(inbox.unread_count(), 2);
    }

    #[test]
    fn test_mark_read_once() {
        let mut inbox = NotificationInbox::new();
        let n = notification("hello");
        inbox.insert(n.clone());

        assert!(inbox.mark_read(n.id));
        assert!(!inbox.mark_read(n.id));
        assert!(!inbox.mark_read(Uuid::new_v4()));
        assert_eq!(inbox.unread_count(), 0);
    }
}
