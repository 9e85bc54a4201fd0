//! Client-side guard against accidental double submits.
//!
//! Byte-identical content sent to the same room within the cooldown window
//! is rejected before any provisional entry or request is created.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use murmur_shared::types::RoomId;

#[derive(Debug)]
pub struct SendGuard {
    cooldown: Duration,
    recent: HashMap<(RoomId, String), Instant>,
}

impl SendGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            recent: HashMap::new(),
        }
    }

    /// Record an attempt. Returns `false` if the same content went to the
    /// same room less than one cooldown ago.
    pub fn check(&mut self, room: &RoomId, content: &str) -> bool {
        self.check_at(room, content, Instant::now())
    }

    pub fn check_at(&mut self, room: &RoomId, content: &str, now: Instant) -> bool {
        let cooldown = self.cooldown;
        self.recent
            .retain(|_, sent| now.saturating_duration_since(*sent) < cooldown);

        let key = (room.clone(), content.to_string());
        if self.recent.contains_key(&key) {
            return false;
        }
        self.recent.insert(key, now);
        true
    }

    /// Forget an attempt so a failed send can be retried immediately.
    pub fn forget(&mut self, room: &RoomId, content: &str) {
        self.recent.remove(&(room.clone(), content.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_content_within_cooldown_rejected() {
        let mut guard = SendGuard::new(Duration::from_secs(2));
        let room = RoomId::from("dm:1");
        let t0 = Instant::now();

        assert!(guard.check_at(&room, "hi", t0));
        assert!(!guard.check_at(&room, "hi", t0 + Duration::from_millis(500)));
        assert!(guard.check_at(&room, "hi", t0 + Duration::from_secs(3)));
    }

    #[test]
    fn test_different_content_or_room_allowed() {
        let mut guard = SendGuard::new(Duration::from_secs(2));
        let t0 = Instant::now();

        assert!(guard.check_at(&"dm:1".into(), "hi", t0));
        assert!(guard.check_at(&"dm:1".into(), "hi ", t0));
        assert!(guard.check_at(&"dm:2".into(), "hi", t0));
    }

    #[test]
    fn test_forget_allows_retry() {
        let mut guard = SendGuard::new(Duration::from_secs(2));
        let room = RoomId::from("dm:1");
        assert!(guard.check(&room, "retry me"));
        guard.forget(&room, "retry me");
        assert!(guard.check(&room, "retry me"));
    }
}
