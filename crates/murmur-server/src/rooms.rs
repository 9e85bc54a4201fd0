//! Room registry: opaque room id -> currently subscribed connections.
//!
//! Rooms are pure routing keys. They spring into existence on the first
//! subscribe and are pruned as soon as their subscriber set is empty, so a
//! publish to a room nobody listens on is a silent no-op.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use murmur_shared::types::{ConnectionId, RoomId};

/// A serialized event. Serialized once per publish and shared by every
/// subscriber.
pub type Payload = Arc<str>;

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::Sender<Payload>;

#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<RoomId, HashMap<ConnectionId, Outbox>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to `room`. Returns `false` if it was already
    /// subscribed, in which case nothing changes.
    pub fn subscribe(&self, room: &RoomId, connection: ConnectionId, outbox: Outbox) -> bool {
        let mut subscribers = self.rooms.entry(room.clone()).or_insert_with(|| {
            debug!(room = %room, "Room created");
            HashMap::new()
        });

        if subscribers.contains_key(&connection) {
            return false;
        }
        subscribers.insert(connection, outbox);

        debug!(
            room = %room,
            connection = %connection,
            subscribers = subscribers.len(),
            "Subscribed to room"
        );
        true
    }

    /// Remove `connection` from `room`. Unsubscribing when not subscribed is
    /// a no-op returning `false`.
    pub fn unsubscribe(&self, room: &RoomId, connection: ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut subscribers) => subscribers.remove(&connection).is_some(),
            None => false,
        };

        if removed {
            debug!(room = %room, connection = %connection, "Unsubscribed from room");
            if self
                .rooms
                .remove_if(room, |_, subscribers| subscribers.is_empty())
                .is_some()
            {
                debug!(room = %room, "Pruned empty room");
            }
        }

        removed
    }

    /// Deliver `payload` to every current subscriber of `room`.
    ///
    /// The subscriber set is snapshotted first, so concurrent subscribe and
    /// unsubscribe calls never wait on delivery. Delivery never blocks: a
    /// full or closed outbound queue drops the event for that subscriber
    /// only. Returns the number of subscribers the event was queued for.
    pub fn publish(&self, room: &RoomId, payload: Payload) -> usize {
        let snapshot: Vec<(ConnectionId, Outbox)> = match self.rooms.get(room) {
            Some(subscribers) => subscribers
                .iter()
                .map(|(id, outbox)| (*id, outbox.clone()))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (connection, outbox) in snapshot {
            match outbox.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(
                        room = %room,
                        connection = %connection,
                        "Dropping event for slow subscriber"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        room = %room,
                        connection = %connection,
                        "Dropping event for closed subscriber"
                    );
                }
            }
        }

        delivered
    }

    pub fn is_subscribed(&self, room: &RoomId, connection: ConnectionId) -> bool {
        self.rooms
            .get(room)
            .map(|subscribers| subscribers.contains_key(&connection))
            .unwrap_or(false)
    }

    pub fn subscriber_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of rooms with at least one subscriber.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(s: &str) -> Payload {
        Arc::from(s)
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("group-1");
        let conn = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel(8);

        assert!(registry.subscribe(&room, conn, tx.clone()));
        for _ in 0..4 {
            assert!(!registry.subscribe(&room, conn, tx.clone()));
        }
        assert_eq!(registry.subscriber_count(&room), 1);

        assert_eq!(registry.publish(&room, payload("once")), 1);
        assert_eq!(rx.recv().await.as_deref(), Some("once"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_when_absent_is_noop() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("group-1");
        assert!(!registry.unsubscribe(&room, ConnectionId::new()));
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_room_is_pruned() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("group-1");
        let conn = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(8);

        registry.subscribe(&room, conn, tx);
        assert_eq!(registry.room_count(), 1);

        assert!(registry.unsubscribe(&room, conn));
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.publish(&room, payload("nobody")), 0);
    }

    #[tokio::test]
    async fn test_dead_and_slow_subscribers_do_not_block_others() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("group-1");

        let (dead_tx, dead_rx) = mpsc::channel(8);
        drop(dead_rx);
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (live_tx, mut live_rx) = mpsc::channel(8);

        registry.subscribe(&room, ConnectionId::new(), dead_tx);
        registry.subscribe(&room, ConnectionId::new(), slow_tx);
        registry.subscribe(&room, ConnectionId::new(), live_tx);

        // Fills the slow subscriber's single slot.
        assert_eq!(registry.publish(&room, payload("a")), 2);
        // Slow queue is full now; only the live subscriber gets it.
        assert_eq!(registry.publish(&room, payload("b")), 1);

        assert_eq!(live_rx.recv().await.as_deref(), Some("a"));
        assert_eq!(live_rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_subscribers_observe_same_order() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("group-1");
        let (tx_a, mut rx_a) = mpsc::channel(256);
        let (tx_b, mut rx_b) = mpsc::channel(256);
        registry.subscribe(&room, ConnectionId::new(), tx_a);
        registry.subscribe(&room, ConnectionId::new(), tx_b);

        // Churn other subscribers concurrently with publishing.
        let churn = {
            let registry = registry.clone();
            let room = room.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let id = ConnectionId::new();
                    let (tx, _rx) = mpsc::channel(1);
                    registry.subscribe(&room, id, tx);
                    tokio::task::yield_now().await;
                    registry.unsubscribe(&room, id);
                }
            })
        };

        for i in 0..100 {
            registry.publish(&room, payload(&i.to_string()));
            tokio::task::yield_now().await;
        }
        churn.await.unwrap();

        let mut seen_a = Vec::new();
        while let Ok(p) = rx_a.try_recv() {
            seen_a.push(p.to_string());
        }
        let mut seen_b = Vec::new();
        while let Ok(p) = rx_b.try_recv() {
            seen_b.push(p.to_string());
        }

        let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        assert_eq!(seen_a, expected);
        assert_eq!(seen_b, expected);
    }
}
