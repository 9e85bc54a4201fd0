//! Connection manager: the arena of live duplex connections.
//!
//! Each connection moves through `Connecting -> Open -> Closed`. Opening binds
//! it to an identity and subscribes it to that identity's personal room.
//! Closing removes the connection from the arena and from every room it had
//! joined. A reconnecting client always gets a fresh connection id and has to
//! re-join its rooms.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use murmur_shared::types::{ConnectionId, RoomId, UserId};

use crate::rooms::{Outbox, Payload, RoomRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Terminal. Closed connections are no longer in the arena.
    Closed,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection {0} is closed or unknown")]
    Closed(ConnectionId),

    #[error("Connection {0} is not open")]
    NotOpen(ConnectionId),

    #[error("Connection {0} is already open")]
    AlreadyOpen(ConnectionId),

    #[error("Room {0} belongs to another user")]
    ForeignPersonalRoom(RoomId),
}

struct ConnectionEntry {
    state: ConnectionState,
    user: Option<UserId>,
    rooms: HashSet<RoomId>,
    outbox: Outbox,
}

#[derive(Clone)]
pub struct ConnectionManager {
    registry: RoomRegistry,
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
    queue_capacity: usize,
}

impl ConnectionManager {
    pub fn new(registry: RoomRegistry, queue_capacity: usize) -> Self {
        Self {
            registry,
            connections: Arc::new(DashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Register a new connection in the `Connecting` state.
    ///
    /// Returns its id and the receiving half of its outbound queue.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<Payload>) {
        let id = ConnectionId::new();
        let (outbox, rx) = mpsc::channel(self.queue_capacity);
        self.connections.insert(
            id,
            ConnectionEntry {
                state: ConnectionState::Connecting,
                user: None,
                rooms: HashSet::new(),
                outbox,
            },
        );
        debug!(connection = %id, "Connection registered");
        (id, rx)
    }

    /// Move a connection to `Open`, binding it to `user` and subscribing it
    /// to the user's personal room. Returns that room.
    pub fn open(&self, id: ConnectionId, user: UserId) -> Result<RoomId, ConnectionError> {
        let mut entry = self
            .connections
            .get_mut(&id)
            .ok_or(ConnectionError::Closed(id))?;

        if entry.state == ConnectionState::Open {
            return Err(ConnectionError::AlreadyOpen(id));
        }

        let personal = user.personal_room();
        self.registry.subscribe(&personal, id, entry.outbox.clone());
        entry.rooms.insert(personal.clone());
        entry.state = ConnectionState::Open;

        info!(connection = %id, user = %user, "Connection open");
        entry.user = Some(user);

        Ok(personal)
    }

    /// Join a room. Idempotent: returns `false` if already joined.
    pub fn join(&self, id: ConnectionId, room: &RoomId) -> Result<bool, ConnectionError> {
        let mut entry = self.open_entry(id)?;

        if room.is_personal() {
            let own = entry.user.as_ref().map(UserId::personal_room);
            if own.as_ref() != Some(room) {
                return Err(ConnectionError::ForeignPersonalRoom(room.clone()));
            }
        }

        if !entry.rooms.insert(room.clone()) {
            return Ok(false);
        }
        // The entry stays locked while subscribing so a concurrent close
        // sees this room in the membership set.
        self.registry.subscribe(room, id, entry.outbox.clone());
        Ok(true)
    }

    /// Leave a room. Idempotent: returns `false` if not joined.
    pub fn leave(&self, id: ConnectionId, room: &RoomId) -> Result<bool, ConnectionError> {
        let mut entry = self.open_entry(id)?;

        if !entry.rooms.remove(room) {
            return Ok(false);
        }
        self.registry.unsubscribe(room, id);
        Ok(true)
    }

    /// Queue an event for one connection only (acks, errors, pongs).
    pub fn send_to(&self, id: ConnectionId, payload: Payload) -> bool {
        match self.connections.get(&id) {
            Some(entry) => entry.outbox.try_send(payload).is_ok(),
            None => false,
        }
    }

    /// Close a connection: drop it from the arena and from every room it had
    /// joined. Returns the number of rooms it was removed from. Closing an
    /// unknown or already closed connection is a no-op.
    pub fn close(&self, id: ConnectionId) -> usize {
        let Some((_, entry)) = self.connections.remove(&id) else {
            return 0;
        };

        for room in &entry.rooms {
            self.registry.unsubscribe(room, id);
        }

        info!(
            connection = %id,
            user = ?entry.user.as_ref().map(UserId::as_str),
            rooms = entry.rooms.len(),
            "Connection closed"
        );
        entry.rooms.len()
    }

    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        self.connections
            .get(&id)
            .map(|entry| entry.state)
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn rooms_of(&self, id: ConnectionId) -> Vec<RoomId> {
        self.connections
            .get(&id)
            .map(|entry| entry.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn open_entry(
        &self,
        id: ConnectionId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, ConnectionId, ConnectionEntry>, ConnectionError>
    {
        let entry = self
            .connections
            .get_mut(&id)
            .ok_or(ConnectionError::Closed(id))?;
        if entry.state != ConnectionState::Open {
            return Err(ConnectionError::NotOpen(id));
        }
        Ok(entry)
    }
}
