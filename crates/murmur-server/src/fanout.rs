//! Message fan-out pipeline.
//!
//! `submit` persists first and publishes only after persistence succeeded:
//! the full message goes to the conversation room, and a lightweight
//! `conversation:touched` event goes to every participant's personal room.
//! A per-room lock held across persist and publish makes publish order equal
//! persistence order.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use murmur_shared::protocol::{preview, ChatMessage, ConversationTouched, ServerEvent};
use murmur_shared::types::{RoomId, UserId};

use crate::error::ServerError;
use crate::persistence::{ChatStore, PersistenceError};
use crate::rooms::{Payload, RoomRegistry};

#[derive(Clone)]
pub struct MessagePipeline {
    store: Arc<dyn ChatStore>,
    registry: RoomRegistry,
    room_locks: Arc<DashMap<RoomId, Arc<tokio::sync::Mutex<()>>>>,
    max_len: usize,
}

impl MessagePipeline {
    pub fn new(store: Arc<dyn ChatStore>, registry: RoomRegistry, max_len: usize) -> Self {
        Self {
            store,
            registry,
            room_locks: Arc::new(DashMap::new()),
            max_len,
        }
    }

    pub async fn submit(
        &self,
        room: &RoomId,
        sender: &UserId,
        content: &str,
    ) -> Result<ChatMessage, ServerError> {
        if content.trim().is_empty() {
            return Err(ServerError::BadRequest("message content is empty".into()));
        }
        if content.len() > self.max_len {
            return Err(ServerError::BadRequest(format!(
                "message content is {} bytes (max {})",
                content.len(),
                self.max_len
            )));
        }

        let participants = match self.store.participants(room).await {
            Ok(participants) => participants,
            Err(PersistenceError::NotFound) => return Err(ServerError::RoomNotFound(room.clone())),
            Err(e) => return Err(e.into()),
        };
        if !participants.contains(sender) {
            return Err(ServerError::NotAMember {
                room: room.clone(),
                user: sender.clone(),
            });
        }

        let lock = self.room_lock(room);
        let result = {
            let _guard = lock.lock().await;
            self.persist_and_publish(room, sender, content, &participants)
                .await
        };
        drop(lock);
        self.prune_lock(room);

        result
    }

    /// Messages of a room in creation order.
    pub async fn history(
        &self,
        room: &RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>, ServerError> {
        match self.store.list_messages(room, limit, offset).await {
            Ok(messages) => Ok(messages),
            Err(PersistenceError::NotFound) => Err(ServerError::RoomNotFound(room.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist_and_publish(
        &self,
        room: &RoomId,
        sender: &UserId,
        content: &str,
        participants: &[UserId],
    ) -> Result<ChatMessage, ServerError> {
        let persisted = match self.store.create_message(room, sender, content).await {
            Ok(persisted) => persisted,
            Err(PersistenceError::NotFound) => {
                // Deleted between the participant check and the insert.
                return Err(ServerError::RoomNotFound(room.clone()));
            }
            Err(e) => {
                warn!(room = %room, sender = %sender, error = %e, "Message persistence failed");
                return Err(e.into());
            }
        };
        let message = persisted.message;

        let delivered = self.publish(room, &ServerEvent::NewMessage(message.clone()))?;

        let touched = ServerEvent::ConversationTouched(ConversationTouched {
            room_id: room.clone(),
            sender_id: sender.clone(),
            preview: preview(&message.content),
            message_count: persisted.total,
            last_message_at: message.created_at,
        });
        let payload = encode(&touched)?;
        for user in participants {
            self.registry.publish(&user.personal_room(), payload.clone());
        }

        debug!(
            room = %room,
            message = %message.id,
            delivered,
            participants = participants.len(),
            "Message fanned out"
        );
        Ok(message)
    }

    fn publish(&self, room: &RoomId, event: &ServerEvent) -> Result<usize, ServerError> {
        Ok(self.registry.publish(room, encode(event)?))
    }

    fn room_lock(&self, room: &RoomId) -> Arc<tokio::sync::Mutex<()>> {
        self.room_locks
            .entry(room.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the room's lock once no submit holds or waits on it.
    fn prune_lock(&self, room: &RoomId) {
        self.room_locks
            .remove_if(room, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.room_locks.len()
    }
}

pub(crate) fn encode(event: &ServerEvent) -> Result<Payload, ServerError> {
    event
        .to_json()
        .map(Payload::from)
        .map_err(|e| ServerError::Internal(format!("failed to encode event: {e}")))
}
