//! Persistence collaborator seen by the server pipelines.
//!
//! Pipelines only talk to [`ChatStore`]; the SQLite-backed implementation
//! wraps the synchronous [`Database`] behind a mutex and runs every call on
//! the blocking pool.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use murmur_shared::protocol::{
    ChatMessage, ConversationSummary, CreateNotificationRequest, Notification,
};
use murmur_shared::types::{DirectPair, RoomId, UserId};
use murmur_store::{Database, StoreError};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Record already exists")]
    AlreadyExists,

    #[error("Record not found")]
    NotFound,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for PersistenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists => Self::AlreadyExists,
            StoreError::NotFound => Self::NotFound,
            other => Self::Backend(other.to_string()),
        }
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// A message as persisted, with the room's message count including it.
#[derive(Debug, Clone)]
pub struct PersistedMessage {
    pub message: ChatMessage,
    pub total: u64,
}

#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    /// Persist a message and return it with the room's new message count.
    async fn create_message(
        &self,
        room: &RoomId,
        sender: &UserId,
        content: &str,
    ) -> PersistenceResult<PersistedMessage>;

    async fn list_messages(
        &self,
        room: &RoomId,
        limit: u32,
        offset: u32,
    ) -> PersistenceResult<Vec<ChatMessage>>;

    async fn message_count(&self, room: &RoomId) -> PersistenceResult<u64>;

    /// Participants of a conversation. `NotFound` for unknown rooms.
    async fn participants(&self, room: &RoomId) -> PersistenceResult<Vec<UserId>>;

    async fn find_direct(&self, pair: &DirectPair) -> PersistenceResult<Option<RoomId>>;

    /// Create the direct conversation for `pair`. `AlreadyExists` when
    /// another writer created it first.
    async fn create_direct(&self, pair: &DirectPair) -> PersistenceResult<RoomId>;

    async fn create_group(
        &self,
        name: &str,
        members: &[UserId],
    ) -> PersistenceResult<ConversationSummary>;

    async fn list_conversations(&self, user: &UserId)
        -> PersistenceResult<Vec<ConversationSummary>>;

    async fn create_notification(
        &self,
        request: CreateNotificationRequest,
    ) -> PersistenceResult<Notification>;

    async fn list_notifications(
        &self,
        user: &UserId,
        unread_only: bool,
    ) -> PersistenceResult<Vec<Notification>>;

    /// Flip a notification to read. `false` if it was already read.
    async fn mark_read(&self, id: Uuid, user: &UserId) -> PersistenceResult<bool>;
}

/// [`ChatStore`] over the SQLite [`Database`].
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn with_db<T, F>(&self, f: F) -> PersistenceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| PersistenceError::Backend("database lock poisoned".into()))?;
            f(&guard).map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| PersistenceError::Backend(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn create_message(
        &self,
        room: &RoomId,
        sender: &UserId,
        content: &str,
    ) -> PersistenceResult<PersistedMessage> {
        let (room, sender, content) = (room.clone(), sender.clone(), content.to_string());
        self.with_db(move |db| {
            let message = db.insert_message(&room, &sender, &content)?;
            let total = db.count_messages(&room)?;
            Ok(PersistedMessage { message, total })
        })
        .await
    }

    async fn list_messages(
        &self,
        room: &RoomId,
        limit: u32,
        offset: u32,
    ) -> PersistenceResult<Vec<ChatMessage>> {
        let room = room.clone();
        self.with_db(move |db| {
            // Unknown rooms are an error, not an empty page.
            db.get_conversation(&room)?;
            db.list_messages(&room, limit, offset)
        })
        .await
    }

    async fn message_count(&self, room: &RoomId) -> PersistenceResult<u64> {
        let room = room.clone();
        self.with_db(move |db| db.count_messages(&room)).await
    }

    async fn participants(&self, room: &RoomId) -> PersistenceResult<Vec<UserId>> {
        let room = room.clone();
        self.with_db(move |db| db.members(&room)).await
    }

    async fn find_direct(&self, pair: &DirectPair) -> PersistenceResult<Option<RoomId>> {
        let pair = pair.clone();
        self.with_db(move |db| Ok(db.find_direct(&pair)?.map(|c| c.room_id)))
            .await
    }

    async fn create_direct(&self, pair: &DirectPair) -> PersistenceResult<RoomId> {
        let pair = pair.clone();
        self.with_db(move |db| Ok(db.insert_direct(&pair)?.room_id))
            .await
    }

    async fn create_group(
        &self,
        name: &str,
        members: &[UserId],
    ) -> PersistenceResult<ConversationSummary> {
        let (name, members) = (name.to_string(), members.to_vec());
        self.with_db(move |db| {
            let group = db.create_group(&name, &members)?;
            Ok(ConversationSummary {
                id: group.room_id,
                name: group.name,
                kind: group.kind,
                last_message: None,
                last_message_at: None,
                message_count: 0,
            })
        })
        .await
    }

    async fn list_conversations(
        &self,
        user: &UserId,
    ) -> PersistenceResult<Vec<ConversationSummary>> {
        let user = user.clone();
        self.with_db(move |db| db.list_conversations_for_user(&user))
            .await
    }

    async fn create_notification(
        &self,
        request: CreateNotificationRequest,
    ) -> PersistenceResult<Notification> {
        self.with_db(move |db| {
            db.insert_notification(
                &request.user_id,
                request.kind,
                &request.title,
                &request.message,
                request.metadata,
            )
        })
        .await
    }

    async fn list_notifications(
        &self,
        user: &UserId,
        unread_only: bool,
    ) -> PersistenceResult<Vec<Notification>> {
        let user = user.clone();
        self.with_db(move |db| db.list_notifications(&user, unread_only))
            .await
    }

    async fn mark_read(&self, id: Uuid, user: &UserId) -> PersistenceResult<bool> {
        let user = user.clone();
        self.with_db(move |db| db.mark_notification_read(id, &user))
            .await
    }
}
