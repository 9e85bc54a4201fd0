//! Conversation resolver: logical conversation -> room id.
//!
//! Groups already carry a stable id which is used as the room id. Direct
//! conversations are keyed by their canonical participant pair and created
//! lazily on first resolution. The store's uniqueness constraint on the pair
//! key decides concurrent first resolutions; the loser re-reads the winner's
//! record.

use std::sync::Arc;

use tracing::{debug, info};

use murmur_shared::types::{ConversationRef, DirectPair, RoomId, UserId};

use crate::error::ServerError;
use crate::persistence::{ChatStore, PersistenceError};

#[derive(Clone)]
pub struct ConversationResolver {
    store: Arc<dyn ChatStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub fn resolve_group(&self, group_id: &str) -> Result<RoomId, ServerError> {
        let group_id = group_id.trim();
        if group_id.is_empty() {
            return Err(ServerError::InvalidConversation("group id is empty".into()));
        }
        Ok(RoomId(group_id.to_string()))
    }

    /// Resolve the direct conversation between `a` and `b`, creating it on
    /// first use. Argument order does not matter.
    pub async fn resolve_direct(&self, a: &UserId, b: &UserId) -> Result<RoomId, ServerError> {
        let pair = DirectPair::new(a.clone(), b.clone())?;

        if let Some(room) = self.store.find_direct(&pair).await? {
            return Ok(room);
        }

        match self.store.create_direct(&pair).await {
            Ok(room) => {
                info!(room = %room, low = %pair.low(), high = %pair.high(), "Direct conversation created");
                Ok(room)
            }
            Err(PersistenceError::AlreadyExists) => {
                debug!(low = %pair.low(), high = %pair.high(), "Lost direct creation race, re-reading");
                self.store.find_direct(&pair).await?.ok_or_else(|| {
                    ServerError::Internal(format!(
                        "direct conversation {} / {} reported as existing but not found",
                        pair.low(),
                        pair.high()
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn resolve(&self, conversation: &ConversationRef) -> Result<RoomId, ServerError> {
        match conversation {
            ConversationRef::Group(id) => self.resolve_group(id),
            ConversationRef::Direct(a, b) => self.resolve_direct(a, b).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use murmur_shared::protocol::{
        ChatMessage, ConversationSummary, CreateNotificationRequest, Notification,
    };
    use murmur_store::Database;
    use uuid::Uuid;

    use super::*;
    use crate::persistence::{PersistedMessage, PersistenceResult, SqliteStore};

    fn sqlite() -> SqliteStore {
        SqliteStore::new(Database::open_in_memory().unwrap())
    }

    /// Hides existing direct records from the first `stale_reads` lookups,
    /// as a concurrent writer on another instance would.
    struct StaleReads {
        inner: SqliteStore,
        stale_reads: AtomicUsize,
        creates: AtomicUsize,
    }

    #[async_trait]
    impl ChatStore for StaleReads {
        async fn create_message(
            &self,
            room: &RoomId,
            sender: &UserId,
            content: &str,
        ) -> PersistenceResult<PersistedMessage> {
            self.inner.create_message(room, sender, content).await
        }

        async fn list_messages(
            &self,
            room: &RoomId,
            limit: u32,
            offset: u32,
        ) -> PersistenceResult<Vec<ChatMessage>> {
            self.inner.list_messages(room, limit, offset).await
        }

        async fn message_count(&self, room: &RoomId) -> PersistenceResult<u64> {
            self.inner.message_count(room).await
        }

        async fn participants(&self, room: &RoomId) -> PersistenceResult<Vec<UserId>> {
            self.inner.participants(room).await
        }

        async fn find_direct(&self, pair: &DirectPair) -> PersistenceResult<Option<RoomId>> {
            let hide = self
                .stale_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if hide {
                return Ok(None);
            }
            self.inner.find_direct(pair).await
        }

        async fn create_direct(&self, pair: &DirectPair) -> PersistenceResult<RoomId> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.inner.create_direct(pair).await
        }

        async fn create_group(
            &self,
            name: &str,
            members: &[UserId],
        ) -> PersistenceResult<ConversationSummary> {
            self.inner.create_group(name, members).await
        }

        async fn list_conversations(
            &self,
            user: &UserId,
        ) -> PersistenceResult<Vec<ConversationSummary>> {
            self.inner.list_conversations(user).await
        }

        async fn create_notification(
            &self,
            request: CreateNotificationRequest,
        ) -> PersistenceResult<Notification> {
            self.inner.create_notification(request).await
        }

        async fn list_notifications(
            &self,
            user: &UserId,
            unread_only: bool,
        ) -> PersistenceResult<Vec<Notification>> {
            self.inner.list_notifications(user, unread_only).await
        }

        async fn mark_read(&self, id: Uuid, user: &UserId) -> PersistenceResult<bool> {
            self.inner.mark_read(id, user).await
        }
    }

    #[tokio::test]
    async fn test_group_resolves_to_itself() {
        let resolver = ConversationResolver::new(Arc::new(sqlite()));
        let room = resolver
            .resolve(&ConversationRef::Group("team-42".into()))
            .await
            .unwrap();
        assert_eq!(room.as_str(), "team-42");
        assert!(resolver.resolve_group("  ").is_err());
    }

    #[tokio::test]
    async fn test_direct_is_order_independent_and_idempotent() {
        let resolver = ConversationResolver::new(Arc::new(sqlite()));
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        let first = resolver.resolve_direct(&alice, &bob).await.unwrap();
        let second = resolver.resolve_direct(&bob, &alice).await.unwrap();
        let third = resolver.resolve_direct(&alice, &bob).await.unwrap();
        assert!(first.is_direct());
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_self_pair_is_invalid() {
        let resolver = ConversationResolver::new(Arc::new(sqlite()));
        let err = resolver
            .resolve_direct(&"alice".into(), &"alice".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidConversation(_)));
    }

    #[tokio::test]
    async fn test_lost_race_rereads_winner() {
        let inner = sqlite();
        let pair = DirectPair::new("alice".into(), "bob".into()).unwrap();
        let winner = inner.create_direct(&pair).await.unwrap();

        let store = Arc::new(StaleReads {
            inner,
            stale_reads: AtomicUsize::new(1),
            creates: AtomicUsize::new(0),
        });
        let resolver = ConversationResolver::new(store.clone());

        let room = resolver
            .resolve_direct(&"bob".into(), &"alice".into())
            .await
            .unwrap();
        assert_eq!(room, winner);
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_resolution_creates_once() {
        let store = Arc::new(StaleReads {
            inner: sqlite(),
            // Both racers miss on their first lookup.
            stale_reads: AtomicUsize::new(2),
            creates: AtomicUsize::new(0),
        });
        let resolver = ConversationResolver::new(store.clone());

        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));
        let (ab, ba) = tokio::join!(
            resolver.resolve_direct(&alice, &bob),
            resolver.resolve_direct(&bob, &alice),
        );
        assert_eq!(ab.unwrap(), ba.unwrap());
        assert_eq!(store.creates.load(Ordering::SeqCst), 2);

        let listed = store.list_conversations(&alice).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
