//! Notification fan-out: persist, then push to the target's personal room.
//!
//! The push is only a latency optimization. A user with no open connection
//! still finds the notification on the next fetch.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use murmur_shared::protocol::{CreateNotificationRequest, Notification, ServerEvent};
use murmur_shared::types::UserId;

use crate::error::ServerError;
use crate::fanout::encode;
use crate::persistence::{ChatStore, PersistenceError};
use crate::rooms::RoomRegistry;

#[derive(Clone)]
pub struct NotificationPipeline {
    store: Arc<dyn ChatStore>,
    registry: RoomRegistry,
}

impl NotificationPipeline {
    pub fn new(store: Arc<dyn ChatStore>, registry: RoomRegistry) -> Self {
        Self { store, registry }
    }

    pub async fn notify(&self, request: CreateNotificationRequest) -> Result<Notification, ServerError> {
        if request.title.trim().is_empty() {
            return Err(ServerError::BadRequest("notification title is empty".into()));
        }

        let target = request.user_id.clone();
        let notification = self.store.create_notification(request).await.map_err(|e| {
            warn!(user = %target, error = %e, "Notification persistence failed");
            ServerError::from(e)
        })?;

        let payload = encode(&ServerEvent::NotificationNew(notification.clone()))?;
        let delivered = self.registry.publish(&target.personal_room(), payload);
        debug!(
            user = %target,
            notification = %notification.id,
            kind = notification.kind.as_str(),
            delivered,
            "Notification fanned out"
        );

        Ok(notification)
    }

    pub async fn list(&self, user: &UserId, unread_only: bool) -> Result<Vec<Notification>, ServerError> {
        Ok(self.store.list_notifications(user, unread_only).await?)
    }

    /// Mark a notification read. Other devices of the owner are told through
    /// the personal room, but only when the state actually changed.
    pub async fn mark_read(&self, id: Uuid, user: &UserId) -> Result<bool, ServerError> {
        let updated = match self.store.mark_read(id, user).await {
            Ok(updated) => updated,
            Err(PersistenceError::NotFound) => {
                return Err(ServerError::NotFound(format!("notification {id}")))
            }
            Err(e) => return Err(e.into()),
        };

        if updated {
            let payload = encode(&ServerEvent::NotificationRead { id })?;
            self.registry.publish(&user.personal_room(), payload);
        }
        Ok(updated)
    }
}
