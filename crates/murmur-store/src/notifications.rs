//! Notification persistence. The only mutation after creation is the
//! unread -> read transition.

use chrono::{SubsecRound, Utc};
use rusqlite::params;
use uuid::Uuid;

use murmur_shared::protocol::{Notification, NotificationKind};
use murmur_shared::types::UserId;

use crate::database::{format_ts, parse_ts, parse_uuid, Database};
use crate::error::{Result, StoreError};

impl Database {
    pub fn insert_notification(
        &self,
        user_id: &UserId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        metadata: serde_json::Value,
    ) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: user_id.clone(),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            read: false,
            metadata,
            created_at: Utc::now().trunc_subsecs(6),
        };

        self.conn().execute(
            "INSERT INTO notifications (id, user_id, kind, title, message, is_read, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
            params![
                notification.id.to_string(),
                notification.user_id.as_str(),
                notification.kind.as_str(),
                notification.title,
                notification.message,
                serde_json::to_string(&notification.metadata)?,
                format_ts(&notification.created_at),
            ],
        )?;
        Ok(notification)
    }

    /// Notifications for `user_id`, newest first.
    pub fn list_notifications(&self, user_id: &UserId, unread_only: bool) -> Result<Vec<Notification>> {
        let sql = if unread_only {
            "SELECT id, user_id, kind, title, message, is_read, metadata, created_at
             FROM notifications WHERE user_id = ?1 AND is_read = 0
             ORDER BY seq DESC"
        } else {
            "SELECT id, user_id, kind, title, message, is_read, metadata, created_at
             FROM notifications WHERE user_id = ?1
             ORDER BY seq DESC"
        };

        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![user_id.as_str()], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Mark one of `user_id`'s notifications as read.
    ///
    /// Returns `false` when it was already read, and `NotFound` when the id
    /// does not exist or belongs to someone else.
    pub fn mark_notification_read(&self, id: Uuid, user_id: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_read = 1
             WHERE id = ?1 AND user_id = ?2 AND is_read = 0",
            params![id.to_string(), user_id.as_str()],
        )?;
        if affected > 0 {
            return Ok(true);
        }

        let exists: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.as_str()],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(false)
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let id_str: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let title: String = row.get(3)?;
    let message: String = row.get(4)?;
    let is_read: bool = row.get(5)?;
    let metadata_str: String = row.get(6)?;
    let ts_str: String = row.get(7)?;

    let kind = NotificationKind::parse(&kind_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let metadata = serde_json::from_str(&metadata_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Notification {
        id: parse_uuid(0, &id_str)?,
        user_id: UserId(user_id),
        kind,
        title,
        message,
        read: is_read,
        metadata,
        created_at: parse_ts(7, &ts_str)?,
    })
}
