use chrono::{SubsecRound, Utc};
use rusqlite::params;
use uuid::Uuid;

use murmur_shared::protocol::ChatMessage;
use murmur_shared::types::{RoomId, UserId};

use crate::database::{format_ts, parse_ts, parse_uuid, Database};
use crate::error::Result;

impl Database {
    /// Persist a message. The id, timestamp and sequence are assigned here.
    pub fn insert_message(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        content: &str,
    ) -> Result<ChatMessage> {
        // Unknown rooms surface as NotFound rather than a foreign key failure.
        self.get_conversation(room_id)?;

        let id = Uuid::new_v4();
        // Stored with microsecond precision.
        let created_at = Utc::now().trunc_subsecs(6);

        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (id, room_id, sender_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                room_id.as_str(),
                sender_id.as_str(),
                content,
                format_ts(&created_at),
            ],
        )?;

        Ok(ChatMessage {
            id,
            seq: conn.last_insert_rowid().max(0) as u64,
            room_id: room_id.clone(),
            sender_id: sender_id.clone(),
            content: content.to_string(),
            created_at,
        })
    }

    /// Messages of a room in creation order.
    pub fn list_messages(&self, room_id: &RoomId, limit: u32, offset: u32) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, room_id, sender_id, content, created_at, seq
             FROM messages
             WHERE room_id = ?1
             ORDER BY seq ASC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(params![room_id.as_str(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn count_messages(&self, room_id: &RoomId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE room_id = ?1",
            params![room_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id_str: String = row.get(0)?;
    let room_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let content: String = row.get(3)?;
    let ts_str: String = row.get(4)?;
    let seq: i64 = row.get(5)?;

    Ok(ChatMessage {
        id: parse_uuid(0, &id_str)?,
        seq: seq.max(0) as u64,
        room_id: RoomId(room_id),
        sender_id: UserId(sender_id),
        content,
        created_at: parse_ts(4, &ts_str)?,
    })
}
