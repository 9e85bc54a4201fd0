//! CRUD operations for [`Conversation`] records and their members.

use chrono::{SubsecRound, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use murmur_shared::protocol::ConversationSummary;
use murmur_shared::types::{ConversationKind, DirectPair, RoomId, UserId};

use crate::database::{format_ts, parse_ts, parse_uuid, Database};
use crate::error::Result;
use crate::models::Conversation;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a group conversation. The group id doubles as its room id.
    pub fn create_group(&self, name: &str, members: &[UserId]) -> Result<Conversation> {
        let id = Uuid::new_v4();
        let conversation = Conversation {
            id,
            room_id: RoomId(id.to_string()),
            kind: ConversationKind::Group,
            name: name.to_string(),
            pair_key: None,
            created_at: Utc::now().trunc_subsecs(6),
        };

        let tx = self.conn().unchecked_transaction()?;
        insert_conversation(&tx, &conversation)?;
        for member in members {
            insert_member(&tx, &conversation.room_id, member)?;
        }
        tx.commit()?;

        Ok(conversation)
    }

    /// Insert a direct conversation for `pair`.
    ///
    /// The `pair_key` column is UNIQUE, so a concurrent insert for the same
    /// pair fails with [`StoreError::AlreadyExists`](crate::StoreError::AlreadyExists).
    pub fn insert_direct(&self, pair: &DirectPair) -> Result<Conversation> {
        let id = Uuid::new_v4();
        let conversation = Conversation {
            id,
            room_id: RoomId::direct(id),
            kind: ConversationKind::Direct,
            name: String::new(),
            pair_key: Some(pair.key()),
            created_at: Utc::now().trunc_subsecs(6),
        };

        let tx = self.conn().unchecked_transaction()?;
        insert_conversation(&tx, &conversation)?;
        insert_member(&tx, &conversation.room_id, pair.low())?;
        insert_member(&tx, &conversation.room_id, pair.high())?;
        tx.commit()?;

        Ok(conversation)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn find_direct(&self, pair: &DirectPair) -> Result<Option<Conversation>> {
        let conversation = self
            .conn()
            .query_row(
                "SELECT id, room_id, kind, name, pair_key, created_at
                 FROM conversations
                 WHERE pair_key = ?1",
                params![pair.key()],
                row_to_conversation,
            )
            .optional()?;
        Ok(conversation)
    }

    pub fn get_conversation(&self, room_id: &RoomId) -> Result<Conversation> {
        let conversation = self.conn().query_row(
            "SELECT id, room_id, kind, name, pair_key, created_at
             FROM conversations
             WHERE room_id = ?1",
            params![room_id.as_str()],
            row_to_conversation,
        )?;
        Ok(conversation)
    }

    /// Members of a conversation, in join order.
    pub fn members(&self, room_id: &RoomId) -> Result<Vec<UserId>> {
        // Distinguish "unknown room" from "room with no members".
        self.get_conversation(room_id)?;

        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM conversation_members
             WHERE room_id = ?1
             ORDER BY joined_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![room_id.as_str()], |row| {
            row.get::<_, String>(0).map(UserId)
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Conversations `user` belongs to, most recently active first.
    ///
    /// Direct conversations are named after the other participant.
    pub fn list_conversations_for_user(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.room_id, c.kind, c.name, c.created_at,
                    (SELECT o.user_id FROM conversation_members o
                      WHERE o.room_id = c.room_id AND o.user_id != ?1 LIMIT 1),
                    (SELECT m.content FROM messages m
                      WHERE m.room_id = c.room_id ORDER BY m.seq DESC LIMIT 1),
                    (SELECT m.created_at FROM messages m
                      WHERE m.room_id = c.room_id ORDER BY m.seq DESC LIMIT 1),
                    (SELECT COUNT(*) FROM messages m WHERE m.room_id = c.room_id)
             FROM conversations c
             JOIN conversation_members cm ON cm.room_id = c.room_id
             WHERE cm.user_id = ?1",
        )?;

        let rows = stmt.query_map(params![user.as_str()], |row| {
            let room_id: String = row.get(0)?;
            let kind_str: String = row.get(1)?;
            let name: String = row.get(2)?;
            let created_str: String = row.get(3)?;
            let peer: Option<String> = row.get(4)?;
            let last_message: Option<String> = row.get(5)?;
            let last_at: Option<String> = row.get(6)?;
            let count: i64 = row.get(7)?;

            let kind = parse_kind(1, &kind_str)?;
            let last_message_at = last_at.map(|s| parse_ts(6, &s)).transpose()?;
            let created_at = parse_ts(3, &created_str)?;

            let name = match kind {
                ConversationKind::Direct => peer.unwrap_or(name),
                ConversationKind::Group => name,
            };

            Ok((
                ConversationSummary {
                    id: RoomId(room_id),
                    name,
                    kind,
                    last_message: last_message.as_deref().map(murmur_shared::protocol::preview),
                    last_message_at,
                    message_count: count.max(0) as u64,
                },
                created_at,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        summaries.sort_by(|(a, a_created), (b, b_created)| {
            let a_key = a.last_message_at.unwrap_or(*a_created);
            let b_key = b.last_message_at.unwrap_or(*b_created);
            b_key.cmp(&a_key)
        });

        Ok(summaries.into_iter().map(|(s, _)| s).collect())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_conversation(conn: &rusqlite::Connection, c: &Conversation) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations (id, room_id, kind, name, pair_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            c.id.to_string(),
            c.room_id.as_str(),
            c.kind.as_str(),
            c.name,
            c.pair_key,
            format_ts(&c.created_at),
        ],
    )?;
    Ok(())
}

fn insert_member(conn: &rusqlite::Connection, room_id: &RoomId, user: &UserId) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO conversation_members (room_id, user_id, joined_at)
         VALUES (?1, ?2, ?3)",
        params![room_id.as_str(), user.as_str(), format_ts(&Utc::now())],
    )?;
    Ok(())
}

fn parse_kind(idx: usize, value: &str) -> rusqlite::Result<ConversationKind> {
    ConversationKind::from_str_opt(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown conversation kind: {value}").into(),
        )
    })
}

/// Map a `rusqlite::Row` to a [`Conversation`].
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let room_id: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let name: String = row.get(3)?;
    let pair_key: Option<String> = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(Conversation {
        id: parse_uuid(0, &id_str)?,
        room_id: RoomId(room_id),
        kind: parse_kind(2, &kind_str)?,
        name,
        pair_key,
        created_at: parse_ts(5, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn pair(a: &str, b: &str) -> DirectPair {
        DirectPair::new(a.into(), b.into()).unwrap()
    }

    #[test]
    fn direct_pair_is_unique() {
        let db = Database::open_in_memory().unwrap();
        let created = db.insert_direct(&pair("alice", "bob")).unwrap();
        assert!(created.room_id.is_direct());

        let err = db.insert_direct(&pair("bob", "alice")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));

        let found = db.find_direct(&pair("bob", "alice")).unwrap().unwrap();
        assert_eq!(found.room_id, created.room_id);
    }

    #[test]
    fn find_direct_absent() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.find_direct(&pair("alice", "bob")).unwrap().is_none());
    }

    #[test]
    fn members_of_unknown_room() {
        let db = Database::open_in_memory().unwrap();
        let err = db.members(&RoomId::from("nope")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn group_members_and_listing() {
        let db = Database::open_in_memory().unwrap();
        let group = db
            .create_group("Team", &["alice".into(), "bob".into()])
            .unwrap();
        assert_eq!(group.room_id.as_str(), group.id.to_string());

        let members = db.members(&group.room_id).unwrap();
        assert_eq!(members.len(), 2);

        assert!(db.list_conversations_for_user(&"carol".into()).unwrap().is_empty());

        let listed = db.list_conversations_for_user(&"bob".into()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Team");
        assert_eq!(listed[0].message_count, 0);
        assert!(listed[0].last_message.is_none());
    }

    #[test]
    fn listing_orders_by_last_activity_and_names_directs() {
        let db = Database::open_in_memory().unwrap();
        let dm = db.insert_direct(&pair("alice", "bob")).unwrap();
        let group = db.create_group("Team", &["alice".into()]).unwrap();

        db.insert_message(&dm.room_id, &"bob".into(), "older").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        db.insert_message(&group.room_id, &"alice".into(), "newer").unwrap();

        let listed = db.list_conversations_for_user(&"alice".into()).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, group.room_id);
        assert_eq!(listed[1].id, dm.room_id);
        assert_eq!(listed[1].name, "bob");
        assert_eq!(listed[1].last_message.as_deref(), Some("older"));
        assert_eq!(listed[1].message_count, 1);
    }
}
