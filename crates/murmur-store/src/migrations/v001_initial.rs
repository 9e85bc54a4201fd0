//! v001 -- Initial schema creation.
//!
//! Creates `conversations`, `conversation_members`, `messages` and
//! `notifications`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations (groups and direct pairs)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    room_id    TEXT NOT NULL UNIQUE,          -- routing key
    kind       TEXT NOT NULL,                 -- 'group' | 'direct'
    name       TEXT NOT NULL,
    pair_key   TEXT UNIQUE,                   -- canonical direct pair, NULL for groups
    created_at TEXT NOT NULL                  -- RFC-3339, fixed width
);

CREATE TABLE IF NOT EXISTS conversation_members (
    room_id   TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    joined_at TEXT NOT NULL,

    PRIMARY KEY (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES conversations(room_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_members_user ON conversation_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT, -- server assignment order
    id         TEXT NOT NULL UNIQUE,              -- UUID v4
    room_id    TEXT NOT NULL,
    sender_id  TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (room_id) REFERENCES conversations(room_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_room_seq ON messages(room_id, seq);

-- ----------------------------------------------------------------
-- Notifications
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,          -- UUID v4
    user_id    TEXT NOT NULL,
    kind       TEXT NOT NULL,
    title      TEXT NOT NULL,
    message    TEXT NOT NULL,
    is_read    INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    metadata   TEXT NOT NULL DEFAULT 'null',  -- JSON
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, seq DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
