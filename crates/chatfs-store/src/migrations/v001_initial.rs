//! v001 -- Initial schema creation.
//!
//! Creates the three collections: `users`, `chats` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users: id -> handle
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id     INTEGER PRIMARY KEY NOT NULL,
    handle TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chats: handle -> chat id
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    handle  TEXT PRIMARY KEY NOT NULL,
    chat_id INTEGER NOT NULL
);

-- ----------------------------------------------------------------
-- Messages: id -> record
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY NOT NULL,
    chat_id     INTEGER NOT NULL,
    sent_at     TEXT NOT NULL,                -- RFC-3339, UTC
    sender      TEXT NOT NULL,
    quoted_text TEXT NOT NULL DEFAULT '',
    text        TEXT NOT NULL,
    is_outgoing INTEGER NOT NULL DEFAULT 0    -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_sent_at
    ON messages(sent_at, id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
