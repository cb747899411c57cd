//! persist v001 -- User state that survives a cache clear.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS starred_messages (
    conversation_id TEXT NOT NULL,
    message_id      TEXT NOT NULL,
    starred_at      TEXT NOT NULL,
    PRIMARY KEY (conversation_id, message_id)
);

CREATE TABLE IF NOT EXISTS hidden_messages (
    conversation_id TEXT NOT NULL,
    message_id      TEXT NOT NULL,
    hidden_at       TEXT NOT NULL,
    PRIMARY KEY (conversation_id, message_id)
);

CREATE TABLE IF NOT EXISTS read_positions (
    conversation_id      TEXT PRIMARY KEY NOT NULL,
    last_read_message_id TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

-- Opaque per-window layout state, keyed by window name.
CREATE TABLE IF NOT EXISTS window_state (
    key        TEXT PRIMARY KEY NOT NULL,
    state_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS app_meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
