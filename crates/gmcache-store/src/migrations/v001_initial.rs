//! v001 -- Initial cache schema.
//!
//! Creates `conversations`, `members`, `messages`, `index_status` and
//! `app_meta`. Substructures with no identity of their own (previews, a
//! chat's other party, attachments, likes, roles) are JSON columns.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations (groups and chats)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY NOT NULL,  -- remote-assigned
    kind            TEXT NOT NULL,              -- 'group' | 'chat'
    name            TEXT NOT NULL,
    description     TEXT,
    image_url       TEXT,
    creator_user_id TEXT,
    created_at      TEXT NOT NULL,              -- RFC-3339, fixed width
    updated_at      TEXT NOT NULL,
    max_members     INTEGER,
    preview_json    TEXT,                       -- LatestMessagePreview
    other_user_json TEXT                        -- Member, chats only
);

CREATE INDEX IF NOT EXISTS idx_conversations_updated
    ON conversations(updated_at DESC, id);

-- ----------------------------------------------------------------
-- Members
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS members (
    conversation_id TEXT NOT NULL,
    id              TEXT NOT NULL,
    position        INTEGER NOT NULL,           -- first-seen order
    user_id         TEXT NOT NULL,
    nickname        TEXT NOT NULL,
    image_url       TEXT,
    roles_json      TEXT NOT NULL DEFAULT '[]',
    muted           INTEGER NOT NULL DEFAULT 0,
    autokicked      INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (conversation_id, id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    conversation_id   TEXT NOT NULL,
    id                TEXT NOT NULL,
    source_guid       TEXT,
    created_at        TEXT NOT NULL,
    user_id           TEXT NOT NULL,
    sender_id         TEXT NOT NULL,
    name              TEXT NOT NULL,
    avatar_url        TEXT,
    text              TEXT,
    system            INTEGER NOT NULL DEFAULT 0,
    attachments_json  TEXT NOT NULL DEFAULT '[]',
    favorited_by_json TEXT NOT NULL DEFAULT '[]',

    PRIMARY KEY (conversation_id, id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_order
    ON messages(conversation_id, length(id), id);

-- ----------------------------------------------------------------
-- Index status (one watermark per conversation)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS index_status (
    conversation_id         TEXT PRIMARY KEY NOT NULL,
    last_indexed_message_id TEXT NOT NULL,
    updated_at              TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Key/value metadata
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS app_meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
