//! User state kept in the persist database: starred and hidden messages,
//! read positions and window layout.
//!
//! None of this is re-fetchable, which is why it lives outside the cache
//! file. Rows reference conversations and messages by id only; there are no
//! foreign keys into the cache.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use gmcache_shared::{ConversationId, MessageId};

use crate::database::{format_timestamp, parse_json, to_json, PersistDatabase};
use crate::error::Result;

/// Which of the two flag tables an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Starred,
    Hidden,
}

impl Flag {
    fn table(self) -> &'static str {
        match self {
            Self::Starred => "starred_messages",
            Self::Hidden => "hidden_messages",
        }
    }

    fn time_column(self) -> &'static str {
        match self {
            Self::Starred => "starred_at",
            Self::Hidden => "hidden_at",
        }
    }
}

impl PersistDatabase {
    // ------------------------------------------------------------------
    // Starred / hidden
    // ------------------------------------------------------------------

    pub fn star_message(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<bool> {
        self.set_flag(Flag::Starred, conversation_id, message_id)
    }

    pub fn unstar_message(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<bool> {
        self.clear_flag(Flag::Starred, conversation_id, message_id)
    }

    pub fn is_starred(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<bool> {
        self.has_flag(Flag::Starred, conversation_id, message_id)
    }

    pub fn starred_in_conversation(&self, conversation_id: &ConversationId) -> Result<Vec<MessageId>> {
        self.flagged_in(Flag::Starred, conversation_id)
    }

    pub fn hide_message(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<bool> {
        self.set_flag(Flag::Hidden, conversation_id, message_id)
    }

    pub fn unhide_message(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<bool> {
        self.clear_flag(Flag::Hidden, conversation_id, message_id)
    }

    pub fn is_hidden(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<bool> {
        self.has_flag(Flag::Hidden, conversation_id, message_id)
    }

    pub fn hidden_in_conversation(&self, conversation_id: &ConversationId) -> Result<Vec<MessageId>> {
        self.flagged_in(Flag::Hidden, conversation_id)
    }

    // ------------------------------------------------------------------
    // Read positions
    // ------------------------------------------------------------------

    /// Record the newest message the user has seen in a conversation.
    pub fn set_read_position(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<()> {
        self.conn.execute(
            "INSERT INTO read_positions (conversation_id, last_read_message_id, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(conversation_id) DO UPDATE SET
                 last_read_message_id = excluded.last_read_message_id,
                 updated_at = excluded.updated_at",
            params![
                conversation_id.as_str(),
                message_id.as_str(),
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn read_position(&self, conversation_id: &ConversationId) -> Result<Option<MessageId>> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT last_read_message_id FROM read_positions WHERE conversation_id = ?1",
                params![conversation_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(MessageId))
    }

    // ------------------------------------------------------------------
    // Window state
    // ------------------------------------------------------------------

    pub fn save_window_state<T: Serialize>(&self, key: &str, state: &T) -> Result<()> {
        self.conn.execute(
            "INSERT INTO window_state (key, state_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 state_json = excluded.state_json,
                 updated_at = excluded.updated_at",
            params![key, to_json(state)?, format_timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn load_window_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT state_json FROM window_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        let state = json.map(|j| parse_json(0, &j)).transpose()?;
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn set_flag(&self, flag: Flag, conversation_id: &ConversationId, message_id: &MessageId) -> Result<bool> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (conversation_id, message_id, {}) VALUES (?1, ?2, ?3)",
            flag.table(),
            flag.time_column()
        );
        let inserted = self.conn.execute(
            &sql,
            params![
                conversation_id.as_str(),
                message_id.as_str(),
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn clear_flag(&self, flag: Flag, conversation_id: &ConversationId, message_id: &MessageId) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE conversation_id = ?1 AND message_id = ?2",
            flag.table()
        );
        let affected = self
            .conn
            .execute(&sql, params![conversation_id.as_str(), message_id.as_str()])?;
        Ok(affected > 0)
    }

    fn has_flag(&self, flag: Flag, conversation_id: &ConversationId, message_id: &MessageId) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE conversation_id = ?1 AND message_id = ?2",
            flag.table()
        );
        let exists = self
            .conn
            .prepare_cached(&sql)?
            .exists(params![conversation_id.as_str(), message_id.as_str()])?;
        Ok(exists)
    }

    fn flagged_in(&self, flag: Flag, conversation_id: &ConversationId) -> Result<Vec<MessageId>> {
        let sql = format!(
            "SELECT message_id FROM {} WHERE conversation_id = ?1
             ORDER BY length(message_id) ASC, message_id ASC",
            flag.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![conversation_id.as_str()], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(MessageId(row?));
        }
        Ok(ids)
    }
}
