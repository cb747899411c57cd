//! Per-conversation indexing watermarks.
//!
//! The table is a dumb store: it does not check that the history below a
//! watermark is actually cached. It only guarantees the stored value never
//! moves backwards.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use gmcache_shared::{ConversationId, IndexStatus, MessageId};

use crate::database::{format_timestamp, parse_timestamp, CacheDatabase};
use crate::error::{Result, StoreError};

/// Result of an attempt to move a watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatermarkAdvance {
    /// The watermark moved to the requested id.
    Advanced { previous: Option<MessageId> },
    /// The requested id was not newer than the stored one; nothing changed.
    Unchanged { current: MessageId },
}

impl WatermarkAdvance {
    pub fn advanced(&self) -> bool {
        matches!(self, Self::Advanced { .. })
    }
}

impl CacheDatabase {
    pub fn get_watermark(&self, conversation_id: &ConversationId) -> Result<Option<MessageId>> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT last_indexed_message_id FROM index_status WHERE conversation_id = ?1",
                params![conversation_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(MessageId))
    }

    /// Store `watermark` if it is strictly newer than the current one.
    ///
    /// The compare and the write happen in one transaction, so concurrent
    /// callers cannot interleave a regression. The conversation must be
    /// cached.
    pub fn set_watermark_if_newer(
        &mut self,
        conversation_id: &ConversationId,
        watermark: &MessageId,
    ) -> Result<WatermarkAdvance> {
        let tx = self.conn.transaction()?;

        let known = tx
            .prepare_cached("SELECT 1 FROM conversations WHERE id = ?1")?
            .exists(params![conversation_id.as_str()])?;
        if !known {
            return Err(StoreError::NotFound);
        }

        let current: Option<MessageId> = tx
            .query_row(
                "SELECT last_indexed_message_id FROM index_status WHERE conversation_id = ?1",
                params![conversation_id.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(MessageId);

        if let Some(current) = current.as_ref().filter(|c| *c >= watermark) {
            return Ok(WatermarkAdvance::Unchanged {
                current: current.clone(),
            });
        }

        tx.execute(
            "INSERT INTO index_status (conversation_id, last_indexed_message_id, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(conversation_id) DO UPDATE SET
                 last_indexed_message_id = excluded.last_indexed_message_id,
                 updated_at = excluded.updated_at",
            params![
                conversation_id.as_str(),
                watermark.as_str(),
                format_timestamp(&Utc::now()),
            ],
        )?;
        tx.commit()?;

        Ok(WatermarkAdvance::Advanced { previous: current })
    }

    /// Forget a conversation's watermark. Returns `true` if one was stored.
    pub fn clear_watermark(&mut self, conversation_id: &ConversationId) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM index_status WHERE conversation_id = ?1",
            params![conversation_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn list_index_status(&self) -> Result<Vec<IndexStatus>> {
        let mut stmt = self.conn.prepare(
            "SELECT conversation_id, last_indexed_message_id, updated_at
             FROM index_status
             ORDER BY conversation_id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let conversation_id: String = row.get(0)?;
            let message_id: String = row.get(1)?;
            let updated_str: String = row.get(2)?;
            Ok(IndexStatus {
                conversation_id: ConversationId(conversation_id),
                last_indexed_message_id: MessageId(message_id),
                updated_at: parse_timestamp(2, &updated_str)?,
            })
        })?;

        let mut statuses = Vec::new();
        for row in rows {
            statuses.push(row?);
        }
        Ok(statuses)
    }
}
