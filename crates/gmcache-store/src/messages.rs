//! Message rows and message-page upserts.

use rusqlite::{params, Connection, OptionalExtension};

use gmcache_shared::{merge_messages, ConversationId, Message, MessageId, UserId};

use crate::conversations::load_conversation_row;
use crate::database::{format_timestamp, parse_json, parse_timestamp, to_json, CacheDatabase};
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "conversation_id, id, source_guid, created_at, user_id, sender_id, name, \
                               avatar_url, text, system, attachments_json, favorited_by_json";

impl CacheDatabase {
    /// Union a page of messages into a cached conversation.
    ///
    /// Messages already cached are left untouched; the rest are inserted in
    /// one transaction. Returns how many were new.
    ///
    /// # Panics
    ///
    /// If a message has an empty id.
    pub fn upsert_message_batch(
        &mut self,
        conversation_id: &ConversationId,
        messages: Vec<Message>,
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;

        let mut shell = load_conversation_row(&tx, conversation_id)?.ok_or(StoreError::NotFound)?;
        let ids: Vec<MessageId> = messages.iter().map(|m| m.id.clone()).collect();
        for cached in load_messages_by_ids(&tx, conversation_id, &ids)? {
            shell.messages.insert(cached.id.clone(), cached);
        }

        let added = merge_messages(&mut shell, messages);
        for id in &added {
            insert_message(&tx, &shell.messages[id])?;
        }

        tx.commit()?;

        tracing::debug!(
            conversation = %conversation_id,
            received = ids.len(),
            added = added.len(),
            "upserted message batch"
        );
        Ok(added.len())
    }

    pub fn get_message(&self, conversation_id: &ConversationId, id: &MessageId) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 AND id = ?2");
        let message = self
            .conn
            .query_row(&sql, params![conversation_id.as_str(), id.as_str()], row_to_message)
            .optional()?;
        Ok(message)
    }

    /// Newest-first page of cached messages strictly older than `before`
    /// (or the newest messages when `before` is `None`).
    pub fn messages_before(
        &self,
        conversation_id: &ConversationId,
        before: Option<&MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE conversation_id = ?1
               AND (?2 IS NULL
                    OR length(id) < length(?2)
                    OR (length(id) = length(?2) AND id < ?2))
             ORDER BY length(id) DESC, id DESC
             LIMIT ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let rows = stmt.query_map(
            params![conversation_id.as_str(), before.map(|b| b.as_str()), limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn message_count(&self, conversation_id: &ConversationId) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn total_message_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Insert a message unless one with the same id is already cached.
pub(crate) fn insert_message(conn: &Connection, message: &Message) -> Result<bool> {
    let sql = format!(
        "INSERT OR IGNORE INTO messages ({MESSAGE_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
    );
    let inserted = conn.prepare_cached(&sql)?.execute(params![
        message.conversation_id.as_str(),
        message.id.as_str(),
        message.source_guid,
        format_timestamp(&message.created_at),
        message.user_id.as_str(),
        message.sender_id,
        message.name,
        message.avatar_url,
        message.text,
        message.system as i32,
        to_json(&message.attachments)?,
        to_json(&message.favorited_by)?,
    ])?;
    Ok(inserted > 0)
}

/// The subset of `ids` that is cached for this conversation.
pub(crate) fn load_messages_by_ids(
    conn: &Connection,
    conversation_id: &ConversationId,
    ids: &[MessageId],
) -> Result<Vec<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 AND id = ?2");
    let mut stmt = conn.prepare_cached(&sql)?;

    let mut messages = Vec::new();
    for id in ids {
        if let Some(message) = stmt
            .query_row(params![conversation_id.as_str(), id.as_str()], row_to_message)
            .optional()?
        {
            messages.push(message);
        }
    }
    Ok(messages)
}

/// Every cached message of a conversation, oldest first.
pub(crate) fn load_all_messages(conn: &Connection, conversation_id: &ConversationId) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE conversation_id = ?1
         ORDER BY length(id) ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![conversation_id.as_str()], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let conversation_id: String = row.get(0)?;
    let id: String = row.get(1)?;
    let created_str: String = row.get(3)?;
    let user_id: String = row.get(4)?;
    let system: i32 = row.get(9)?;
    let attachments_json: String = row.get(10)?;
    let favorited_json: String = row.get(11)?;

    Ok(Message {
        id: MessageId(id),
        conversation_id: ConversationId(conversation_id),
        source_guid: row.get(2)?,
        created_at: parse_timestamp(3, &created_str)?,
        user_id: UserId(user_id),
        sender_id: row.get(5)?,
        name: row.get(6)?,
        avatar_url: row.get(7)?,
        text: row.get(8)?,
        system: system != 0,
        attachments: parse_json(10, &attachments_json)?,
        favorited_by: parse_json(11, &favorited_json)?,
    })
}
