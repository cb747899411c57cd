//! Conversation upserts and queries.
//!
//! Upserts reconcile with whatever is already cached through the merge
//! engine, inside one transaction per call. Reads are explicit about what
//! they load: [`CacheDatabase::get_conversation`] returns scalars and
//! members, [`CacheDatabase::get_conversation_with_messages`] also loads the
//! full message set.

use std::collections::VecDeque;

use rusqlite::{params, Connection, OptionalExtension};

use gmcache_shared::constants::CONVERSATION_PAGE_SIZE;
use gmcache_shared::{
    merge_conversation, Conversation, ConversationId, ConversationKind, MergeReport, MessageId,
    UserId,
};

use crate::database::{format_timestamp, parse_json, parse_timestamp, to_json, CacheDatabase};
use crate::error::Result;
use crate::members::{load_members, upsert_member};
use crate::messages::{insert_message, load_all_messages, load_messages_by_ids};

const CONVERSATION_COLUMNS: &str = "id, kind, name, description, image_url, creator_user_id, \
                                    created_at, updated_at, max_members, preview_json, other_user_json";

/// What an upsert did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed; the conversation was stored as given.
    Inserted { messages: usize, members: usize },
    /// A cached row existed and was merged with the incoming copy.
    Merged(MergeReport),
}

impl UpsertOutcome {
    pub fn messages_added(&self) -> usize {
        match self {
            Self::Inserted { messages, .. } => *messages,
            Self::Merged(report) => report.messages_added.len(),
        }
    }
}

impl CacheDatabase {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert `conversation`, or merge it into the cached copy.
    ///
    /// Only the messages whose ids appear in `conversation` are read back
    /// for the merge; everything else in the cached history is untouched.
    ///
    /// # Panics
    ///
    /// If `conversation` fails [`Conversation::validate`].
    pub fn upsert_conversation(&mut self, conversation: Conversation) -> Result<UpsertOutcome> {
        if let Err(violation) = conversation.validate() {
            panic!("{violation}");
        }

        let tx = self.conn.transaction()?;

        let outcome = match load_conversation_row(&tx, &conversation.id)? {
            None => {
                write_conversation_row(&tx, &conversation)?;
                for (position, member) in conversation.members.iter().enumerate() {
                    upsert_member(&tx, &conversation.id, position, member)?;
                }
                for message in conversation.messages.values() {
                    let mut message = message.clone();
                    message.conversation_id = conversation.id.clone();
                    insert_message(&tx, &message)?;
                }
                UpsertOutcome::Inserted {
                    messages: conversation.messages.len(),
                    members: conversation.members.len(),
                }
            }
            Some(mut existing) => {
                existing.members = load_members(&tx, &existing.id)?;
                let incoming_ids: Vec<MessageId> = conversation.messages.keys().cloned().collect();
                for cached in load_messages_by_ids(&tx, &existing.id, &incoming_ids)? {
                    existing.messages.insert(cached.id.clone(), cached);
                }

                let report = merge_conversation(&mut existing, conversation);

                write_conversation_row(&tx, &existing)?;
                for (position, member) in existing.members.iter().enumerate() {
                    if report.members_added.contains(&member.id)
                        || report.members_updated.contains(&member.id)
                    {
                        upsert_member(&tx, &existing.id, position, member)?;
                    }
                }
                for id in &report.messages_added {
                    insert_message(&tx, &existing.messages[id])?;
                }
                UpsertOutcome::Merged(report)
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Drop a conversation and everything cached under it (members,
    /// messages, index status). Returns `true` if a row was deleted.
    pub fn delete_conversation(&mut self, id: &ConversationId) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM conversations WHERE id = ?1", params![id.as_str()])?;
        if affected > 0 {
            tracing::info!(conversation = %id, "evicted conversation from cache");
        }
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Scalars and members; the message set is left empty.
    pub fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let Some(mut conversation) = load_conversation_row(&self.conn, id)? else {
            return Ok(None);
        };
        conversation.members = load_members(&self.conn, id)?;
        Ok(Some(conversation))
    }

    /// Scalars, members and every cached message.
    pub fn get_conversation_with_messages(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let Some(mut conversation) = self.get_conversation(id)? else {
            return Ok(None);
        };
        for message in load_all_messages(&self.conn, id)? {
            conversation.messages.insert(message.id.clone(), message);
        }
        Ok(Some(conversation))
    }

    /// Lazily iterate cached conversations, most recently updated first.
    ///
    /// Rows are read a page at a time as the iterator advances; call again
    /// to restart from the top. Never touches the network.
    pub fn list_conversations(&self) -> ConversationPages<'_> {
        ConversationPages::new(self, CONVERSATION_PAGE_SIZE)
    }

    pub fn conversation_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn contains_conversation(&self, id: &ConversationId) -> Result<bool> {
        let exists = self
            .conn
            .prepare_cached("SELECT 1 FROM conversations WHERE id = ?1")?
            .exists(params![id.as_str()])?;
        Ok(exists)
    }
}

// ---------------------------------------------------------------------------
// Lazy listing
// ---------------------------------------------------------------------------

/// Keyset-paginated iterator over cached conversations (members included).
pub struct ConversationPages<'a> {
    db: &'a CacheDatabase,
    page_size: u32,
    buffer: VecDeque<Conversation>,
    /// `(updated_at, id)` of the last row handed out.
    cursor: Option<(String, String)>,
    exhausted: bool,
}

impl<'a> ConversationPages<'a> {
    fn new(db: &'a CacheDatabase, page_size: u32) -> Self {
        Self {
            db,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    /// Override the number of rows read per query.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn fetch_page(&mut self) -> Result<()> {
        let conn = &self.db.conn;
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS}
             FROM conversations
             WHERE ?1 IS NULL OR updated_at < ?1 OR (updated_at = ?1 AND id > ?2)
             ORDER BY updated_at DESC, id ASC
             LIMIT ?3"
        );
        let mut stmt = conn.prepare_cached(&sql)?;

        let (after_ts, after_id) = match &self.cursor {
            Some((ts, id)) => (Some(ts.as_str()), Some(id.as_str())),
            None => (None, None),
        };

        let rows = stmt.query_map(params![after_ts, after_id, self.page_size], row_to_conversation)?;
        let mut page = Vec::new();
        for row in rows {
            page.push(row?);
        }

        if (page.len() as u32) < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some((format_timestamp(&last.updated_at), last.id.to_string()));
        }
        for mut conversation in page {
            conversation.members = load_members(conn, &conversation.id)?;
            self.buffer.push_back(conversation);
        }
        Ok(())
    }
}

impl Iterator for ConversationPages<'_> {
    type Item = Result<Conversation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Conversation scalars without members or messages.
pub(crate) fn load_conversation_row(conn: &Connection, id: &ConversationId) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
    let conversation = conn
        .prepare_cached(&sql)?
        .query_row(params![id.as_str()], row_to_conversation)
        .optional()?;
    Ok(conversation)
}

fn write_conversation_row(conn: &Connection, conversation: &Conversation) -> Result<()> {
    let preview_json = conversation.preview.as_ref().map(to_json).transpose()?;
    let other_user_json = conversation.other_user.as_ref().map(to_json).transpose()?;

    let sql = format!(
        "INSERT INTO conversations ({CONVERSATION_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
             kind = excluded.kind,
             name = excluded.name,
             description = excluded.description,
             image_url = excluded.image_url,
             creator_user_id = excluded.creator_user_id,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             max_members = excluded.max_members,
             preview_json = excluded.preview_json,
             other_user_json = excluded.other_user_json"
    );
    conn.prepare_cached(&sql)?.execute(params![
        conversation.id.as_str(),
        conversation.kind.as_str(),
        conversation.name,
        conversation.description,
        conversation.image_url,
        conversation.creator_user_id.as_ref().map(|u| u.as_str()),
        format_timestamp(&conversation.created_at),
        format_timestamp(&conversation.updated_at),
        conversation.max_members,
        preview_json,
        other_user_json,
    ])?;
    Ok(())
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let creator: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;
    let preview_json: Option<String> = row.get(9)?;
    let other_user_json: Option<String> = row.get(10)?;

    let kind = ConversationKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown conversation kind {kind_str:?}").into(),
        )
    })?;

    Ok(Conversation {
        id: ConversationId(id),
        kind,
        name: row.get(2)?,
        description: row.get(3)?,
        image_url: row.get(4)?,
        creator_user_id: creator.map(UserId),
        created_at: parse_timestamp(6, &created_str)?,
        updated_at: parse_timestamp(7, &updated_str)?,
        max_members: row.get(8)?,
        preview: preview_json.map(|j| parse_json(9, &j)).transpose()?,
        other_user: other_user_json.map(|j| parse_json(10, &j)).transpose()?,
        members: Vec::new(),
        messages: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use gmcache_shared::{LatestMessagePreview, Member, Message};

    use super::*;

    fn open() -> (CacheDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = CacheDatabase::open_in(dir.path()).unwrap();
        (db, dir)
    }

    fn group(id: &str, name: &str, message_ids: &[&str]) -> Conversation {
        let mut conv = Conversation::new(id, ConversationKind::Group, name);
        for mid in message_ids {
            conv.insert_message(Message::new(*mid, id, "u1", format!("msg {mid}")));
        }
        conv
    }

    fn message_ids(conv: &Conversation) -> Vec<&str> {
        conv.messages.keys().map(|k| k.as_str()).collect()
    }

    #[test]
    fn rename_scenario_merges_history() {
        let (mut db, _dir) = open();

        db.upsert_conversation(group("g1", "original", &["1", "2"])).unwrap();
        let outcome = db.upsert_conversation(group("g1", "renamed", &["2", "3"])).unwrap();
        assert_eq!(outcome.messages_added(), 1);

        let stored = db
            .get_conversation_with_messages(&"g1".into())
            .unwrap()
            .expect("cached");
        assert_eq!(stored.name, "renamed");
        assert_eq!(message_ids(&stored), ["1", "2", "3"]);
    }

    #[test]
    fn upsert_is_idempotent() {
        let (mut db, _dir) = open();
        let mut conv = group("g1", "g", &["1", "2"]);
        conv.members.push(Member::new("m1", "u1", "one"));
        conv.preview = Some(LatestMessagePreview {
            referenced_message_id: "2".into(),
            nickname: "one".into(),
            text: Some("msg 2".into()),
            image_url: None,
            attachments: Vec::new(),
            created_at: conv.updated_at,
        });

        db.upsert_conversation(conv.clone()).unwrap();
        let once = db.get_conversation_with_messages(&"g1".into()).unwrap();

        let second = db.upsert_conversation(conv).unwrap();
        let twice = db.get_conversation_with_messages(&"g1".into()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(second, UpsertOutcome::Merged(MergeReport::default()));
    }

    #[test]
    fn preview_id_does_not_collide_with_message_row() {
        let (mut db, _dir) = open();
        let mut conv = group("g1", "g", &["7"]);
        conv.preview = Some(LatestMessagePreview {
            referenced_message_id: "7".into(),
            nickname: "someone".into(),
            text: Some("preview text".into()),
            image_url: None,
            attachments: Vec::new(),
            created_at: conv.updated_at,
        });
        db.upsert_conversation(conv).unwrap();

        let stored = db.get_conversation_with_messages(&"g1".into()).unwrap().unwrap();
        assert_eq!(stored.messages.len(), 1);
        assert_eq!(stored.messages[&MessageId::from("7")].text.as_deref(), Some("msg 7"));
        assert_eq!(
            stored.preview.unwrap().text.as_deref(),
            Some("preview text")
        );
    }

    #[test]
    fn member_overwrite_by_id_is_persisted() {
        let (mut db, _dir) = open();

        let mut first = group("g1", "g", &[]);
        first.members.push(Member::new("5", "u5", "five"));
        first.members.push(Member::new("6", "u6", "six"));
        db.upsert_conversation(first).unwrap();

        let mut second = group("g1", "g", &[]);
        let mut muted = Member::new("5", "u5", "five");
        muted.muted = true;
        second.members.push(Member::new("9", "u9", "nine"));
        second.members.push(muted);
        db.upsert_conversation(second).unwrap();

        let stored = db.get_conversation(&"g1".into()).unwrap().unwrap();
        assert!(stored.member(&"5".into()).unwrap().muted);
        let order: Vec<&str> = stored.members.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, ["5", "6", "9"]);
    }

    #[test]
    fn chat_other_user_round_trips() {
        let (mut db, _dir) = open();
        let mut chat = Conversation::new("u1+u2", ConversationKind::Chat, "Alice");
        chat.other_user = Some(Member::new("u2", "u2", "Alice"));
        db.upsert_conversation(chat.clone()).unwrap();

        let stored = db.get_conversation(&"u1+u2".into()).unwrap().unwrap();
        assert_eq!(stored.kind, ConversationKind::Chat);
        assert_eq!(stored.other_user, chat.other_user);
    }

    #[test]
    fn get_conversation_does_not_load_messages() {
        let (mut db, _dir) = open();
        db.upsert_conversation(group("g1", "g", &["1"])).unwrap();

        let summary = db.get_conversation(&"g1".into()).unwrap().unwrap();
        assert!(summary.messages.is_empty());
        assert!(db.get_conversation(&"missing".into()).unwrap().is_none());
    }

    #[test]
    fn list_is_lazy_ordered_and_restartable() {
        let (mut db, _dir) = open();
        let base = Utc::now();
        for i in 0..7 {
            let mut conv = group(&format!("g{i}"), "g", &[]);
            conv.updated_at = base + Duration::seconds(i);
            db.upsert_conversation(conv).unwrap();
        }

        let ids: Vec<String> = db
            .list_conversations()
            .with_page_size(3)
            .map(|c| c.unwrap().id.0)
            .collect();
        assert_eq!(ids, ["g6", "g5", "g4", "g3", "g2", "g1", "g0"]);

        let first_two: Vec<String> = db
            .list_conversations()
            .take(2)
            .map(|c| c.unwrap().id.0)
            .collect();
        assert_eq!(first_two, ["g6", "g5"]);
    }

    #[test]
    fn delete_cascades() {
        let (mut db, _dir) = open();
        db.upsert_conversation(group("g1", "g", &["1", "2"])).unwrap();

        assert!(db.delete_conversation(&"g1".into()).unwrap());
        assert_eq!(db.message_count(&"g1".into()).unwrap(), 0);
        assert!(!db.delete_conversation(&"g1".into()).unwrap());
    }

    /// Makes any insert of message `id` fail mid-transaction.
    fn reject_message_insert(db: &CacheDatabase, id: &str) {
        db.conn
            .execute_batch(&format!(
                "CREATE TRIGGER reject_message BEFORE INSERT ON messages
                 WHEN NEW.id = '{id}'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;"
            ))
            .unwrap();
    }

    #[test]
    fn failed_upsert_leaves_no_partial_state() {
        let (mut db, _dir) = open();
        db.upsert_conversation(group("g1", "original", &["1", "2"])).unwrap();
        reject_message_insert(&db, "4");

        let mut incoming = group("g1", "renamed", &["2", "3", "4"]);
        incoming.members.push(Member::new("m9", "u9", "nine"));
        assert!(db.upsert_conversation(incoming).is_err());

        let stored = db.get_conversation_with_messages(&"g1".into()).unwrap().unwrap();
        assert_eq!(stored.name, "original");
        assert!(stored.members.is_empty());
        assert_eq!(message_ids(&stored), ["1", "2"]);
    }

    #[test]
    fn failed_first_insert_leaves_no_row() {
        let (mut db, _dir) = open();
        reject_message_insert(&db, "2");

        assert!(db.upsert_conversation(group("g1", "g", &["1", "2"])).is_err());
        assert!(!db.contains_conversation(&"g1".into()).unwrap());
        assert_eq!(db.total_message_count().unwrap(), 0);
    }

    #[test]
    fn misfiled_message_is_rejected_before_writing() {
        let (mut db, _dir) = open();
        db.upsert_conversation(group("g1", "g", &["2"])).unwrap();

        let mut incoming = group("g1", "g", &[]);
        incoming
            .messages
            .insert(MessageId::from("1"), Message::new("2", "g1", "u1", "misfiled"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            db.upsert_conversation(incoming)
        }));
        assert!(result.is_err());
        assert_eq!(db.message_count(&"g1".into()).unwrap(), 1);
        assert!(db.get_message(&"g1".into(), &"1".into()).unwrap().is_none());
    }

    #[test]
    #[should_panic(expected = "empty id")]
    fn malformed_conversation_panics() {
        let (mut db, _dir) = open();
        let _ = db.upsert_conversation(group("", "g", &[]));
    }
}
