//! Async front for the cache database.
//!
//! The connection sits behind a blocking mutex and every call runs on the
//! blocking pool, so merges and commits never stall the runtime. The mutex
//! also serializes writers: one transaction at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gmcache_shared::{Conversation, ConversationId, Message, MessageId};
use gmcache_store::{CacheDatabase, UpsertOutcome};

use crate::error::{Result, SyncError};

/// Shared handle to the single cache connection.
pub type CacheHandle = Arc<Mutex<CacheDatabase>>;

pub fn cache_handle(db: CacheDatabase) -> CacheHandle {
    Arc::new(Mutex::new(db))
}

/// Lock the cache. A panic inside a transaction rolls it back, so a
/// poisoned lock still guards a consistent database.
pub(crate) fn lock(handle: &CacheHandle) -> MutexGuard<'_, CacheDatabase> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `f` against the cache on the blocking pool.
///
/// Panics raised inside `f` (malformed input reaching the merge engine) are
/// resumed on the calling task.
pub(crate) async fn with_cache<T, F>(handle: &CacheHandle, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut CacheDatabase) -> gmcache_store::Result<T> + Send + 'static,
{
    let handle = Arc::clone(handle);
    let joined = tokio::task::spawn_blocking(move || {
        let mut db = lock(&handle);
        f(&mut db)
    })
    .await;

    match joined {
        Ok(result) => Ok(result?),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(SyncError::Join(e.to_string())),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheTotals {
    pub conversations: u64,
    pub messages: u64,
}

/// Query/update interface over the cached conversations.
#[derive(Clone)]
pub struct ConversationStore {
    cache: CacheHandle,
}

impl ConversationStore {
    pub fn new(cache: CacheHandle) -> Self {
        Self { cache }
    }

    pub fn handle(&self) -> &CacheHandle {
        &self.cache
    }

    /// Insert or merge a conversation in one transaction.
    ///
    /// # Panics
    ///
    /// If `conversation` is malformed (empty ids).
    pub async fn upsert_conversation(&self, conversation: Conversation) -> Result<UpsertOutcome> {
        let id = conversation.id.clone();
        let outcome = with_cache(&self.cache, move |db| db.upsert_conversation(conversation)).await?;
        tracing::debug!(
            conversation = %id,
            added = outcome.messages_added(),
            "conversation upserted"
        );
        Ok(outcome)
    }

    pub async fn upsert_message_batch(
        &self,
        conversation_id: ConversationId,
        messages: Vec<Message>,
    ) -> Result<usize> {
        with_cache(&self.cache, move |db| db.upsert_message_batch(&conversation_id, messages)).await
    }

    pub async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        with_cache(&self.cache, move |db| db.get_conversation(&id)).await
    }

    pub async fn get_conversation_with_messages(&self, id: ConversationId) -> Result<Option<Conversation>> {
        with_cache(&self.cache, move |db| db.get_conversation_with_messages(&id)).await
    }

    /// Every cached conversation, most recently updated first. Reads only
    /// the local cache.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        with_cache(&self.cache, |db| db.list_conversations().collect()).await
    }

    pub async fn messages_before(
        &self,
        id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        with_cache(&self.cache, move |db| db.messages_before(&id, before.as_ref(), limit)).await
    }

    pub async fn message_count(&self, id: ConversationId) -> Result<u64> {
        with_cache(&self.cache, move |db| db.message_count(&id)).await
    }

    pub async fn totals(&self) -> Result<CacheTotals> {
        with_cache(&self.cache, |db| {
            Ok(CacheTotals {
                conversations: db.conversation_count()?,
                messages: db.total_message_count()?,
            })
        })
        .await
    }

    pub async fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        with_cache(&self.cache, move |db| db.delete_conversation(&id)).await
    }

    /// Fold the write-ahead log into the database file.
    pub async fn save_all(&self) -> Result<()> {
        with_cache(&self.cache, |db| db.save_all()).await
    }
}

#[cfg(test)]
mod tests {
    use gmcache_shared::ConversationKind;

    use super::*;

    fn open() -> (ConversationStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = CacheDatabase::open_in(dir.path()).unwrap();
        (ConversationStore::new(cache_handle(db)), dir)
    }

    fn group(name: &str, ids: &[&str]) -> Conversation {
        let mut conv = Conversation::new("g1", ConversationKind::Group, name);
        for id in ids {
            conv.insert_message(Message::new(*id, "g1", "u1", "hi"));
        }
        conv
    }

    #[tokio::test]
    async fn rename_keeps_cached_history() {
        let (store, _dir) = open();

        store.upsert_conversation(group("original", &["1", "2"])).await.unwrap();
        store.upsert_conversation(group("renamed", &["2", "3"])).await.unwrap();

        let stored = store
            .get_conversation_with_messages("g1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.name, "renamed");
        let ids: Vec<&str> = stored.messages.keys().map(|k| k.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        store.save_all().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_batches_are_serialized() {
        let (store, _dir) = open();
        store.upsert_conversation(group("g", &[])).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let batch = (0..10)
                        .map(|j| Message::new((i * 10 + j).to_string(), "g1", "u1", "x"))
                        .collect();
                    store.upsert_message_batch("g1".into(), batch).await.unwrap()
                })
            })
            .collect();

        let mut added = 0;
        for task in tasks {
            added += task.await.unwrap();
        }
        assert_eq!(added, 80);

        let newest = store.messages_before("g1".into(), None, 1).await.unwrap();
        assert_eq!(newest[0].id.as_str(), "79");
    }

    #[tokio::test]
    async fn list_reads_only_the_cache() {
        let (store, _dir) = open();
        assert!(store.list_conversations().await.unwrap().is_empty());

        store.upsert_conversation(group("g", &["1"])).await.unwrap();
        let listed = store.list_conversations().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].messages.is_empty());

        let totals = store.totals().await.unwrap();
        assert_eq!(
            totals,
            CacheTotals {
                conversations: 1,
                messages: 1
            }
        );
    }

    #[tokio::test]
    #[should_panic(expected = "empty id")]
    async fn malformed_input_panics_on_caller() {
        let (store, _dir) = open();
        let mut conv = group("g", &[]);
        conv.messages.insert(
            MessageId::from(""),
            Message::new("", "g1", "u1", "broken"),
        );
        let _ = store.upsert_conversation(conv).await;
    }
}
