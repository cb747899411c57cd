//! Conversation refresh and incremental history backfill.
//!
//! A backfill pages backward from the newest message until it reaches the
//! stored watermark (or the start of the history), upserting every page as
//! it arrives. The watermark moves only once the sweep is complete, so a
//! failure part-way leaves it where it was and the next run repeats the
//! sweep. Re-upserting pages is harmless.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use gmcache_shared::constants::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_INITIAL_MS, DEFAULT_RETRY_MAX_MS};
use gmcache_shared::{ConversationId, MessageId, RemoteFetchError};

use crate::error::{Result, SyncError};
use crate::indexer::Indexer;
use crate::remote::RemoteConversationSource;
use crate::store::{CacheHandle, ConversationStore};

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Exponential backoff with jitter for transient remote failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_RETRY_INITIAL_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): half the capped
    /// exponential step plus up to another half of random jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let step = self
            .initial_delay
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max_delay);
        let half = step / 2;
        let jitter_ms = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(jitter_ms)
    }

    /// Run `op`, retrying transient errors until attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> std::result::Result<T, RemoteFetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RemoteFetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt - 1);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "remote call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Non-empty pages received.
    pub pages: usize,
    pub messages_fetched: usize,
    /// Messages that were not cached before this sweep.
    pub messages_added: usize,
    /// Watermark after the sweep.
    pub watermark: Option<MessageId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub conversations: usize,
    pub backfilled: usize,
    pub failed: Vec<ConversationId>,
}

pub struct HistorySync<R: ?Sized> {
    remote: Arc<R>,
    store: ConversationStore,
    indexer: Indexer,
    retry: RetryPolicy,
}

impl<R: RemoteConversationSource + ?Sized> HistorySync<R> {
    pub fn new(remote: Arc<R>, cache: CacheHandle) -> Self {
        Self {
            remote,
            store: ConversationStore::new(Arc::clone(&cache)),
            indexer: Indexer::new(cache),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    /// Fetch the conversation list and upsert each entry. Returns how many
    /// conversations were refreshed.
    pub async fn refresh_conversations(&self) -> Result<usize> {
        let conversations = self
            .retry
            .run("fetch_conversations", || self.remote.fetch_conversations())
            .await?;

        let count = conversations.len();
        for conversation in conversations {
            self.store.upsert_conversation(conversation).await?;
        }

        tracing::info!(count, "refreshed conversations");
        Ok(count)
    }

    /// Bring a cached conversation's history up to date.
    ///
    /// The conversation must already be cached (see
    /// [`refresh_conversations`](Self::refresh_conversations)).
    pub async fn backfill(&self, conversation_id: &ConversationId) -> Result<BackfillReport> {
        let watermark = self.indexer.get_watermark(conversation_id.clone()).await?;
        let mut report = BackfillReport::default();
        let mut before: Option<MessageId> = None;
        let mut newest: Option<MessageId> = None;

        loop {
            let page = self
                .retry
                .run("fetch_message_page", || {
                    self.remote.fetch_message_page(conversation_id, before.as_ref())
                })
                .await?;

            let (Some(oldest), Some(page_newest)) = (
                page.iter().map(|m| &m.id).min().cloned(),
                page.iter().map(|m| &m.id).max().cloned(),
            ) else {
                // Start of history.
                break;
            };

            if before.as_ref().is_some_and(|b| oldest >= *b) {
                return Err(SyncError::NoProgress(conversation_id.to_string()));
            }

            report.pages += 1;
            report.messages_fetched += page.len();
            report.messages_added += self
                .store
                .upsert_message_batch(conversation_id.clone(), page)
                .await?;

            if newest.as_ref().map_or(true, |n| page_newest > *n) {
                newest = Some(page_newest);
            }
            if watermark.as_ref().is_some_and(|w| oldest <= *w) {
                break;
            }
            before = Some(oldest);
        }

        report.watermark = match newest {
            Some(newest) => {
                self.indexer
                    .advance_watermark(conversation_id.clone(), newest.clone())
                    .await?;
                self.indexer.get_watermark(conversation_id.clone()).await?
            }
            None => watermark,
        };

        tracing::info!(
            conversation = %conversation_id,
            pages = report.pages,
            added = report.messages_added,
            watermark = ?report.watermark.as_ref().map(|w| w.as_str()),
            "backfill complete"
        );
        Ok(report)
    }

    /// Refresh the conversation list, then backfill every cached
    /// conversation. A failed backfill is logged and skipped.
    pub async fn sync_all(&self) -> Result<SyncSummary> {
        self.refresh_conversations().await?;

        let mut summary = SyncSummary::default();
        for conversation in self.store.list_conversations().await? {
            summary.conversations += 1;
            match self.backfill(&conversation.id).await {
                Ok(_) => summary.backfilled += 1,
                Err(e) => {
                    tracing::warn!(conversation = %conversation.id, error = %e, "backfill failed");
                    summary.failed.push(conversation.id);
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use gmcache_shared::{Conversation, ConversationKind};
    use gmcache_store::CacheDatabase;

    use super::*;
    use crate::remote::testing::FakeRemote;
    use crate::store::cache_handle;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn group() -> Conversation {
        Conversation::new("g1", ConversationKind::Group, "Group")
    }

    fn open() -> (CacheHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = CacheDatabase::open_in(dir.path()).unwrap();
        (cache_handle(db), dir)
    }

    async fn synced(remote: FakeRemote, cache: &CacheHandle) -> (HistorySync<FakeRemote>, Arc<FakeRemote>) {
        let remote = Arc::new(remote);
        let sync = HistorySync::new(Arc::clone(&remote), Arc::clone(cache)).with_retry_policy(fast_retry());
        sync.refresh_conversations().await.unwrap();
        (sync, remote)
    }

    fn range(from: u32, to: u32) -> Vec<u32> {
        (from..=to).collect()
    }

    #[test]
    fn backoff_stays_within_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        };
        for retry in 0..10 {
            let delay = policy.backoff(retry);
            assert!(delay <= Duration::from_millis(400), "{delay:?}");
        }
        assert!(policy.backoff(0) >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn first_backfill_sweeps_whole_history() {
        let (cache, _dir) = open();
        let (sync, remote) = synced(FakeRemote::with_history(group(), &range(1, 25), 10), &cache).await;
        let g1 = ConversationId::from("g1");

        let report = sync.backfill(&g1).await.unwrap();

        assert_eq!(report.pages, 3);
        assert_eq!(report.messages_added, 25);
        assert_eq!(report.watermark, Some("25".into()));
        // Three full-or-partial pages and the empty one that ends the sweep.
        assert_eq!(remote.page_calls(), 4);
    }

    #[tokio::test]
    async fn later_backfill_stops_at_watermark() {
        let (cache, _dir) = open();
        let g1 = ConversationId::from("g1");
        let (first, _) = synced(FakeRemote::with_history(group(), &range(1, 25), 10), &cache).await;
        first.backfill(&g1).await.unwrap();

        let (second, remote) = synced(FakeRemote::with_history(group(), &range(1, 30), 10), &cache).await;
        let report = second.backfill(&g1).await.unwrap();

        assert_eq!(remote.page_calls(), 1);
        assert_eq!(report.messages_fetched, 10);
        assert_eq!(report.messages_added, 5);
        assert_eq!(report.watermark, Some("30".into()));
    }

    #[tokio::test]
    async fn failed_page_leaves_watermark_untouched() {
        let (cache, _dir) = open();
        let g1 = ConversationId::from("g1");

        let mut broken = FakeRemote::with_history(group(), &range(1, 25), 10);
        broken.fail_before = Some("16".into());
        let (sync, _) = synced(broken, &cache).await;

        let err = sync.backfill(&g1).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteFetchError::Network(_))));
        assert_eq!(sync.indexer().get_watermark(g1.clone()).await.unwrap(), None);

        // The page that did arrive is cached; the rerun completes the sweep.
        let (retry, _) = synced(FakeRemote::with_history(group(), &range(1, 25), 10), &cache).await;
        let report = retry.backfill(&g1).await.unwrap();
        assert_eq!(report.messages_added, 15);
        assert_eq!(report.watermark, Some("25".into()));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let (cache, _dir) = open();
        let (sync, remote) = synced(FakeRemote::with_history(group(), &range(1, 5), 10), &cache).await;
        remote.push_failure(RemoteFetchError::Timeout);

        let report = sync.backfill(&"g1".into()).await.unwrap();
        assert_eq!(report.messages_added, 5);
        // One failure, one full page, one empty page.
        assert_eq!(remote.page_calls(), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let (cache, _dir) = open();
        let (sync, remote) = synced(FakeRemote::with_history(group(), &range(1, 5), 10), &cache).await;
        remote.push_failure(RemoteFetchError::Api {
            status: 401,
            message: "unauthorized".into(),
        });

        assert!(sync.backfill(&"g1".into()).await.is_err());
        assert_eq!(remote.page_calls(), 1);
    }

    #[tokio::test]
    async fn backfill_of_uncached_conversation_fails() {
        let (cache, _dir) = open();
        let remote = Arc::new(FakeRemote::with_history(group(), &range(1, 3), 10));
        let sync = HistorySync::new(remote, cache).with_retry_policy(fast_retry());

        let err = sync.backfill(&"g1".into()).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(gmcache_store::StoreError::NotFound)));
    }

    #[tokio::test]
    async fn sync_all_refreshes_and_backfills() {
        let (cache, _dir) = open();
        let remote = Arc::new(FakeRemote::with_history(group(), &range(1, 12), 5));
        let sync = HistorySync::new(remote, Arc::clone(&cache)).with_retry_policy(fast_retry());

        let summary = sync.sync_all().await.unwrap();
        assert_eq!(summary.conversations, 1);
        assert_eq!(summary.backfilled, 1);
        assert!(summary.failed.is_empty());

        let stored = sync
            .store()
            .get_conversation_with_messages("g1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.messages.len(), 12);
    }
}
