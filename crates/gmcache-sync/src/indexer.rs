//! Per-conversation indexing progress.
//!
//! A watermark `W` means every message of the conversation with an id at or
//! before `W` is in the cache. It only ever moves toward newer ids; the one
//! way back is [`Indexer::invalidate`] (or evicting the conversation).

use gmcache_shared::{ConversationId, MessageId};
use gmcache_store::WatermarkAdvance;

use crate::error::Result;
use crate::store::{with_cache, CacheHandle};

#[derive(Clone)]
pub struct Indexer {
    cache: CacheHandle,
}

impl Indexer {
    pub fn new(cache: CacheHandle) -> Self {
        Self { cache }
    }

    /// `None` when nothing has been indexed yet.
    pub async fn get_watermark(&self, conversation_id: ConversationId) -> Result<Option<MessageId>> {
        with_cache(&self.cache, move |db| db.get_watermark(&conversation_id)).await
    }

    /// Move the watermark to `new` if it is strictly newer.
    ///
    /// An older or equal id leaves the stored value alone and is reported as
    /// [`WatermarkAdvance::Unchanged`]. Contiguity of the cached history is
    /// the caller's responsibility.
    pub async fn advance_watermark(
        &self,
        conversation_id: ConversationId,
        new: MessageId,
    ) -> Result<WatermarkAdvance> {
        let (id, requested) = (conversation_id.clone(), new.clone());
        let outcome =
            with_cache(&self.cache, move |db| db.set_watermark_if_newer(&conversation_id, &new)).await?;

        match &outcome {
            WatermarkAdvance::Advanced { previous } => tracing::debug!(
                conversation = %id,
                previous = ?previous.as_ref().map(|p| p.as_str()),
                watermark = %requested,
                "watermark advanced"
            ),
            WatermarkAdvance::Unchanged { current } => tracing::debug!(
                conversation = %id,
                current = %current,
                requested = %requested,
                "ignoring watermark that does not advance"
            ),
        }
        Ok(outcome)
    }

    /// Forget indexing progress so the next backfill sweeps the whole
    /// history again.
    pub async fn invalidate(&self, conversation_id: ConversationId) -> Result<bool> {
        let id = conversation_id.clone();
        let cleared = with_cache(&self.cache, move |db| db.clear_watermark(&conversation_id)).await?;
        if cleared {
            tracing::info!(conversation = %id, "watermark invalidated");
        }
        Ok(cleared)
    }
}
