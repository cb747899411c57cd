//! # gmcache-sync
//!
//! Async service layer over [`gmcache_store`]. Each service is built from a
//! shared [`CacheHandle`] and passed explicitly to whatever needs it:
//!
//! - [`ConversationStore`]: upserts and cache queries.
//! - [`Indexer`]: per-conversation watermarks.
//! - [`BlobCache`]: avatar and image downloads, deduplicated per key.
//! - [`HistorySync`]: conversation refresh and incremental backfill from a
//!   [`RemoteConversationSource`].

pub mod blob_cache;
pub mod config;
pub mod error;
pub mod history;
pub mod indexer;
pub mod logging;
pub mod remote;
pub mod store;

pub use blob_cache::BlobCache;
pub use config::SyncConfig;
pub use error::{BlobCacheError, Result, SyncError};
pub use history::{BackfillReport, HistorySync, RetryPolicy, SyncSummary};
pub use indexer::Indexer;
pub use remote::RemoteConversationSource;
pub use store::{cache_handle, CacheHandle, CacheTotals, ConversationStore};
