use thiserror::Error;

use gmcache_shared::RemoteFetchError;
use gmcache_store::StoreError;

/// Errors surfaced by the async service layer.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("remote fetch failed: {0}")]
    Remote(#[from] RemoteFetchError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The remote kept returning pages that were not older than the last
    /// one, so a history sweep could not finish.
    #[error("history of {0} did not advance while paging")]
    NoProgress(String),

    /// A blocking store task was cancelled before it finished.
    #[error("store task did not complete: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Outcome of a failed [`BlobCache::get_or_fetch`](crate::BlobCache::get_or_fetch).
///
/// `Clone` because one failure is delivered to every caller waiting on the
/// same key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobCacheError {
    #[error("blob fetch failed: {0}")]
    Fetch(#[from] RemoteFetchError),

    #[error("blob store failed: {0}")]
    Store(String),

    /// The fetch was dropped with nobody left to take it over.
    /// Retrying starts a fresh fetch.
    #[error("blob fetch was abandoned")]
    Abandoned,
}

impl From<SyncError> for BlobCacheError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Remote(remote) => Self::Fetch(remote),
            other => Self::Store(other.to_string()),
        }
    }
}
