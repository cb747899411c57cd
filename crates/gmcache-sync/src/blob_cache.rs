//! Avatar and image downloads with request deduplication.
//!
//! Lookups go store first, then network. Concurrent requests for the same
//! key share one fetch: the first caller leads, later callers park on a
//! oneshot until the leader publishes its result. If the leader is
//! cancelled, the oldest waiter still listening takes over with its own
//! fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;

use gmcache_shared::{BlobKey, RemoteFetchError};
use gmcache_store::{BlobStats, StoreError};

use crate::error::BlobCacheError;
use crate::store::{with_cache, CacheHandle};

type BlobResult = Result<Bytes, BlobCacheError>;
type Waiters = HashMap<String, Vec<oneshot::Sender<Handoff>>>;

/// What a waiting caller is told.
enum Handoff {
    Done(BlobResult),
    /// The previous leader went away; the receiver now owns the fetch.
    Lead(LeaderGuard),
}

enum Role {
    Lead(LeaderGuard),
    Wait(oneshot::Receiver<Handoff>),
}

#[derive(Clone)]
pub struct BlobCache {
    cache: CacheHandle,
    /// storage key -> callers waiting on the leader's fetch
    in_flight: Arc<Mutex<Waiters>>,
}

impl BlobCache {
    pub fn new(cache: CacheHandle) -> Self {
        Self {
            cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the cached payload for `key`, calling `fetch` on a miss.
    ///
    /// At most one `fetch` runs per key at a time; concurrent callers get
    /// the same bytes or the same error. Successful downloads are stored
    /// before anyone is answered. Failures are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &BlobKey, fetch: F) -> BlobResult
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, RemoteFetchError>> + Send,
    {
        let storage_key = key.storage_key();

        let guard = match self.join_or_lead(storage_key) {
            Role::Lead(guard) => guard,
            Role::Wait(rx) => match rx.await {
                Ok(Handoff::Done(result)) => return result,
                Ok(Handoff::Lead(guard)) => {
                    tracing::debug!(key = %guard.key, "taking over abandoned blob fetch");
                    guard
                }
                Err(_) => return Err(BlobCacheError::Abandoned),
            },
        };

        let result = self.load_or_fetch(key, fetch).await;
        guard.complete(&result);
        result
    }

    pub async fn stats(&self) -> Result<BlobStats, BlobCacheError> {
        Ok(with_cache(&self.cache, |db| db.blob_stats()).await?)
    }

    fn join_or_lead(&self, storage_key: String) -> Role {
        let mut in_flight = lock(&self.in_flight);
        match in_flight.get_mut(&storage_key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                tracing::trace!(key = %storage_key, "joining in-flight blob fetch");
                Role::Wait(rx)
            }
            None => {
                in_flight.insert(storage_key.clone(), Vec::new());
                Role::Lead(LeaderGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    key: storage_key,
                    armed: true,
                })
            }
        }
    }

    async fn load_or_fetch<F, Fut>(&self, key: &BlobKey, fetch: F) -> BlobResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, RemoteFetchError>>,
    {
        let lookup = key.clone();
        let cached = with_cache(&self.cache, move |db| match db.get_blob(&lookup) {
            // Corrupt rows are dropped and downloaded again.
            Err(StoreError::BlobIntegrity { .. }) => {
                db.remove_blob(&lookup)?;
                Ok(None)
            }
            other => other,
        })
        .await?;

        if let Some(data) = cached {
            return Ok(Bytes::from(data));
        }

        tracing::debug!(key = %key.storage_key(), "fetching blob");
        let bytes = Bytes::from(fetch().await?);

        let (target, payload) = (key.clone(), bytes.clone());
        if let Err(e) = with_cache(&self.cache, move |db| db.insert_blob(&target, &payload)).await {
            tracing::warn!(key = %key.storage_key(), error = %e, "failed to cache blob");
        }
        Ok(bytes)
    }
}

fn lock(in_flight: &Mutex<Waiters>) -> MutexGuard<'_, Waiters> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the in-flight entry of the caller doing the fetch.
///
/// Dropped without completing (the leader was cancelled), it passes the
/// entry to the oldest waiter whose receiver is still alive, or removes it
/// when nobody is left. A handoff that is never read is dropped with its
/// channel and moves on to the next waiter the same way.
struct LeaderGuard {
    in_flight: Arc<Mutex<Waiters>>,
    key: String,
    armed: bool,
}

impl LeaderGuard {
    fn complete(mut self, result: &BlobResult) {
        self.armed = false;
        let waiters = lock(&self.in_flight).remove(&self.key).unwrap_or_default();
        for tx in waiters {
            let _ = tx.send(Handoff::Done(result.clone()));
        }
    }

    fn hand_off(&self) {
        loop {
            let next = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get_mut(&self.key) {
                    Some(waiters) if !waiters.is_empty() => waiters.remove(0),
                    _ => {
                        in_flight.remove(&self.key);
                        tracing::debug!(key = %self.key, "blob fetch abandoned");
                        return;
                    }
                }
            };

            let successor = LeaderGuard {
                in_flight: Arc::clone(&self.in_flight),
                key: self.key.clone(),
                armed: true,
            };
            match next.send(Handoff::Lead(successor)) {
                Ok(()) => return,
                // That waiter is gone too; disarm so its drop does nothing.
                Err(Handoff::Lead(mut successor)) => successor.armed = false,
                Err(Handoff::Done(_)) => {}
            }
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if self.armed {
            self.hand_off();
        }
    }
}
