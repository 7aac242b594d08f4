//! Cache protection coordinator.
//!
//! Wraps the store and the distributed lock into the read path every
//! service uses:
//!
//! - **Penetration**: "not found" results are cached as a short-lived
//!   sentinel so absent keys cannot hammer the source of truth.
//! - **Breakdown**: a true miss reloads under a per-key lock with a
//!   double check, so a hot key expiring produces one load, not a herd.
//! - **Avalanche**: stored TTLs carry uniform jitter so entries written
//!   together do not expire together.
//! - **Stale-ahead refresh**: hot keys close to expiry are reloaded in
//!   the background while callers keep getting the still-valid value.
//!
//! The coordinator must never be the reason a request fails when the
//! loader would have succeeded: lock contention and cache trouble always
//! degrade to a direct load.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::BoxError;

use super::dlock::{DistributedLock, OwnerToken};
use super::keys;
use super::store::CacheStore;

const METRIC_LOADER_DEGRADED: &str = "tenuto_cache_loader_degraded_total";

/// Sentinel cached in place of a value when the loader found nothing.
/// JSON-encoded values can never collide with it (JSON strings are
/// quoted, JSON null is lowercase).
const NULL_SENTINEL: &str = "NULL";

/// Jitter fraction applied to stored TTLs: actual = base + uniform(0, 0.2·base).
const TTL_JITTER_FRACTION: f64 = 0.2;

const CONTENTION_WAIT_MIN_MS: u64 = 50;
const CONTENTION_WAIT_MAX_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ProtectionError {
    /// The externally supplied loader failed; propagated unchanged.
    #[error("loader failed: {0}")]
    Loader(#[source] BoxError),
    /// The loaded value could not be encoded for caching. This is a
    /// programming error in the value type and is never retried.
    #[error("cache value encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

enum Probe<T> {
    Hit(T),
    NullSentinel,
    Miss,
}

/// Protected read path over a [`CacheStore`] and its lock.
pub struct CacheProtectionCoordinator {
    store: Arc<CacheStore>,
    lock: DistributedLock,
    null_ttl: Duration,
    lock_ttl: Duration,
}

impl CacheProtectionCoordinator {
    pub fn new(store: Arc<CacheStore>, null_ttl: Duration, lock_ttl: Duration) -> Self {
        Self {
            lock: DistributedLock::new(Arc::clone(&store)),
            store,
            null_ttl,
            lock_ttl,
        }
    }

    /// Read through the cache, invoking `loader` at most when needed.
    ///
    /// Returns the cached or freshly loaded value, or `None` when the
    /// source of truth has no entry (in which case the absence itself is
    /// cached). Loader failures propagate; cache and lock trouble never
    /// do.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<T>, ProtectionError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>, BoxError>>,
    {
        match self.probe::<T>(key).await {
            Probe::Hit(value) => return Ok(Some(value)),
            Probe::NullSentinel => return Ok(None),
            Probe::Miss => {}
        }

        let owner = OwnerToken::next();
        let lock_name = keys::breakdown_lock_name(key);

        if self.lock.try_acquire(&lock_name, &owner, self.lock_ttl).await {
            let result = self.load_and_store(key, ttl, &loader).await;
            self.lock.release(&lock_name, &owner).await;
            return result;
        }

        // Another caller is loading this key. Give it a moment, re-check,
        // and if the cache is still cold load directly: a bounded
        // concurrency leak beats an unavailable read path.
        let wait = contention_wait();
        tokio::time::sleep(wait).await;

        match self.probe::<T>(key).await {
            Probe::Hit(value) => Ok(Some(value)),
            Probe::NullSentinel => Ok(None),
            Probe::Miss => {
                counter!(METRIC_LOADER_DEGRADED).increment(1);
                warn!(key, "Breakdown lock contended, loading directly");
                loader().await.map_err(ProtectionError::Loader)
            }
        }
    }

    /// As [`Self::get_or_load`], but when a cached value's remaining TTL
    /// has dropped below a quarter of `ttl`, a background reload is
    /// started and the still-valid value is returned immediately, so hot
    /// keys never observe a synchronous miss.
    pub async fn get_with_async_refresh<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<T>, ProtectionError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, BoxError>> + Send + 'static,
    {
        match self.probe::<T>(key).await {
            Probe::Hit(value) => {
                let remaining = self.store.remaining_ttl(key).await;
                if remaining.is_some_and(|left| left < ttl / 4) {
                    self.spawn_refresh(key.to_string(), ttl, loader);
                }
                Ok(Some(value))
            }
            Probe::NullSentinel => Ok(None),
            Probe::Miss => self.get_or_load(key, ttl, loader).await,
        }
    }

    async fn probe<T: DeserializeOwned>(&self, key: &str) -> Probe<T> {
        let Some(raw) = self.store.get(key).await else {
            return Probe::Miss;
        };
        if raw == NULL_SENTINEL {
            return Probe::NullSentinel;
        }
        match serde_json::from_str(&raw) {
            Ok(value) => Probe::Hit(value),
            Err(err) => {
                // Treat an undecodable entry as a miss so the next load
                // overwrites it.
                warn!(key, error = %err, "Discarding undecodable cache entry");
                Probe::Miss
            }
        }
    }

    async fn load_and_store<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: &F,
    ) -> Result<Option<T>, ProtectionError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>, BoxError>>,
    {
        // Double check under the lock: another waiter may have populated
        // the key while this caller raced for it.
        match self.probe::<T>(key).await {
            Probe::Hit(value) => return Ok(Some(value)),
            Probe::NullSentinel => return Ok(None),
            Probe::Miss => {}
        }

        match loader().await {
            Ok(Some(value)) => {
                let encoded = serde_json::to_string(&value)?;
                self.store.set(key, &encoded, jittered_ttl(ttl)).await;
                Ok(Some(value))
            }
            Ok(None) => {
                self.store.set(key, NULL_SENTINEL, self.null_ttl).await;
                Ok(None)
            }
            Err(err) => Err(ProtectionError::Loader(err)),
        }
    }

    fn spawn_refresh<T, F, Fut>(&self, key: String, ttl: Duration, loader: F)
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, BoxError>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match loader().await {
                Ok(Some(value)) => match serde_json::to_string(&value) {
                    Ok(encoded) => {
                        store.set(&key, &encoded, jittered_ttl(ttl)).await;
                        debug!(key = %key, "Background cache refresh complete");
                    }
                    Err(err) => {
                        warn!(key = %key, error = %err, "Background refresh produced unencodable value");
                    }
                },
                // A vanished value keeps serving stale until expiry; the
                // sentinel is only written on the miss path.
                Ok(None) => {}
                Err(err) => {
                    warn!(key = %key, error = %err, "Background cache refresh failed");
                }
            }
        });
    }
}

/// Apply avalanche jitter: actual TTL = base + uniform(0, 0.2·base).
fn jittered_ttl(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.0..TTL_JITTER_FRACTION);
    base + base.mul_f64(factor)
}

fn contention_wait() -> Duration {
    let millis = rand::thread_rng().gen_range(CONTENTION_WAIT_MIN_MS..CONTENTION_WAIT_MAX_MS);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_ttl_stays_within_bounds() {
        let base = Duration::from_secs(3_600);
        for _ in 0..1_000 {
            let ttl = jittered_ttl(base);
            assert!(ttl >= base);
            assert!(ttl <= Duration::from_secs(4_320));
        }
    }

    #[test]
    fn contention_wait_stays_within_bounds() {
        for _ in 0..1_000 {
            let wait = contention_wait();
            assert!(wait >= Duration::from_millis(50));
            assert!(wait < Duration::from_millis(100));
        }
    }
}
