//! Cross-process mutual exclusion on top of the store's atomic primitives.
//!
//! Acquire is `set_if_absent`; release is `compare_and_delete` guarded by
//! the owner token, so a lock that expired and was re-acquired elsewhere
//! is never deleted by a late release. When the networked tier is down
//! the lock degrades to process-local exclusion — a documented
//! best-effort guarantee during outages, not an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use once_cell::sync::Lazy;
use tracing::debug;
use uuid::Uuid;

use super::keys;
use super::store::CacheStore;

const METRIC_LOCK_DEGRADED: &str = "tenuto_lock_degraded_total";

static PROCESS_ID: Lazy<Uuid> = Lazy::new(Uuid::new_v4);
static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Opaque lock owner identity, unique per acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// Mint a fresh token: process identity plus a monotonic counter.
    pub fn next() -> Self {
        let seq = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}:{}", *PROCESS_ID, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Distributed try-lock over the shared cache store.
pub struct DistributedLock {
    store: Arc<CacheStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Attempt to take the lock named `name` for `ttl`.
    ///
    /// Returns whether this owner now holds the lock. The TTL bounds how
    /// long a crashed holder can block others.
    pub async fn try_acquire(&self, name: &str, owner: &OwnerToken, ttl: Duration) -> bool {
        let degraded = !self.store.is_remote_available();
        let acquired = self
            .store
            .set_if_absent(&keys::lock_key(name), owner.as_str(), ttl)
            .await;
        if acquired && degraded {
            counter!(METRIC_LOCK_DEGRADED).increment(1);
            debug!(
                lock = name,
                "Lock acquired against local tier only; exclusion is process-local"
            );
        }
        acquired
    }

    /// Release the lock named `name` if `owner` still holds it.
    ///
    /// A no-op when the lock expired or was re-acquired by another owner.
    pub async fn release(&self, name: &str, owner: &OwnerToken) {
        let released = self
            .store
            .compare_and_delete(&keys::lock_key(name), owner.as_str())
            .await;
        if !released {
            debug!(
                lock = name,
                "Release skipped: lock expired or held by another owner"
            );
        }
    }
}
