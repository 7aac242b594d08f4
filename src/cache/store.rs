//! Two-tier cache store.
//!
//! Every operation targets the networked tier first and degrades to the
//! local tier on failure. Degradation is silent toward the caller: the
//! fallback is counted by a metric and logged, never surfaced. Callers
//! therefore see a value or absence, not backend outages.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::warn;

use super::health::HealthFlag;
use super::local::LocalTier;
use super::remote::{RemoteError, RemoteTier};

const METRIC_REMOTE_FALLBACK: &str = "tenuto_cache_remote_fallback_total";

/// Construction parameters for a [`CacheStore`].
pub struct StoreConfig {
    /// Namespace prepended to every key.
    pub key_prefix: &'static str,
    /// Capacity of the in-process fallback tier.
    pub local_capacity: usize,
    /// Metric label identifying this store.
    pub name: &'static str,
}

/// Two-tier key/value store shared by the cache coordinator, the
/// distributed lock, and the idempotency guard.
///
/// Writes always land in the local tier as well, as a read-after-write
/// optimization for the owning process. Reads prefer the local tier only
/// while the networked tier is marked unavailable.
pub struct CacheStore {
    remote: Arc<dyn RemoteTier>,
    local: LocalTier,
    health: Arc<HealthFlag>,
    key_prefix: &'static str,
    name: &'static str,
}

impl CacheStore {
    pub fn new(remote: Arc<dyn RemoteTier>, health: Arc<HealthFlag>, config: StoreConfig) -> Self {
        Self {
            remote,
            local: LocalTier::new(config.local_capacity, config.name),
            health,
            key_prefix: config.key_prefix,
            name: config.name,
        }
    }

    /// Whether the networked tier is currently marked available.
    pub fn is_remote_available(&self) -> bool {
        self.health.is_available()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn note_fallback(&self, op: &'static str, err: &RemoteError) {
        counter!(METRIC_REMOTE_FALLBACK, "store" => self.name, "op" => op).increment(1);
        warn!(
            store = self.name,
            op,
            error = %err,
            "Networked tier failed, falling back to local tier"
        );
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let full_key = self.full_key(key);
        if self.health.is_available() {
            if let Err(err) = self.remote.set(&full_key, value, ttl).await {
                self.note_fallback("set", &err);
            }
        }
        self.local.set(&full_key, value, ttl);
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let full_key = self.full_key(key);
        if self.health.is_available() {
            match self.remote.get(&full_key).await {
                Ok(value) => return value,
                Err(err) => self.note_fallback("get", &err),
            }
        }
        self.local.get(&full_key)
    }

    pub async fn delete(&self, key: &str) {
        let full_key = self.full_key(key);
        if self.health.is_available() {
            if let Err(err) = self.remote.delete(&full_key).await {
                self.note_fallback("delete", &err);
            }
        }
        self.local.delete(&full_key);
    }

    pub async fn delete_by_prefix(&self, prefix: &str) {
        let full_prefix = self.full_key(prefix);
        if self.health.is_available() {
            if let Err(err) = self.remote.delete_by_prefix(&full_prefix).await {
                self.note_fallback("delete_by_prefix", &err);
            }
        }
        self.local.delete_by_prefix(&full_prefix);
    }

    pub async fn exists(&self, key: &str) -> bool {
        let full_key = self.full_key(key);
        if self.health.is_available() {
            match self.remote.exists(&full_key).await {
                Ok(found) => return found,
                Err(err) => self.note_fallback("exists", &err),
            }
        }
        self.local.exists(&full_key)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) {
        let full_key = self.full_key(key);
        if self.health.is_available() {
            if let Err(err) = self.remote.expire(&full_key, ttl).await {
                self.note_fallback("expire", &err);
            }
        }
        self.local.expire(&full_key, ttl);
    }

    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let full_key = self.full_key(key);
        if self.health.is_available() {
            match self.remote.remaining_ttl(&full_key).await {
                Ok(ttl) => return ttl,
                Err(err) => self.note_fallback("remaining_ttl", &err),
            }
        }
        self.local.remaining_ttl(&full_key)
    }

    /// Atomic insert-if-absent, the acquire primitive of the lock.
    ///
    /// When the networked tier wins the insert, the entry is shadowed
    /// locally; when the tier is down, exclusion degrades to this process
    /// only.
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let full_key = self.full_key(key);
        if self.health.is_available() {
            match self.remote.set_if_absent(&full_key, value, ttl).await {
                Ok(inserted) => {
                    if inserted {
                        self.local.set(&full_key, value, ttl);
                    }
                    return inserted;
                }
                Err(err) => self.note_fallback("set_if_absent", &err),
            }
        }
        self.local.set_if_absent(&full_key, value, ttl)
    }

    /// Atomic delete-if-value-matches, the release primitive of the lock.
    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> bool {
        let full_key = self.full_key(key);
        if self.health.is_available() {
            match self.remote.compare_and_delete(&full_key, expected).await {
                Ok(deleted) => {
                    if deleted {
                        self.local.compare_and_delete(&full_key, expected);
                    }
                    return deleted;
                }
                Err(err) => self.note_fallback("compare_and_delete", &err),
            }
        }
        self.local.compare_and_delete(&full_key, expected)
    }
}
