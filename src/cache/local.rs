//! In-process fallback tier.
//!
//! A bounded LRU map with per-entry absolute expiry. The local tier is
//! never authoritative across the fleet: it serves reads only while the
//! networked tier is marked unavailable, and shadows writes for
//! read-after-write within the owning process. Capacity is fixed at
//! construction; hits, misses, and evictions are observable as metrics.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::counter;

use super::guards::{rw_read, rw_write};

const SOURCE: &str = "cache::local";

const METRIC_LOCAL_HIT: &str = "tenuto_cache_local_hit_total";
const METRIC_LOCAL_MISS: &str = "tenuto_cache_local_miss_total";
const METRIC_LOCAL_EVICT: &str = "tenuto_cache_local_evict_total";

struct LocalEntry {
    value: String,
    expires_at: Instant,
}

impl LocalEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Bounded in-process key/value tier with independent TTL bookkeeping.
pub struct LocalTier {
    entries: RwLock<LruCache<String, LocalEntry>>,
    /// Metric label distinguishing stores sharing this tier type.
    name: &'static str,
}

impl LocalTier {
    /// Create a tier holding at most `capacity` entries (clamped to 1).
    pub fn new(capacity: usize, name: &'static str) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            name,
        }
    }

    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        let evicted = entries.push(key.to_string(), LocalEntry::new(value.to_string(), ttl));
        if let Some((evicted_key, _)) = evicted {
            if evicted_key != key {
                counter!(METRIC_LOCAL_EVICT, "store" => self.name).increment(1);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                counter!(METRIC_LOCAL_HIT, "store" => self.name).increment(1);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.pop(key);
                counter!(METRIC_LOCAL_MISS, "store" => self.name).increment(1);
                None
            }
            None => {
                counter!(METRIC_LOCAL_MISS, "store" => self.name).increment(1);
                None
            }
        }
    }

    pub fn delete(&self, key: &str) {
        rw_write(&self.entries, SOURCE, "delete").pop(key);
    }

    pub fn delete_by_prefix(&self, prefix: &str) -> u64 {
        let mut entries = rw_write(&self.entries, SOURCE, "delete_by_prefix");
        let matching: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            entries.pop(key);
        }
        matching.len() as u64
    }

    pub fn exists(&self, key: &str) -> bool {
        let entries = rw_read(&self.entries, SOURCE, "exists");
        entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    pub fn expire(&self, key: &str, ttl: Duration) {
        let mut entries = rw_write(&self.entries, SOURCE, "expire");
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Instant::now() + ttl;
        }
    }

    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let entries = rw_read(&self.entries, SOURCE, "remaining_ttl");
        entries.peek(key).and_then(|entry| {
            entry
                .expires_at
                .checked_duration_since(Instant::now())
        })
    }

    /// Insert only when no live entry exists for the key.
    ///
    /// An expired entry counts as absent. Returns whether the insert won.
    pub fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "set_if_absent");
        if entries.peek(key).is_some_and(|entry| !entry.is_expired()) {
            return false;
        }
        let evicted = entries.push(key.to_string(), LocalEntry::new(value.to_string(), ttl));
        if let Some((evicted_key, _)) = evicted {
            if evicted_key != key {
                counter!(METRIC_LOCAL_EVICT, "store" => self.name).increment(1);
            }
        }
        true
    }

    /// Delete only when the live entry's value matches `expected`.
    ///
    /// Returns whether a delete happened.
    pub fn compare_and_delete(&self, key: &str, expected: &str) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "compare_and_delete");
        let matches = entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired() && entry.value == expected);
        if matches {
            entries.pop(key);
        }
        matches
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }
}
