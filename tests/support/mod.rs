//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tenuto::cache::keys;
use tenuto::{CacheStore, HealthFlag, RemoteError, RemoteTier, StoreConfig};

/// In-memory stand-in for the networked tier.
///
/// Honors the full [`RemoteTier`] contract including per-entry expiry,
/// and can be switched into a failing mode to simulate an outage.
pub struct FakeRemoteTier {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    failing: AtomicBool,
}

impl FakeRemoteTier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        })
    }

    /// Make every subsequent operation fail, as a downed backend would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_up(&self) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RemoteError::Timeout(Duration::from_millis(1)))
        } else {
            Ok(())
        }
    }

    fn live_value(entry: &(String, Instant)) -> Option<String> {
        if Instant::now() < entry.1 {
            Some(entry.0.clone())
        } else {
            None
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RemoteTier for FakeRemoteTier {
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError> {
        self.check_up()?;
        Ok(self.lock().get(key).and_then(Self::live_value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RemoteError> {
        self.check_up()?;
        self.lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        self.check_up()?;
        self.lock().remove(key);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, RemoteError> {
        self.check_up()?;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        self.check_up()?;
        Ok(self.lock().get(key).and_then(Self::live_value).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), RemoteError> {
        self.check_up()?;
        if let Some(entry) = self.lock().get_mut(key) {
            entry.1 = Instant::now() + ttl;
        }
        Ok(())
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, RemoteError> {
        self.check_up()?;
        Ok(self
            .lock()
            .get(key)
            .and_then(|entry| entry.1.checked_duration_since(Instant::now())))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, RemoteError> {
        self.check_up()?;
        let mut entries = self.lock();
        if entries.get(key).and_then(Self::live_value).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, RemoteError> {
        self.check_up()?;
        let mut entries = self.lock();
        let matches = entries
            .get(key)
            .and_then(Self::live_value)
            .is_some_and(|value| value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.check_up()
    }
}

/// Build a cache store over the fake tier with its availability flag
/// pre-set, returning the flag for later outage simulation.
pub fn cache_store(
    remote: &Arc<FakeRemoteTier>,
    available: bool,
) -> (Arc<CacheStore>, Arc<HealthFlag>) {
    let health = Arc::new(HealthFlag::new());
    health.record(available);
    let store = Arc::new(CacheStore::new(
        Arc::clone(remote) as Arc<dyn RemoteTier>,
        Arc::clone(&health),
        StoreConfig {
            key_prefix: keys::CACHE_PREFIX,
            local_capacity: 1_024,
            name: "cache",
        },
    ));
    (store, health)
}

/// Build an idempotency-namespaced store over the fake tier.
pub fn idempotency_store(
    remote: &Arc<FakeRemoteTier>,
    available: bool,
) -> (Arc<CacheStore>, Arc<HealthFlag>) {
    let health = Arc::new(HealthFlag::new());
    health.record(available);
    let store = Arc::new(CacheStore::new(
        Arc::clone(remote) as Arc<dyn RemoteTier>,
        Arc::clone(&health),
        StoreConfig {
            key_prefix: keys::IDEMPOTENCY_PREFIX,
            local_capacity: 1_024,
            name: "idempotency",
        },
    ));
    (store, health)
}
