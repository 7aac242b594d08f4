//! Cache protection properties: penetration, breakdown single-flight,
//! lock mutual exclusion, tier fallback, and the stale-ahead refresh
//! flow.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tenuto::cache::keys;
use tenuto::{BoxError, CacheProtectionCoordinator, DistributedLock, OwnerToken};

use support::{FakeRemoteTier, cache_store};

const NULL_TTL: Duration = Duration::from_secs(300);
const LOCK_TTL: Duration = Duration::from_secs(10);
const BASE_TTL: Duration = Duration::from_secs(60);

fn coordinator(remote: &Arc<FakeRemoteTier>) -> Arc<CacheProtectionCoordinator> {
    let (store, _) = cache_store(remote, true);
    Arc::new(CacheProtectionCoordinator::new(store, NULL_TTL, LOCK_TTL))
}

#[tokio::test]
async fn missing_key_invokes_loader_once_across_concurrent_callers() {
    let remote = FakeRemoteTier::new();
    let coordinator = coordinator(&remote);
    let loader_calls = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        let loader_calls = Arc::clone(&loader_calls);
        tasks.push(tokio::spawn(async move {
            coordinator
                .get_or_load::<String, _, _>("article:missing", BASE_TTL, move || {
                    let loader_calls = Arc::clone(&loader_calls);
                    async move {
                        loader_calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, BoxError>(None)
                    }
                })
                .await
        }));
    }

    for task in tasks {
        let result = task.await.expect("task").expect("get_or_load");
        assert!(result.is_none());
    }

    // The absence is cached as a sentinel: the loader ran at most once,
    // and a later read does not run it at all.
    assert_eq!(loader_calls.load(Ordering::SeqCst), 1);
    let cached: Option<String> = coordinator
        .get_or_load("article:missing", BASE_TTL, || async {
            panic!("loader must not run for a cached absence")
        })
        .await
        .expect("get_or_load");
    assert!(cached.is_none());
}

#[tokio::test]
async fn expired_hot_key_reloads_under_single_flight() {
    let remote = FakeRemoteTier::new();
    let coordinator = coordinator(&remote);
    let loader_calls = Arc::new(AtomicUsize::new(0));

    let caller_count = 8;
    let mut tasks = Vec::new();
    for _ in 0..caller_count {
        let coordinator = Arc::clone(&coordinator);
        let loader_calls = Arc::clone(&loader_calls);
        tasks.push(tokio::spawn(async move {
            coordinator
                .get_or_load::<String, _, _>("article:hot", BASE_TTL, move || {
                    let loader_calls = Arc::clone(&loader_calls);
                    async move {
                        loader_calls.fetch_add(1, Ordering::SeqCst);
                        // A slow source of truth makes the herd visible.
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, BoxError>(Some("body".to_string()))
                    }
                })
                .await
        }));
    }

    for task in tasks {
        let value = task.await.expect("task").expect("get_or_load");
        assert_eq!(value.as_deref(), Some("body"));
    }

    let calls = loader_calls.load(Ordering::SeqCst);
    assert!(
        calls < caller_count,
        "single-flight leaked: {calls} loader calls for {caller_count} callers"
    );
}

#[tokio::test]
async fn loader_errors_propagate_to_the_caller() {
    let remote = FakeRemoteTier::new();
    let coordinator = coordinator(&remote);

    let result = coordinator
        .get_or_load::<String, _, _>("article:broken", BASE_TTL, || async {
            Err::<Option<String>, BoxError>("source of truth offline".into())
        })
        .await;
    assert!(result.is_err());

    // The failure was not cached: a healthy loader succeeds right after.
    let value = coordinator
        .get_or_load::<String, _, _>("article:broken", BASE_TTL, || async {
            Ok::<_, BoxError>(Some("recovered".to_string()))
        })
        .await
        .expect("get_or_load");
    assert_eq!(value.as_deref(), Some("recovered"));
}

#[tokio::test]
async fn lock_admits_exactly_one_owner() {
    let remote = FakeRemoteTier::new();
    let (store, _) = cache_store(&remote, true);
    let lock = Arc::new(DistributedLock::new(store));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let lock = Arc::clone(&lock);
        tasks.push(tokio::spawn(async move {
            let token = OwnerToken::next();
            let acquired = lock.try_acquire("reload:article:42", &token, LOCK_TTL).await;
            (acquired, token)
        }));
    }

    let mut winners = Vec::new();
    for task in tasks {
        let (acquired, token) = task.await.expect("task");
        if acquired {
            winners.push(token);
        }
    }
    assert_eq!(winners.len(), 1, "mutual exclusion violated");

    // A non-holder's release is a no-op; the holder's release frees the key.
    let stranger = OwnerToken::next();
    lock.release("reload:article:42", &stranger).await;
    assert!(
        !lock
            .try_acquire("reload:article:42", &OwnerToken::next(), LOCK_TTL)
            .await
    );

    lock.release("reload:article:42", &winners[0]).await;
    assert!(
        lock.try_acquire("reload:article:42", &OwnerToken::next(), LOCK_TTL)
            .await
    );
}

#[tokio::test]
async fn networked_outage_degrades_to_local_tier_silently() {
    let remote = FakeRemoteTier::new();
    let (store, health) = cache_store(&remote, true);

    store.set("article:42", "cached-body", BASE_TTL).await;
    assert_eq!(store.get("article:42").await.as_deref(), Some("cached-body"));

    // Backend goes down mid-flight: the flag still says up, ops fail,
    // and the store falls back without surfacing anything.
    remote.set_failing(true);
    assert_eq!(store.get("article:42").await.as_deref(), Some("cached-body"));
    store.set("article:43", "written-during-outage", BASE_TTL).await;
    assert_eq!(
        store.get("article:43").await.as_deref(),
        Some("written-during-outage")
    );

    // Probe marks the tier down: reads go local directly.
    health.record(false);
    assert!(!store.is_remote_available());
    assert_eq!(store.get("article:42").await.as_deref(), Some("cached-body"));
}

#[tokio::test]
async fn lock_survives_outage_with_process_local_exclusion() {
    let remote = FakeRemoteTier::new();
    let (store, health) = cache_store(&remote, true);
    health.record(false);
    let lock = DistributedLock::new(store);

    let holder = OwnerToken::next();
    assert!(lock.try_acquire("degraded", &holder, LOCK_TTL).await);
    assert!(!lock.try_acquire("degraded", &OwnerToken::next(), LOCK_TTL).await);

    lock.release("degraded", &holder).await;
    assert!(lock.try_acquire("degraded", &OwnerToken::next(), LOCK_TTL).await);
}

#[tokio::test]
async fn hot_key_near_expiry_is_refreshed_in_the_background() {
    let remote = FakeRemoteTier::new();
    let (store, _) = cache_store(&remote, true);
    let coordinator = Arc::new(CacheProtectionCoordinator::new(
        Arc::clone(&store),
        NULL_TTL,
        LOCK_TTL,
    ));
    let loader_calls = Arc::new(AtomicUsize::new(0));

    // Initial load populates the cache.
    let calls = Arc::clone(&loader_calls);
    let value = coordinator
        .get_or_load::<String, _, _>("article:42", BASE_TTL, move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(Some("v1".to_string()))
            }
        })
        .await
        .expect("initial load");
    assert_eq!(value.as_deref(), Some("v1"));
    assert_eq!(loader_calls.load(Ordering::SeqCst), 1);

    // An immediate protected read serves from cache without the loader.
    let value: Option<String> = coordinator
        .get_or_load("article:42", BASE_TTL, || async {
            panic!("loader must not run for a fresh entry")
        })
        .await
        .expect("cached read");
    assert_eq!(value.as_deref(), Some("v1"));

    // Age the entry under a quarter of its TTL, then read with refresh:
    // the stale-but-valid value comes back immediately and a background
    // reload is scheduled.
    store.expire("article:42", Duration::from_secs(10)).await;
    let calls = Arc::clone(&loader_calls);
    let value = coordinator
        .get_with_async_refresh::<String, _, _>("article:42", BASE_TTL, move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(Some("v2".to_string()))
            }
        })
        .await
        .expect("refresh read");
    assert_eq!(value.as_deref(), Some("v1"), "caller sees the still-valid value");

    // The background reload lands: latest value, fresh TTL.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(loader_calls.load(Ordering::SeqCst), 2);
    let refreshed: Option<String> = coordinator
        .get_or_load("article:42", BASE_TTL, || async {
            panic!("loader must not run after the background refresh")
        })
        .await
        .expect("post-refresh read");
    assert_eq!(refreshed.as_deref(), Some("v2"));
    let remaining = store
        .remaining_ttl("article:42")
        .await
        .expect("refreshed entry has a ttl");
    assert!(remaining > BASE_TTL / 4, "refresh must reset the TTL");
}

#[tokio::test]
async fn breakdown_lock_names_are_namespaced_per_key() {
    assert_eq!(keys::breakdown_lock_name("article:42"), "breakdown:article:42");
    assert_ne!(
        keys::breakdown_lock_name("article:42"),
        keys::breakdown_lock_name("article:43")
    );
}
