//! Networked primary tier.
//!
//! [`RemoteTier`] is the contract the rest of the cache stack programs
//! against; [`RedisTier`] is the production implementation. Every round
//! trip is bounded by the configured operation timeout so a degraded
//! backend cannot stall request threads.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;

/// Release/compare-and-delete must run server-side in one step, otherwise
/// a late release could delete a lock some other holder re-acquired.
const COMPARE_AND_DELETE_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

const SCAN_PAGE_SIZE: usize = 200;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote tier command failed: {0}")]
    Command(#[from] redis::RedisError),
    #[error("remote tier timed out after {0:?}")]
    Timeout(Duration),
}

/// Contract of the networked key/value tier.
///
/// Values are opaque strings; TTLs are mandatory on writes. The two lock
/// primitives must be atomic on the server.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RemoteError>;
    async fn delete(&self, key: &str) -> Result<(), RemoteError>;
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, RemoteError>;
    async fn exists(&self, key: &str) -> Result<bool, RemoteError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), RemoteError>;
    /// Remaining TTL, or `None` when the key is missing or has no expiry.
    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, RemoteError>;
    /// Atomic insert-if-absent; returns whether the insert won.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, RemoteError>;
    /// Atomic delete-if-value-matches; returns whether a delete happened.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, RemoteError>;
    /// Trivial round trip used by the health probe.
    async fn ping(&self) -> Result<(), RemoteError>;
}

/// Redis-backed [`RemoteTier`].
pub struct RedisTier {
    conn: ConnectionManager,
    release_script: redis::Script,
    op_timeout: Duration,
}

impl RedisTier {
    /// Connect to the given Redis URL.
    ///
    /// The connection manager reconnects on its own; per-operation
    /// failures surface as [`RemoteError`] and are handled by the store's
    /// fallback path.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, RemoteError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            release_script: redis::Script::new(COMPARE_AND_DELETE_SCRIPT),
            op_timeout,
        })
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, redis::RedisError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(RemoteError::from),
            Err(_) => Err(RemoteError::Timeout(self.op_timeout)),
        }
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        // Redis rejects EX 0; round sub-second TTLs up to one second.
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl RemoteTier for RedisTier {
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RemoteError> {
        let mut conn = self.conn.clone();
        let secs = Self::ttl_secs(ttl);
        self.bounded(async move {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, RemoteError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        self.bounded(async move {
            let mut cursor: u64 = 0;
            let mut deleted: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_PAGE_SIZE)
                    .query_async(&mut conn)
                    .await?;
                if !keys.is_empty() {
                    let removed: u64 = redis::cmd("DEL")
                        .arg(&keys)
                        .query_async(&mut conn)
                        .await?;
                    deleted += removed;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok(deleted)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let found: bool = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
            Ok(found)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), RemoteError> {
        let mut conn = self.conn.clone();
        let secs = Self::ttl_secs(ttl);
        self.bounded(async move {
            let _: i64 = redis::cmd("EXPIRE")
                .arg(key)
                .arg(secs)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, RemoteError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
            // -2: key missing, -1: no expiry set.
            Ok(u64::try_from(ttl).ok().map(Duration::from_secs))
        })
        .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, RemoteError> {
        let mut conn = self.conn.clone();
        let secs = Self::ttl_secs(ttl);
        self.bounded(async move {
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(secs)
                .query_async(&mut conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, RemoteError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let deleted: i64 = self
                .release_script
                .key(key)
                .arg(expected)
                .invoke_async(&mut conn)
                .await?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
