//! Tenuto resilience core.
//!
//! Shared library for the platform's article, comment, and user services.
//! It owns the two cross-cutting concerns every service depends on:
//!
//! - **Protected caching** ([`cache`]): a networked primary tier with an
//!   in-process fallback tier, a distributed lock, and a coordinator that
//!   defends loaders against penetration, breakdown, and avalanche.
//! - **Reliable messaging** ([`messaging`]): a transactional outbox with a
//!   background dispatcher, an idempotency guard for consumers, and
//!   retry/dead-letter routing.
//!
//! Services wire these up once at startup and call through the small
//! surface re-exported here. HTTP handlers, entity mapping, and schema
//! ownership stay in the services; this crate only carries the parts that
//! must behave identically across the fleet.
//!
//! ## Wiring
//!
//! ```ignore
//! let settings = Settings::load(None)?;
//! telemetry::init(&settings.logging)?;
//!
//! let remote: Arc<dyn RemoteTier> = Arc::new(
//!     RedisTier::connect(&settings.cache.remote_url, settings.cache.op_timeout()).await?,
//! );
//! let health = Arc::new(HealthFlag::new());
//! let _probe = spawn_health_probe(
//!     Arc::clone(&remote),
//!     Arc::clone(&health),
//!     settings.cache.probe_startup_delay(),
//!     settings.cache.probe_interval(),
//! );
//!
//! let store = Arc::new(CacheStore::new(remote, health, StoreConfig {
//!     key_prefix: cache::keys::CACHE_PREFIX,
//!     local_capacity: settings.cache.local_capacity,
//!     name: "cache",
//! }));
//! let reads = CacheProtectionCoordinator::new(
//!     Arc::clone(&store),
//!     settings.cache.null_ttl(),
//!     settings.cache.lock_ttl(),
//! );
//!
//! let outbox = Arc::new(PgOutboxStore::new(pool));
//! let sender = Arc::new(ReliableMessageSender::new(
//!     broker,
//!     outbox,
//!     SenderConfig::from(&settings.outbox),
//! ));
//! let _dispatcher = sender.spawn_dispatcher();
//! let _cleanup = sender.spawn_cleanup();
//! ```

pub mod cache;
pub mod config;
pub mod messaging;
pub mod telemetry;

pub use cache::{
    CacheProtectionCoordinator, CacheStore, DistributedLock, HealthFlag, LocalTier, OwnerToken,
    ProtectionError, RedisTier, RemoteError, RemoteTier, StoreConfig, spawn_health_probe,
};
pub use config::{BrokerSettings, CacheSettings, OutboxSettings, RetrySettings, Settings};
pub use messaging::{
    Broker, BrokerClient, BrokerError, Delivery, DomainEvent, IdempotencyGuard, MemoryOutboxStore,
    OutboxError, OutboxRecord, OutboxStatus, OutboxStore, PgOutboxStore, ProcessingState,
    ReliableMessageSender, RetryCoordinator, SendError, SenderConfig,
};

/// Boxed error type accepted from externally supplied collaborators
/// (loaders, broker clients).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
