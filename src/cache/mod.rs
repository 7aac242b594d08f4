//! Tenuto cache system.
//!
//! Two-tier protected caching for the platform services:
//!
//! - **Networked tier**: a shared Redis instance behind the [`RemoteTier`]
//!   trait, every round trip bounded by a short timeout.
//! - **Local tier**: an in-process bounded map with its own TTL
//!   bookkeeping, used for read-after-write and as the fallback when the
//!   networked tier is down.
//!
//! A background health probe owns the availability flag; [`CacheStore`]
//! consults it before every operation instead of retrying a known-down
//! tier. [`DistributedLock`] and [`CacheProtectionCoordinator`] build the
//! stampede defenses on top.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via the `[cache]` section of the settings
//! file:
//!
//! ```toml
//! [cache]
//! remote_url = "redis://127.0.0.1:6379"
//! op_timeout_ms = 1000
//! local_capacity = 10000
//! # ... see config.rs for all options
//! ```

mod dlock;
mod guards;
mod health;
pub mod keys;
mod local;
mod protection;
mod remote;
mod store;

pub use dlock::{DistributedLock, OwnerToken};
pub use health::{HealthFlag, spawn_health_probe};
pub use local::LocalTier;
pub use protection::{CacheProtectionCoordinator, ProtectionError};
pub use remote::{RedisTier, RemoteError, RemoteTier};
pub use store::{CacheStore, StoreConfig};
