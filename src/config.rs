//! Configuration layer: typed settings with layered precedence (file → env).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

const ENV_PREFIX: &str = "TENUTO";
const LOCAL_CONFIG_BASENAME: &str = "tenuto";

const DEFAULT_REMOTE_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_OP_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_PROBE_INTERVAL_MS: u64 = 5_000;
const DEFAULT_PROBE_STARTUP_DELAY_MS: u64 = 100;
const DEFAULT_LOCAL_CAPACITY: usize = 10_000;
const DEFAULT_TTL_SECS: u64 = 3_600;
const DEFAULT_NULL_TTL_SECS: u64 = 300;
const DEFAULT_LOCK_TTL_SECS: u64 = 10;

const DEFAULT_OUTBOX_BATCH_SIZE: usize = 10;
const DEFAULT_OUTBOX_MAX_RETRY: i32 = 5;
const DEFAULT_DISPATCH_INTERVAL_MS: u64 = 5_000;
const DEFAULT_DISPATCH_STARTUP_DELAY_MS: u64 = 10_000;
const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;
const DEFAULT_RETENTION_DAYS: u64 = 7;

const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read configuration: {0}")]
    Read(#[from] config::ConfigError),
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl SettingsError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Root settings for the resilience core.
///
/// Loaded from an optional TOML file overlaid with `TENUTO__*` environment
/// variables (`TENUTO__CACHE__REMOTE_URL`, `TENUTO__OUTBOX__BATCH_SIZE`, ...).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub outbox: OutboxSettings,
    pub broker: BrokerSettings,
    pub retry: RetrySettings,
    pub logging: LoggingSettings,
}

/// Settings for the two-tier cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Connection URL of the networked tier.
    pub remote_url: String,
    /// Upper bound on any single networked-tier round trip.
    pub op_timeout_ms: u64,
    /// How often the health probe pings the networked tier.
    pub probe_interval_ms: u64,
    /// Delay before the first probe after startup.
    pub probe_startup_delay_ms: u64,
    /// Maximum entries held by the in-process fallback tier.
    pub local_capacity: usize,
    /// Default TTL applied when callers do not supply one.
    pub default_ttl_secs: u64,
    /// TTL for cached "not found" sentinels.
    pub null_ttl_secs: u64,
    /// TTL for breakdown-protection locks.
    pub lock_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            op_timeout_ms: DEFAULT_OP_TIMEOUT_MS,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            probe_startup_delay_ms: DEFAULT_PROBE_STARTUP_DELAY_MS,
            local_capacity: DEFAULT_LOCAL_CAPACITY,
            default_ttl_secs: DEFAULT_TTL_SECS,
            null_ttl_secs: DEFAULT_NULL_TTL_SECS,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
        }
    }
}

impl CacheSettings {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_startup_delay(&self) -> Duration {
        Duration::from_millis(self.probe_startup_delay_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

/// Settings for the outbox store and its dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    /// Persist undeliverable events instead of dropping them.
    pub enabled: bool,
    /// Records claimed per dispatcher pass.
    pub batch_size: usize,
    /// Delivery attempts before a record is dead-lettered.
    pub max_retry: i32,
    /// Cadence of the dispatcher loop.
    pub dispatch_interval_ms: u64,
    /// Delay before the dispatcher's first pass after startup.
    pub dispatch_startup_delay_ms: u64,
    /// Cadence of the sent-record cleanup loop.
    pub cleanup_interval_ms: u64,
    /// How long sent records are retained before cleanup.
    pub retention_days: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: DEFAULT_OUTBOX_BATCH_SIZE,
            max_retry: DEFAULT_OUTBOX_MAX_RETRY,
            dispatch_interval_ms: DEFAULT_DISPATCH_INTERVAL_MS,
            dispatch_startup_delay_ms: DEFAULT_DISPATCH_STARTUP_DELAY_MS,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl OutboxSettings {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn dispatch_startup_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_startup_delay_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }
}

/// Settings for the message broker connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Whether a broker is configured for this instance at all.
    /// When false the sender routes every event through the outbox.
    pub enabled: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Settings for consumer-side retry routing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Handler attempts before routing to the dead-letter destination.
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

/// Logging settings consumed by [`crate::telemetry::init`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Base log level directive (trace|debug|info|warn|error).
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file overlaid with environment
    /// variables.
    pub fn load(config_file: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder =
            Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.cache.op_timeout_ms == 0 {
            return Err(SettingsError::invalid("cache.op_timeout_ms must be > 0"));
        }
        if self.cache.probe_interval_ms == 0 {
            return Err(SettingsError::invalid("cache.probe_interval_ms must be > 0"));
        }
        if self.outbox.batch_size == 0 {
            return Err(SettingsError::invalid("outbox.batch_size must be > 0"));
        }
        if self.outbox.max_retry <= 0 {
            return Err(SettingsError::invalid("outbox.max_retry must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::invalid("retry.max_attempts must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let settings = Settings::default();
        assert_eq!(settings.cache.remote_url, "redis://127.0.0.1:6379");
        assert_eq!(settings.cache.op_timeout_ms, 1_000);
        assert_eq!(settings.cache.local_capacity, 10_000);
        assert_eq!(settings.cache.null_ttl_secs, 300);
        assert!(settings.outbox.enabled);
        assert_eq!(settings.outbox.batch_size, 10);
        assert_eq!(settings.outbox.max_retry, 5);
        assert_eq!(settings.outbox.retention_days, 7);
        assert_eq!(settings.retry.max_attempts, 3);
        assert!(settings.broker.enabled);
    }

    #[test]
    fn duration_accessors() {
        let settings = Settings::default();
        assert_eq!(settings.cache.null_ttl(), Duration::from_secs(300));
        assert_eq!(settings.outbox.dispatch_interval(), Duration::from_millis(5_000));
        assert_eq!(
            settings.outbox.retention(),
            Duration::from_secs(7 * 24 * 60 * 60)
        );
    }

    #[test]
    fn validation_rejects_zero_batch_size() {
        let mut settings = Settings::default();
        settings.outbox.batch_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_max_attempts() {
        let mut settings = Settings::default();
        settings.retry.max_attempts = 0;
        assert!(settings.validate().is_err());
    }
}
