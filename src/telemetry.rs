use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry initialization failed: {0}")]
    Init(String),
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let directive = logging
        .level
        .parse()
        .map_err(|err| TelemetryError::Init(format!("invalid log level directive: {err}")))?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError::Init(format!("failed to install tracing subscriber: {err}")))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tenuto_cache_local_hit_total",
            Unit::Count,
            "Total number of local-tier cache hits."
        );
        describe_counter!(
            "tenuto_cache_local_miss_total",
            Unit::Count,
            "Total number of local-tier cache misses."
        );
        describe_counter!(
            "tenuto_cache_local_evict_total",
            Unit::Count,
            "Total number of local-tier evictions due to capacity."
        );
        describe_counter!(
            "tenuto_cache_remote_fallback_total",
            Unit::Count,
            "Operations that fell back to the local tier after a networked-tier failure."
        );
        describe_counter!(
            "tenuto_cache_probe_transition_total",
            Unit::Count,
            "Availability transitions observed by the networked-tier health probe."
        );
        describe_counter!(
            "tenuto_cache_loader_degraded_total",
            Unit::Count,
            "Loader invocations made without the breakdown lock."
        );
        describe_counter!(
            "tenuto_lock_degraded_total",
            Unit::Count,
            "Lock operations served by the local tier during a networked-tier outage."
        );
        describe_counter!(
            "tenuto_outbox_enqueued_total",
            Unit::Count,
            "Events persisted to the outbox instead of delivered directly."
        );
        describe_counter!(
            "tenuto_outbox_sent_total",
            Unit::Count,
            "Outbox records successfully delivered by the dispatcher."
        );
        describe_counter!(
            "tenuto_outbox_dead_letter_total",
            Unit::Count,
            "Outbox records routed to dead-letter after exhausting retries."
        );
        describe_histogram!(
            "tenuto_outbox_dispatch_ms",
            Unit::Milliseconds,
            "Outbox dispatch batch latency in milliseconds."
        );
        describe_counter!(
            "tenuto_idempotency_duplicate_total",
            Unit::Count,
            "Deliveries rejected by the idempotency guard as already processed."
        );
    });
}
