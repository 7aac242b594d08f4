//! Networked-tier health probing.
//!
//! Availability is a single atomic flag owned by a periodic probe task;
//! stores consult the flag before every operation rather than retrying a
//! tier the probe already marked down. The probe waits a short startup
//! delay before its first round trip so process boot is never gated on
//! the backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::remote::RemoteTier;

const METRIC_PROBE_TRANSITION: &str = "tenuto_cache_probe_transition_total";

/// Observable availability state of the networked tier.
///
/// Starts pessimistic: the tier is considered down until the first probe
/// succeeds.
pub struct HealthFlag {
    available: AtomicBool,
}

impl HealthFlag {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(false),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Record a probe outcome; returns the previous state.
    ///
    /// Normally called only by [`spawn_health_probe`]; exposed for hosts
    /// that run their own probe.
    pub fn record(&self, available: bool) -> bool {
        self.available.swap(available, Ordering::AcqRel)
    }
}

impl Default for HealthFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the periodic probe that owns `flag`.
///
/// The task sleeps `startup_delay`, then pings the tier every `interval`
/// and flips the flag on transitions. Abort the handle on shutdown.
pub fn spawn_health_probe(
    remote: Arc<dyn RemoteTier>,
    flag: Arc<HealthFlag>,
    startup_delay: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(startup_delay).await;
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip the first immediate tick
        loop {
            let available = match remote.ping().await {
                Ok(()) => true,
                Err(err) => {
                    debug!(error = %err, "Networked-tier probe failed");
                    false
                }
            };

            let was_available = flag.record(available);
            if available != was_available {
                counter!(METRIC_PROBE_TRANSITION).increment(1);
                if available {
                    info!("Networked cache tier available");
                } else {
                    warn!("Networked cache tier unavailable, serving from local tier");
                }
            }

            ticker.tick().await;
        }
    })
}
