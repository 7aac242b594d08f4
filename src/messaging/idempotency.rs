//! Idempotent message handling.
//!
//! At-least-once delivery means consumers will see duplicates; the guard
//! ensures a handler's side effect runs at most once per logical message.
//! Records live in the shared cache store under their own namespace.
//!
//! Availability is preferred over perfect deduplication: when the
//! networked tier is unreachable the marker lands in the local tier
//! only, so `check_and_mark_processing` still dedupes within this
//! process but fails open across the fleet. That tradeoff is deliberate
//! and must be accounted for by consumers.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info};

use crate::cache::CacheStore;
use crate::cache::keys;

const METRIC_IDEMPOTENCY_DUPLICATE: &str = "tenuto_idempotency_duplicate_total";

/// COMPLETED records absorb broker-level redelivery for a day.
const COMPLETED_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);
/// FAILED records expire quickly so the message becomes retryable.
const FAILED_HORIZON: Duration = Duration::from_secs(60 * 60);

const PROCESSING_MARKER: &str = "PROCESSING";
const COMPLETED_MARKER: &str = "COMPLETED:";
const FAILED_MARKER: &str = "FAILED:";

/// Authoritative state of a message's handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingState {
    Processing,
    Completed(String),
    Failed(String),
}

impl ProcessingState {
    fn parse(raw: &str) -> Option<Self> {
        if raw == PROCESSING_MARKER {
            return Some(Self::Processing);
        }
        if let Some(result) = raw.strip_prefix(COMPLETED_MARKER) {
            return Some(Self::Completed(result.to_string()));
        }
        raw.strip_prefix(FAILED_MARKER)
            .map(|error| Self::Failed(error.to_string()))
    }

    fn encode(&self) -> String {
        match self {
            Self::Processing => PROCESSING_MARKER.to_string(),
            Self::Completed(result) => format!("{COMPLETED_MARKER}{result}"),
            Self::Failed(error) => format!("{FAILED_MARKER}{error}"),
        }
    }
}

/// Deduplication guard keyed by (message id, destination, consumer group).
pub struct IdempotencyGuard {
    store: Arc<CacheStore>,
}

impl IdempotencyGuard {
    /// Build a guard over a store namespaced with
    /// [`keys::IDEMPOTENCY_PREFIX`].
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Whether any handling record exists for the message.
    ///
    /// Returns `false` when the backing store is unreachable (fail open).
    pub async fn is_processed(&self, message_id: &str, destination: &str, group: &str) -> bool {
        let key = keys::idempotency_key(message_id, destination, group);
        let processed = self.store.exists(&key).await;
        if processed {
            info!(
                message_id,
                destination, group, "Message already processed, skipping handler"
            );
        }
        processed
    }

    /// Atomically claim the message for processing.
    ///
    /// Exactly one of N concurrent deliveries gets `true`; only that
    /// caller may run the handler. The PROCESSING marker carries the long
    /// horizon so a crashed handler cannot wedge the key forever.
    pub async fn check_and_mark_processing(
        &self,
        message_id: &str,
        destination: &str,
        group: &str,
    ) -> bool {
        let key = keys::idempotency_key(message_id, destination, group);
        let claimed = self
            .store
            .set_if_absent(&key, PROCESSING_MARKER, COMPLETED_HORIZON)
            .await;
        if claimed {
            debug!(message_id, destination, group, "Message claimed for processing");
        } else {
            counter!(METRIC_IDEMPOTENCY_DUPLICATE).increment(1);
            info!(
                message_id,
                destination, group, "Duplicate delivery rejected by idempotency guard"
            );
        }
        claimed
    }

    /// Record a successful handling outcome for the long horizon.
    pub async fn mark_completed(
        &self,
        message_id: &str,
        destination: &str,
        group: &str,
        result: &str,
    ) {
        let key = keys::idempotency_key(message_id, destination, group);
        let state = ProcessingState::Completed(result.to_string());
        self.store.set(&key, &state.encode(), COMPLETED_HORIZON).await;
    }

    /// Record a failed handling outcome for the short horizon, making the
    /// message retryable sooner.
    pub async fn mark_failed(
        &self,
        message_id: &str,
        destination: &str,
        group: &str,
        error: &str,
    ) {
        let key = keys::idempotency_key(message_id, destination, group);
        let state = ProcessingState::Failed(error.to_string());
        self.store.set(&key, &state.encode(), FAILED_HORIZON).await;
    }

    /// Fetch the recorded handling state, if any.
    pub async fn get_result(
        &self,
        message_id: &str,
        destination: &str,
        group: &str,
    ) -> Option<ProcessingState> {
        let key = keys::idempotency_key(message_id, destination, group);
        let raw = self.store.get(&key).await?;
        ProcessingState::parse(&raw)
    }

    /// Drop the record, making the message processable again. Intended
    /// for tests and operational repair.
    pub async fn remove(&self, message_id: &str, destination: &str, group: &str) {
        let key = keys::idempotency_key(message_id, destination, group);
        self.store.delete(&key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_encoding_roundtrip() {
        for state in [
            ProcessingState::Processing,
            ProcessingState::Completed("ok".to_string()),
            ProcessingState::Failed("timeout".to_string()),
        ] {
            let encoded = state.encode();
            assert_eq!(ProcessingState::parse(&encoded), Some(state));
        }
    }

    #[test]
    fn completed_result_may_contain_colons() {
        let state = ProcessingState::Completed("a:b:c".to_string());
        assert_eq!(
            ProcessingState::parse(&state.encode()),
            Some(ProcessingState::Completed("a:b:c".to_string()))
        );
    }

    #[test]
    fn unknown_markers_parse_to_none() {
        assert_eq!(ProcessingState::parse("GARBAGE"), None);
    }
}
