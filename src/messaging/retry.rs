//! Consumer-side retry and dead-letter routing.
//!
//! Advisory bookkeeping only: the coordinator decides whether a failed
//! handler should try again and where exhausted messages are routed. It
//! schedules no timers — that stays with the consumer runtime.

use std::time::Duration;

use tracing::{error, info, warn};

use super::topics::{DEAD_LETTER_SUFFIX, RETRY_SUFFIX};

/// Delay step function: attempt 1 → 1s, 2 → 5s, 3 → 10s, ≥4 → 30s.
const DELAY_LEVELS: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry/dead-letter decision logic for message handlers.
pub struct RetryCoordinator {
    max_attempts: u32,
}

impl RetryCoordinator {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Decide whether a failed handling attempt should be retried.
    ///
    /// Once `attempt_count` reaches the maximum, the message belongs on
    /// the dead-letter destination and the answer is `false`.
    pub fn handle_retry(&self, message_id: &str, destination: &str, attempt_count: u32) -> bool {
        warn!(
            message_id,
            destination, attempt_count, "Message handling failed"
        );

        if attempt_count >= self.max_attempts {
            error!(
                message_id,
                destination,
                attempt_count,
                dead_letter_destination = %self.dead_letter_destination(destination),
                "Retry budget exhausted, routing to dead letter"
            );
            return false;
        }

        info!(
            message_id,
            destination,
            delay = ?self.delay_for_attempt(attempt_count),
            "Retry scheduled"
        );
        true
    }

    /// Delay before the given attempt, per the step function.
    pub fn delay_for_attempt(&self, attempt_count: u32) -> Duration {
        match attempt_count {
            0 | 1 => DELAY_LEVELS[0],
            2 => DELAY_LEVELS[1],
            3 => DELAY_LEVELS[2],
            _ => DELAY_LEVELS[3],
        }
    }

    /// Destination messages are re-enqueued on for retry.
    pub fn retry_destination(&self, destination: &str) -> String {
        format!("{destination}{RETRY_SUFFIX}")
    }

    /// Terminal destination for messages that exhausted their budget.
    pub fn dead_letter_destination(&self, destination: &str) -> String {
        format!("{destination}{DEAD_LETTER_SUFFIX}")
    }
}

impl Default for RetryCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
