//! Outbox record and its status machine.

use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use super::event::DomainEvent;

/// Backoff shift is capped so `2^retry_count` cannot overflow for
/// pathological retry counts.
const BACKOFF_SHIFT_CAP: u32 = 16;

/// Delivery status of an outbox record.
///
/// `Sent` and `DeadLetter` are terminal; `retry_count` only ever grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    DeadLetter,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::DeadLetter)
    }
}

impl TryFrom<&str> for OutboxStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(format!("unknown outbox status `{other}`")),
        }
    }
}

/// A durably persisted event awaiting delivery.
///
/// Created in the same transaction as the business write that produced
/// the event, then owned by the dispatcher until it reaches a terminal
/// status.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: String,
    pub destination: String,
    pub ordering_key: Option<String>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retry: i32,
    pub next_retry_at: OffsetDateTime,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub sent_at: Option<OffsetDateTime>,
}

impl OutboxRecord {
    /// Build a pending record from a domain event.
    ///
    /// Serialization failure is a programming error in the event type and
    /// propagates immediately; it is never retried.
    pub fn from_event<E: DomainEvent>(
        destination: &str,
        event: &E,
        ordering_key: Option<&str>,
        max_retry: i32,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_string(event)?;
        let now = OffsetDateTime::now_utc();
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.aggregate_identity(),
            event_type: event.event_type().to_string(),
            payload,
            destination: destination.to_string(),
            ordering_key: ordering_key.map(str::to_string),
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retry,
            next_retry_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        })
    }

    pub fn mark_processing(&mut self) {
        self.status = OutboxStatus::Processing;
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn mark_sent(&mut self) {
        let now = OffsetDateTime::now_utc();
        self.status = OutboxStatus::Sent;
        self.sent_at = Some(now);
        self.updated_at = now;
    }

    /// Record a delivery failure: bump the retry count, store the error,
    /// and either schedule the next attempt with exponential backoff or
    /// dead-letter the record once the budget is spent.
    pub fn mark_failed(&mut self, error: &str) {
        let now = OffsetDateTime::now_utc();
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
        self.updated_at = now;

        if self.retry_count >= self.max_retry {
            self.status = OutboxStatus::DeadLetter;
        } else {
            self.status = OutboxStatus::Failed;
            self.next_retry_at = now + self.backoff();
        }
    }

    /// Exponential backoff: `2^retry_count` minutes.
    fn backoff(&self) -> Duration {
        let shift = u32::try_from(self.retry_count)
            .unwrap_or(BACKOFF_SHIFT_CAP)
            .min(BACKOFF_SHIFT_CAP);
        Duration::from_secs(60 * (1u64 << shift))
    }

    /// Whether the dispatcher may (re)send this record at `now`.
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => self.retry_count < self.max_retry && self.next_retry_at <= now,
            _ => false,
        }
    }
}
