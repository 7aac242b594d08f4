//! Tenuto reliable messaging.
//!
//! Guaranteed-delivery path between the platform services:
//!
//! - [`ReliableMessageSender`] delivers an event directly when the broker
//!   is healthy, or persists it to the transactional outbox otherwise; a
//!   background dispatcher drains the outbox with exponential backoff and
//!   dead-letters exhausted records.
//! - [`IdempotencyGuard`] deduplicates handling on the consuming side so
//!   at-least-once delivery never re-executes side effects.
//! - [`RetryCoordinator`] decides whether a failed handler should retry
//!   and where exhausted messages are routed.
//!
//! Callers of the sender see success as soon as durability is guaranteed
//! (direct send or outbox row), never as soon as the broker acknowledged
//! delivery. That is a deliberate at-least-once guarantee the guard
//! compensates for downstream.

mod broker;
mod event;
mod idempotency;
mod outbox;
mod retry;
mod sender;
mod store;
pub mod topics;

pub use broker::{Broker, BrokerClient, BrokerError};
pub use event::DomainEvent;
pub use idempotency::{IdempotencyGuard, ProcessingState};
pub use outbox::{OutboxRecord, OutboxStatus};
pub use retry::RetryCoordinator;
pub use sender::{Delivery, ReliableMessageSender, SendError, SenderConfig};
pub use store::{MemoryOutboxStore, OutboxError, OutboxStore, PgOutboxStore};
