//! Reliable message sender.
//!
//! Per send: attempt direct broker delivery while the broker is marked
//! healthy, otherwise persist the event to the outbox and report success
//! to the caller — the write is durable even though delivery is
//! deferred. A background dispatcher drains the outbox when the broker
//! recovers; a lower-frequency cleanup loop prunes old sent records.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use sqlx::{Postgres, Transaction};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::OutboxSettings;

use super::broker::{Broker, BrokerError};
use super::event::DomainEvent;
use super::outbox::{OutboxRecord, OutboxStatus};
use super::store::{OutboxError, OutboxStore, PgOutboxStore};

const METRIC_OUTBOX_ENQUEUED: &str = "tenuto_outbox_enqueued_total";
const METRIC_OUTBOX_SENT: &str = "tenuto_outbox_sent_total";
const METRIC_OUTBOX_DEAD_LETTER: &str = "tenuto_outbox_dead_letter_total";
const METRIC_OUTBOX_DISPATCH_MS: &str = "tenuto_outbox_dispatch_ms";

#[derive(Debug, Error)]
pub enum SendError {
    /// The event could not be serialized. Programming error; not retried.
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("outbox persistence failed: {0}")]
    Outbox(#[from] OutboxError),
    /// Broker unavailable and the outbox is disabled: durability cannot
    /// be guaranteed, so the send is refused rather than dropped.
    #[error("no delivery path: broker unavailable and outbox disabled")]
    NoDeliveryPath,
}

/// How a successful send achieved durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Delivered synchronously to the broker.
    Direct,
    /// Persisted to the outbox for deferred delivery.
    Queued,
}

/// Runtime configuration of the sender and its background loops.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub outbox_enabled: bool,
    pub batch_size: usize,
    pub max_retry: i32,
    pub dispatch_interval: Duration,
    pub dispatch_startup_delay: Duration,
    pub cleanup_interval: Duration,
    pub retention: Duration,
}

impl From<&OutboxSettings> for SenderConfig {
    fn from(settings: &OutboxSettings) -> Self {
        Self {
            outbox_enabled: settings.enabled,
            batch_size: settings.batch_size,
            max_retry: settings.max_retry,
            dispatch_interval: settings.dispatch_interval(),
            dispatch_startup_delay: settings.dispatch_startup_delay(),
            cleanup_interval: settings.cleanup_interval(),
            retention: settings.retention(),
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self::from(&OutboxSettings::default())
    }
}

/// Guaranteed-delivery sender shared by a service's write paths.
pub struct ReliableMessageSender<S> {
    broker: Broker,
    store: Arc<S>,
    broker_available: AtomicBool,
    config: SenderConfig,
}

impl<S: OutboxStore> ReliableMessageSender<S> {
    pub fn new(broker: Broker, store: Arc<S>, config: SenderConfig) -> Self {
        let broker_available = AtomicBool::new(broker.is_configured());
        Self {
            broker,
            store,
            broker_available,
            config,
        }
    }

    /// Whether the broker is currently marked healthy.
    pub fn is_broker_available(&self) -> bool {
        self.broker.is_configured() && self.broker_available.load(Ordering::Acquire)
    }

    /// Publish an event to `destination`.
    ///
    /// Success means durability — direct delivery or an outbox row — not
    /// broker acknowledgement. Downstream consumers must deduplicate via
    /// the idempotency guard.
    pub async fn send<E: DomainEvent>(
        &self,
        destination: &str,
        event: &E,
        ordering_key: Option<&str>,
    ) -> Result<Delivery, SendError> {
        let record =
            OutboxRecord::from_event(destination, event, ordering_key, self.config.max_retry)?;

        if self.try_direct(&record).await {
            return Ok(Delivery::Direct);
        }
        if !self.config.outbox_enabled {
            return Err(SendError::NoDeliveryPath);
        }

        self.store.save(&record).await?;
        counter!(METRIC_OUTBOX_ENQUEUED).increment(1);
        info!(
            destination,
            event_type = %record.event_type,
            record_id = %record.id,
            "Event persisted to outbox for deferred delivery"
        );
        Ok(Delivery::Queued)
    }

    async fn try_direct(&self, record: &OutboxRecord) -> bool {
        let Some(client) = self.broker.client() else {
            return false;
        };
        if !self.broker_available.load(Ordering::Acquire) {
            return false;
        }

        match client
            .send(
                &record.destination,
                &record.payload,
                record.ordering_key.as_deref(),
            )
            .await
        {
            Ok(()) => {
                debug!(
                    destination = %record.destination,
                    event_type = %record.event_type,
                    "Event delivered directly"
                );
                true
            }
            Err(err) => {
                warn!(
                    destination = %record.destination,
                    error = %err,
                    "Direct delivery failed, falling back to outbox"
                );
                self.broker_available.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Re-probe the broker and update the availability flag.
    async fn refresh_broker_health(&self) -> bool {
        let Some(client) = self.broker.client() else {
            return false;
        };
        let alive = client.probe_liveness().await;
        let was_alive = self.broker_available.swap(alive, Ordering::AcqRel);
        if alive != was_alive {
            if alive {
                info!("Message broker available");
            } else {
                warn!("Message broker unavailable, deliveries defer to outbox");
            }
        }
        alive
    }

    /// Run one dispatcher pass: claim a batch of due records and attempt
    /// delivery. Each record's outcome is committed independently; one
    /// failure never aborts the batch. Returns how many records were
    /// attempted.
    pub async fn dispatch_pending(&self) -> Result<usize, OutboxError> {
        if !self.config.outbox_enabled {
            return Ok(0);
        }
        if !self.refresh_broker_health().await {
            return Ok(0);
        }

        let started = Instant::now();
        let batch = self
            .store
            .claim_due(self.config.batch_size, OffsetDateTime::now_utc())
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        info!(count = batch.len(), "Dispatching outbox batch");

        let mut attempted = 0usize;
        for mut record in batch {
            attempted += 1;

            let outcome = match self.broker.client() {
                Some(client) => {
                    client
                        .send(
                            &record.destination,
                            &record.payload,
                            record.ordering_key.as_deref(),
                        )
                        .await
                }
                None => Err(BrokerError::NotConfigured),
            };

            match outcome {
                Ok(()) => {
                    record.mark_sent();
                    counter!(METRIC_OUTBOX_SENT).increment(1);
                    debug!(record_id = %record.id, "Outbox record delivered");
                }
                Err(err) => {
                    record.mark_failed(&err.to_string());
                    if record.status == OutboxStatus::DeadLetter {
                        counter!(METRIC_OUTBOX_DEAD_LETTER).increment(1);
                        error!(
                            record_id = %record.id,
                            destination = %record.destination,
                            retry_count = record.retry_count,
                            error = %err,
                            "Outbox record dead-lettered after exhausting retries"
                        );
                    } else {
                        warn!(
                            record_id = %record.id,
                            retry_count = record.retry_count,
                            error = %err,
                            "Outbox delivery failed, retry scheduled"
                        );
                    }
                }
            }

            if let Err(err) = self.store.update(&record).await {
                error!(
                    record_id = %record.id,
                    error = %err,
                    "Failed to persist outbox record outcome"
                );
            }
        }

        histogram!(METRIC_OUTBOX_DISPATCH_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(attempted)
    }

    /// Delete sent records older than the retention window.
    pub async fn cleanup_sent(&self) -> Result<u64, OutboxError> {
        if !self.config.outbox_enabled {
            return Ok(0);
        }
        let cutoff = OffsetDateTime::now_utc() - self.config.retention;
        let deleted = self.store.delete_sent_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "Cleaned up sent outbox records");
        }
        Ok(deleted)
    }

    /// Records still awaiting delivery.
    pub async fn pending_count(&self) -> Result<u64, OutboxError> {
        self.store.count_pending().await
    }

    /// Records that exhausted their retry budget.
    pub async fn dead_letter_count(&self) -> Result<u64, OutboxError> {
        self.store.count_dead_letter().await
    }
}

impl<S: OutboxStore + 'static> ReliableMessageSender<S> {
    /// Spawn the fixed-interval dispatcher loop. Abort the handle on
    /// shutdown.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> JoinHandle<()> {
        let sender = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(sender.config.dispatch_startup_delay).await;
            let mut ticker = tokio::time::interval(sender.config.dispatch_interval);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                if let Err(err) = sender.dispatch_pending().await {
                    warn!(error = %err, "Outbox dispatch pass failed");
                }
                ticker.tick().await;
            }
        })
    }

    /// Spawn the lower-frequency cleanup loop. Abort the handle on
    /// shutdown.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let sender = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sender.config.cleanup_interval);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                if let Err(err) = sender.cleanup_sent().await {
                    warn!(error = %err, "Outbox cleanup pass failed");
                }
            }
        })
    }
}

impl ReliableMessageSender<PgOutboxStore> {
    /// Publish an event from inside the caller's transaction.
    ///
    /// When the broker is down the outbox row joins the caller's
    /// transaction, so the business write and the event commit or roll
    /// back together.
    pub async fn send_in_tx<E: DomainEvent>(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        destination: &str,
        event: &E,
        ordering_key: Option<&str>,
    ) -> Result<Delivery, SendError> {
        let record =
            OutboxRecord::from_event(destination, event, ordering_key, self.config.max_retry)?;

        if self.try_direct(&record).await {
            return Ok(Delivery::Direct);
        }
        if !self.config.outbox_enabled {
            return Err(SendError::NoDeliveryPath);
        }

        self.store.save_in_tx(tx, &record).await?;
        counter!(METRIC_OUTBOX_ENQUEUED).increment(1);
        info!(
            destination,
            event_type = %record.event_type,
            record_id = %record.id,
            "Event persisted to outbox within caller transaction"
        );
        Ok(Delivery::Queued)
    }
}
