//! Outbox persistence.
//!
//! [`OutboxStore`] is the durable handoff surface between the writer's
//! transaction and the dispatcher. [`PgOutboxStore`] is the production
//! implementation; [`MemoryOutboxStore`] backs tests and single-process
//! embedded deployments.

use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::outbox::{OutboxRecord, OutboxStatus};

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox storage failed: {message}")]
    Storage { message: String },
    #[error("corrupt outbox record {id}: {message}")]
    Corrupt { id: Uuid, message: String },
}

impl OutboxError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

fn map_sqlx_error(err: sqlx::Error) -> OutboxError {
    OutboxError::storage(err.to_string())
}

/// Durable store of [`OutboxRecord`]s.
///
/// `claim_due` must hand each eligible record to exactly one caller even
/// when several dispatcher instances run concurrently; claimed records
/// come back already flipped to `Processing`.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a new pending record.
    async fn save(&self, record: &OutboxRecord) -> Result<(), OutboxError>;

    /// Atomically claim up to `limit` records eligible for (re)send at
    /// `now` — pending, or failed with retry budget left and
    /// `next_retry_at` reached — oldest first.
    async fn claim_due(
        &self,
        limit: usize,
        now: OffsetDateTime,
    ) -> Result<Vec<OutboxRecord>, OutboxError>;

    /// Persist the record's current status and bookkeeping fields.
    async fn update(&self, record: &OutboxRecord) -> Result<(), OutboxError>;

    /// Delete sent records older than `cutoff`; returns how many.
    async fn delete_sent_before(&self, cutoff: OffsetDateTime) -> Result<u64, OutboxError>;

    /// Records still awaiting delivery (pending, or failed with budget left).
    async fn count_pending(&self) -> Result<u64, OutboxError>;

    /// Records that exhausted their retry budget.
    async fn count_dead_letter(&self) -> Result<u64, OutboxError>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    aggregate_type: String,
    aggregate_id: String,
    event_type: String,
    payload: String,
    destination: String,
    ordering_key: Option<String>,
    status: String,
    retry_count: i32,
    max_retry: i32,
    next_retry_at: OffsetDateTime,
    last_error: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    sent_at: Option<OffsetDateTime>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = OutboxError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = OutboxStatus::try_from(row.status.as_str()).map_err(|message| {
            OutboxError::Corrupt {
                id: row.id,
                message,
            }
        })?;
        Ok(Self {
            id: row.id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.payload,
            destination: row.destination,
            ordering_key: row.ordering_key,
            status,
            retry_count: row.retry_count,
            max_retry: row.max_retry,
            next_retry_at: row.next_retry_at,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
        })
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO outbox_messages (
        id, aggregate_type, aggregate_id, event_type, payload,
        destination, ordering_key, status, retry_count, max_retry,
        next_retry_at, last_error, created_at, updated_at, sent_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
"#;

/// Records are claimed with `FOR UPDATE SKIP LOCKED` and flipped to
/// `processing` in the same statement, so a record is picked up by
/// exactly one dispatcher instance.
const CLAIM_SQL: &str = r#"
    UPDATE outbox_messages
       SET status = 'processing', updated_at = $3
     WHERE id IN (
         SELECT id
           FROM outbox_messages
          WHERE status = 'pending'
             OR (status = 'failed' AND retry_count < max_retry AND next_retry_at <= $1)
          ORDER BY created_at
          LIMIT $2
          FOR UPDATE SKIP LOCKED
     )
    RETURNING id, aggregate_type, aggregate_id, event_type, payload,
              destination, ordering_key, status, retry_count, max_retry,
              next_retry_at, last_error, created_at, updated_at, sent_at
"#;

const UPDATE_SQL: &str = r#"
    UPDATE outbox_messages
       SET status = $2,
           retry_count = $3,
           next_retry_at = $4,
           last_error = $5,
           updated_at = $6,
           sent_at = $7
     WHERE id = $1
"#;

/// Postgres-backed outbox store.
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }

    /// Persist a record inside the caller's transaction, so the event row
    /// commits or rolls back together with the business write.
    pub async fn save_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &OutboxRecord,
    ) -> Result<(), OutboxError> {
        bind_insert(sqlx::query(INSERT_SQL), record)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn bind_insert<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    record: &'q OutboxRecord,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(record.id)
        .bind(record.aggregate_type.as_str())
        .bind(record.aggregate_id.as_str())
        .bind(record.event_type.as_str())
        .bind(record.payload.as_str())
        .bind(record.destination.as_str())
        .bind(record.ordering_key.as_deref())
        .bind(record.status.as_str())
        .bind(record.retry_count)
        .bind(record.max_retry)
        .bind(record.next_retry_at)
        .bind(record.last_error.as_deref())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.sent_at)
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn save(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        bind_insert(sqlx::query(INSERT_SQL), record)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn claim_due(
        &self,
        limit: usize,
        now: OffsetDateTime,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let rows = sqlx::query_as::<_, OutboxRow>(CLAIM_SQL)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(OffsetDateTime::now_utc())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(OutboxRecord::try_from(row)?);
        }
        // Claim order inside the statement is not guaranteed to survive
        // the UPDATE; re-sort so dispatch stays oldest first.
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    async fn update(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        sqlx::query(UPDATE_SQL)
            .bind(record.id)
            .bind(record.status.as_str())
            .bind(record.retry_count)
            .bind(record.next_retry_at)
            .bind(record.last_error.as_deref())
            .bind(record.updated_at)
            .bind(record.sent_at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete_sent_before(&self, cutoff: OffsetDateTime) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            "DELETE FROM outbox_messages WHERE status = 'sent' AND sent_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn count_pending(&self) -> Result<u64, OutboxError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_messages
              WHERE status = 'pending'
                 OR (status = 'failed' AND retry_count < max_retry)",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn count_dead_letter(&self) -> Result<u64, OutboxError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages WHERE status = 'dead_letter'")
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory outbox store for tests and embedded single-process use.
///
/// Claims are serialized under one mutex so the exclusivity contract of
/// `claim_due` holds here too.
#[derive(Default)]
pub struct MemoryOutboxStore {
    records: DashMap<Uuid, OutboxRecord>,
    claim_gate: Mutex<()>,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a record by id; test helper.
    pub fn get(&self, id: Uuid) -> Option<OutboxRecord> {
        self.records.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn save(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn claim_due(
        &self,
        limit: usize,
        now: OffsetDateTime,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let _gate = self
            .claim_gate
            .lock()
            .map_err(|_| OutboxError::storage("claim gate poisoned"))?;

        let mut due: Vec<OutboxRecord> = self
            .records
            .iter()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.value().clone())
            .collect();
        due.sort_by_key(|record| record.created_at);
        due.truncate(limit);

        for record in &mut due {
            record.mark_processing();
            self.records.insert(record.id, record.clone());
        }
        Ok(due)
    }

    async fn update(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn delete_sent_before(&self, cutoff: OffsetDateTime) -> Result<u64, OutboxError> {
        let before = self.records.len();
        self.records.retain(|_, record| {
            !(record.status == OutboxStatus::Sent
                && record.sent_at.is_some_and(|sent| sent < cutoff))
        });
        Ok(before.saturating_sub(self.records.len()) as u64)
    }

    async fn count_pending(&self) -> Result<u64, OutboxError> {
        let count = self
            .records
            .iter()
            .filter(|entry| {
                entry.status == OutboxStatus::Pending
                    || (entry.status == OutboxStatus::Failed
                        && entry.retry_count < entry.max_retry)
            })
            .count();
        Ok(count as u64)
    }

    async fn count_dead_letter(&self) -> Result<u64, OutboxError> {
        let count = self
            .records
            .iter()
            .filter(|entry| entry.status == OutboxStatus::DeadLetter)
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Serialize;

    use crate::messaging::event::DomainEvent;

    use super::*;

    #[derive(Serialize)]
    struct UserRegistered {
        user_id: String,
    }

    impl DomainEvent for UserRegistered {
        fn aggregate_identity(&self) -> String {
            self.user_id.clone()
        }

        fn aggregate_type(&self) -> &'static str {
            "User"
        }

        fn event_type(&self) -> &'static str {
            "UserRegisteredEvent"
        }
    }

    fn record(user: &str) -> OutboxRecord {
        let event = UserRegistered {
            user_id: user.to_string(),
        };
        OutboxRecord::from_event("USER_REGISTERED", &event, Some(user), 5)
            .expect("serializable event")
    }

    #[tokio::test]
    async fn claim_flips_records_to_processing() {
        let store = MemoryOutboxStore::new();
        let rec = record("u-1");
        store.save(&rec).await.expect("save");

        let claimed = store
            .claim_due(10, OffsetDateTime::now_utc())
            .await
            .expect("claim");
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, OutboxStatus::Processing);

        // A second claim finds nothing: the record is already taken.
        let again = store
            .claim_due(10, OffsetDateTime::now_utc())
            .await
            .expect("claim");
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn claim_is_oldest_first_and_bounded() {
        let store = MemoryOutboxStore::new();
        let mut first = record("u-1");
        first.created_at = OffsetDateTime::now_utc() - Duration::from_secs(60);
        store.save(&first).await.expect("save");
        store.save(&record("u-2")).await.expect("save");
        store.save(&record("u-3")).await.expect("save");

        let claimed = store
            .claim_due(2, OffsetDateTime::now_utc())
            .await
            .expect("claim");
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, first.id);
    }

    #[tokio::test]
    async fn failed_records_become_due_after_backoff() {
        let store = MemoryOutboxStore::new();
        let mut rec = record("u-1");
        rec.mark_failed("broker down");
        store.save(&rec).await.expect("save");

        let now = OffsetDateTime::now_utc();
        assert!(store.claim_due(10, now).await.expect("claim").is_empty());

        let later = now + Duration::from_secs(3 * 60);
        let claimed = store.claim_due(10, later).await.expect("claim");
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_sent_records() {
        let store = MemoryOutboxStore::new();

        let mut sent_old = record("u-1");
        sent_old.mark_sent();
        sent_old.sent_at = Some(OffsetDateTime::now_utc() - Duration::from_secs(10 * 24 * 3_600));
        store.save(&sent_old).await.expect("save");

        let mut sent_fresh = record("u-2");
        sent_fresh.mark_sent();
        store.save(&sent_fresh).await.expect("save");

        store.save(&record("u-3")).await.expect("save");

        let cutoff = OffsetDateTime::now_utc() - Duration::from_secs(7 * 24 * 3_600);
        let removed = store.delete_sent_before(cutoff).await.expect("cleanup");
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn counts_track_statuses() {
        let store = MemoryOutboxStore::new();
        store.save(&record("u-1")).await.expect("save");

        let mut dead = record("u-2");
        for _ in 0..dead.max_retry {
            dead.mark_failed("always failing");
        }
        store.save(&dead).await.expect("save");

        assert_eq!(store.count_pending().await.expect("count"), 1);
        assert_eq!(store.count_dead_letter().await.expect("count"), 1);
    }
}
