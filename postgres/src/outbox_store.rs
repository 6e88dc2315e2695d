//! `PostgreSQL` implementation of the transactional outbox store.

use caresight_core::outbox::{OutboxError, OutboxRecord, OutboxStore};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// `PostgreSQL`-backed outbox store.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE outbox_events (
///     id UUID PRIMARY KEY,
///     event_type TEXT NOT NULL,
///     aggregate_type TEXT NOT NULL,
///     aggregate_id TEXT NOT NULL,
///     payload JSONB NOT NULL,
///     occurred_at TIMESTAMPTZ NOT NULL,
///     attempts INT NOT NULL DEFAULT 0,
///     processed_at TIMESTAMPTZ
/// );
/// ```
///
/// The partial index on `processed_at IS NULL` keeps the processor's poll
/// query cheap no matter how much processed history accumulates; processed
/// rows are archival candidates, not this store's concern.
///
/// # Example
///
/// ```ignore
/// use caresight_postgres::PostgresOutboxStore;
///
/// let store = PostgresOutboxStore::connect("postgres://localhost/caresight").await?;
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, OutboxError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| OutboxError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Run database migrations for the outbox and dead-letter tables.
    ///
    /// Missing-version checks are relaxed because the read-side migrations
    /// (in `caresight-projections`) share the same migrations table when
    /// both sides live in one database.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if migration fails.
    pub async fn migrate(&self) -> Result<(), OutboxError> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: &PgRow) -> OutboxRecord {
        OutboxRecord {
            id: row.get("id"),
            event_type: row.get("event_type"),
            aggregate_type: row.get("aggregate_type"),
            aggregate_id: row.get("aggregate_id"),
            payload: row.get("payload"),
            occurred_at: row.get("occurred_at"),
            attempts: row.get("attempts"),
            processed_at: row.get("processed_at"),
        }
    }
}

impl OutboxStore for PostgresOutboxStore {
    fn insert(
        &self,
        record: OutboxRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO outbox_events
                     (id, event_type, aggregate_type, aggregate_id, payload,
                      occurred_at, attempts, processed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, 0, NULL)",
            )
            .bind(record.id)
            .bind(&record.event_type)
            .bind(&record.aggregate_type)
            .bind(&record.aggregate_id)
            .bind(&record.payload)
            .bind(record.occurred_at)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(format!("Failed to insert: {e}")))?;

            Ok(())
        })
    }

    fn fetch_unprocessed(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxRecord>, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Batch sizes are far below i64::MAX
            let rows = sqlx::query(
                "SELECT id, event_type, aggregate_type, aggregate_id, payload,
                        occurred_at, attempts, processed_at
                 FROM outbox_events
                 WHERE processed_at IS NULL
                 ORDER BY occurred_at ASC
                 LIMIT $1",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(format!("Failed to fetch: {e}")))?;

            Ok(rows.iter().map(Self::row_to_record).collect())
        })
    }

    fn mark_processed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        Box::pin(async move {
            // The guard makes the null -> timestamp transition one-shot.
            sqlx::query(
                "UPDATE outbox_events
                 SET processed_at = $2
                 WHERE id = $1 AND processed_at IS NULL",
            )
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(format!("Failed to mark processed: {e}")))?;

            Ok(())
        })
    }

    fn record_attempt(
        &self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<i32, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                "UPDATE outbox_events
                 SET attempts = attempts + 1
                 WHERE id = $1
                 RETURNING attempts",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(format!("Failed to record attempt: {e}")))?;

            row.map(|r| r.get("attempts"))
                .ok_or(OutboxError::RecordNotFound(id))
        })
    }

    fn latest_ingested_at(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DateTime<Utc>>, OutboxError>> + Send + '_>>
    {
        Box::pin(async move {
            let row = sqlx::query("SELECT MAX(occurred_at) AS newest FROM outbox_events")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| OutboxError::Database(format!("Failed to query newest: {e}")))?;

            Ok(row.get("newest"))
        })
    }
}
