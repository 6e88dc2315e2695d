//! Dead-letter queue for deliveries that exhausted their retry budget.
//!
//! Only the processor's retry completion policy writes here. Entries keep
//! the full serialized envelope so an operator can fix the downstream
//! handler and replay the event manually, then mark the entry resolved.

use caresight_core::dead_letter::{DeadLetterRecord, DeadLetterSink};
use caresight_core::outbox::OutboxError;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// Status of a dead-lettered delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Waiting for investigation or reprocessing.
    Pending,
    /// Successfully reprocessed.
    Resolved,
    /// Permanently discarded (cannot be fixed).
    Discarded,
}

impl DeadLetterStatus {
    /// Convert status to its database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from a database string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, OutboxError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(OutboxError::Database(format!(
                "Invalid dead-letter status: {s}"
            ))),
        }
    }
}

/// A stored dead-letter entry with its triage state.
#[derive(Debug, Clone)]
pub struct StoredDeadLetter {
    /// Row id of the entry.
    pub id: i64,
    /// The failed delivery.
    pub record: DeadLetterRecord,
    /// When the entry was written.
    pub failed_at: DateTime<Utc>,
    /// Current triage status.
    pub status: DeadLetterStatus,
    /// When the entry was resolved or discarded, if it was.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Notes about the resolution.
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-based dead-letter queue for failed outbox deliveries.
///
/// # Example
///
/// ```no_run
/// use caresight_postgres::PostgresDeadLetterQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = PostgresDeadLetterQueue::new(pool);
///
/// let pending = dlq.list_pending(100).await?;
/// println!("Pending failures: {}", pending.len());
/// # Ok(())
/// # }
/// ```
pub struct PostgresDeadLetterQueue {
    pool: PgPool,
}

impl PostgresDeadLetterQueue {
    /// Create a new dead-letter queue with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<StoredDeadLetter>, OutboxError> {
        #[allow(clippy::cast_possible_wrap)] // Limits are far below i64::MAX
        let rows = sqlx::query(
            "SELECT id, event_id, event_type, payload, handler, error, attempts,
                    occurred_at, failed_at, status, resolved_at, resolution_notes
             FROM failed_deliveries
             WHERE status = 'pending'
             ORDER BY failed_at ASC
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Get one entry by row id.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails or the entry
    /// does not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<StoredDeadLetter, OutboxError> {
        let row = sqlx::query(
            "SELECT id, event_id, event_type, payload, handler, error, attempts,
                    occurred_at, failed_at, status, resolved_at, resolution_notes
             FROM failed_deliveries
             WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        Self::row_to_entry(&row)
    }

    /// Mark an entry resolved after successful manual reprocessing.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, notes: Option<&str>) -> Result<(), OutboxError> {
        sqlx::query(
            "UPDATE failed_deliveries
             SET status = 'resolved', resolved_at = NOW(), resolution_notes = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(notes)
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        tracing::info!(dead_letter_id = id, "Dead-letter entry resolved");
        metrics::counter!("analytics_dead_letters_resolved_total").increment(1);

        Ok(())
    }

    /// Permanently discard an entry that cannot be fixed.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), OutboxError> {
        sqlx::query(
            "UPDATE failed_deliveries
             SET status = 'discarded', resolved_at = NOW(), resolution_notes = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        tracing::warn!(dead_letter_id = id, reason, "Dead-letter entry discarded");

        Ok(())
    }

    /// Count of pending entries, for monitoring and health checks.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, OutboxError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM failed_deliveries WHERE status = 'pending'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        Ok(count)
    }

    fn row_to_entry(row: &PgRow) -> Result<StoredDeadLetter, OutboxError> {
        let status_str: String = row.get("status");
        let status = DeadLetterStatus::parse(&status_str)?;

        Ok(StoredDeadLetter {
            id: row.get("id"),
            record: DeadLetterRecord {
                event_id: row.get("event_id"),
                event_type: row.get("event_type"),
                payload: row.get("payload"),
                handler: row.get("handler"),
                error: row.get("error"),
                attempts: row.get("attempts"),
                occurred_at: row.get("occurred_at"),
            },
            failed_at: row.get("failed_at"),
            status,
            resolved_at: row.get("resolved_at"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

impl DeadLetterSink for PostgresDeadLetterQueue {
    fn push(
        &self,
        record: DeadLetterRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let id: (i64,) = sqlx::query_as(
                "INSERT INTO failed_deliveries
                     (event_id, event_type, payload, handler, error, attempts, occurred_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING id",
            )
            .bind(record.event_id)
            .bind(&record.event_type)
            .bind(&record.payload)
            .bind(&record.handler)
            .bind(&record.error)
            .bind(record.attempts)
            .bind(record.occurred_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

            tracing::warn!(
                dead_letter_id = id.0,
                event_id = %record.event_id,
                event_type = %record.event_type,
                handler = %record.handler,
                attempts = record.attempts,
                "Delivery added to dead-letter queue"
            );

            metrics::counter!(
                "analytics_dead_letters_total",
                "event_type" => record.event_type.clone(),
            )
            .increment(1);

            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dead_letter_status_roundtrip() {
        for status in &[
            DeadLetterStatus::Pending,
            DeadLetterStatus::Resolved,
            DeadLetterStatus::Discarded,
        ] {
            let s = status.as_str();
            let parsed = DeadLetterStatus::parse(s).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn dead_letter_status_invalid() {
        assert!(DeadLetterStatus::parse("processing").is_err());
        assert!(DeadLetterStatus::parse("").is_err());
    }
}
