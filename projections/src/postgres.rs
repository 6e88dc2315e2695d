//! `PostgreSQL` implementations of the read-side stores.
//!
//! # Overview
//!
//! Provides `PostgreSQL`-backed storage for the projection engine:
//! - `client_daily_metrics` / `cohort_daily_metrics` tables with
//!   increment-style upserts (`PostgresMetricsStore`)
//! - `projection_watermarks` table for resumption (`PostgresWatermarkStore`)
//!
//! # Concurrency
//!
//! Client counter columns are updated with
//! `SET counter = table.counter + EXCLUDED.counter`, so two overlapping
//! projection cycles (a live cycle and a backfill) add their deltas instead
//! of overwriting each other. Cohort rows are full recomputations and are
//! replaced wholesale.
//!
//! # Example
//!
//! ```ignore
//! use caresight_projections::postgres::PostgresMetricsStore;
//!
//! let store = PostgresMetricsStore::new(pool);
//! store.migrate().await?;
//! ```

use caresight_core::metrics::{
    ClientDailyMetrics, CohortDailyMetrics, MetricsDelta, MetricsStore, ProjectionError, Result,
};
use caresight_core::watermark::{Watermark, WatermarkStore};
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

/// PostgreSQL-backed metrics store.
#[derive(Clone)]
pub struct PostgresMetricsStore {
    pool: PgPool,
}

impl PostgresMetricsStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own connection pool.
    ///
    /// Use this to keep the read side on a separate database from the
    /// outbox.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Run database migrations for the metrics and watermark tables.
    ///
    /// Missing-version checks are relaxed because the outbox migrations
    /// (in `caresight-postgres`) share the same migrations table when both
    /// sides live in one database.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if migration fails.
    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn client_row(row: &PgRow) -> ClientDailyMetrics {
        ClientDailyMetrics {
            client_id: row.get("client_id"),
            date: row.get("date"),
            risk_score_avg: row.get("risk_score_avg"),
            tasks_completed: row.get("tasks_completed"),
            tasks_active: row.get("tasks_active"),
            tasks_blocked: row.get("tasks_blocked"),
            alerts_open: row.get("alerts_open"),
            action_plan_versions_activated: row.get("action_plan_versions_activated"),
            updated_at: row.get("updated_at"),
        }
    }

    fn cohort_row(row: &PgRow) -> CohortDailyMetrics {
        CohortDailyMetrics {
            cohort_tag: row.get("cohort_tag"),
            date: row.get("date"),
            risk_score_avg: row.get("risk_score_avg"),
            tasks_completed: row.get("tasks_completed"),
            tasks_active: row.get("tasks_active"),
            tasks_blocked: row.get("tasks_blocked"),
            alerts_open: row.get("alerts_open"),
            action_plan_versions_activated: row.get("action_plan_versions_activated"),
            clients_reporting: row.get("clients_reporting"),
            updated_at: row.get("updated_at"),
        }
    }
}

const CLIENT_COLUMNS: &str = "client_id, date, risk_score_avg, tasks_completed, tasks_active, \
     tasks_blocked, alerts_open, action_plan_versions_activated, updated_at";

const COHORT_COLUMNS: &str = "cohort_tag, date, risk_score_avg, tasks_completed, tasks_active, \
     tasks_blocked, alerts_open, action_plan_versions_activated, clients_reporting, updated_at";

impl MetricsStore for PostgresMetricsStore {
    fn apply_client_delta(
        &self,
        client_id: &str,
        date: NaiveDate,
        delta: &MetricsDelta,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let client_id = client_id.to_string();
        let delta = delta.clone();
        Box::pin(async move {
            // Counters increment atomically; the risk score overwrites only
            // when the delta carries one (COALESCE keeps the old value).
            sqlx::query(
                "INSERT INTO client_daily_metrics
                     (client_id, date, risk_score_avg, tasks_completed, tasks_active,
                      tasks_blocked, alerts_open, action_plan_versions_activated, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
                 ON CONFLICT (client_id, date) DO UPDATE
                 SET risk_score_avg = COALESCE(EXCLUDED.risk_score_avg,
                                               client_daily_metrics.risk_score_avg),
                     tasks_completed = client_daily_metrics.tasks_completed
                                       + EXCLUDED.tasks_completed,
                     tasks_active = client_daily_metrics.tasks_active
                                    + EXCLUDED.tasks_active,
                     tasks_blocked = client_daily_metrics.tasks_blocked
                                     + EXCLUDED.tasks_blocked,
                     alerts_open = client_daily_metrics.alerts_open
                                   + EXCLUDED.alerts_open,
                     action_plan_versions_activated =
                         client_daily_metrics.action_plan_versions_activated
                         + EXCLUDED.action_plan_versions_activated,
                     updated_at = now()",
            )
            .bind(&client_id)
            .bind(date)
            .bind(delta.risk_score.map(|(_, score)| score))
            .bind(delta.tasks_completed)
            .bind(delta.tasks_active)
            .bind(delta.tasks_blocked)
            .bind(delta.alerts_open)
            .bind(delta.action_plan_versions_activated)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to apply delta: {e}")))?;

            Ok(())
        })
    }

    fn upsert_cohort(
        &self,
        row: CohortDailyMetrics,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO cohort_daily_metrics
                     (cohort_tag, date, risk_score_avg, tasks_completed, tasks_active,
                      tasks_blocked, alerts_open, action_plan_versions_activated,
                      clients_reporting, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
                 ON CONFLICT (cohort_tag, date) DO UPDATE
                 SET risk_score_avg = EXCLUDED.risk_score_avg,
                     tasks_completed = EXCLUDED.tasks_completed,
                     tasks_active = EXCLUDED.tasks_active,
                     tasks_blocked = EXCLUDED.tasks_blocked,
                     alerts_open = EXCLUDED.alerts_open,
                     action_plan_versions_activated = EXCLUDED.action_plan_versions_activated,
                     clients_reporting = EXCLUDED.clients_reporting,
                     updated_at = now()",
            )
            .bind(&row.cohort_tag)
            .bind(row.date)
            .bind(row.risk_score_avg)
            .bind(row.tasks_completed)
            .bind(row.tasks_active)
            .bind(row.tasks_blocked)
            .bind(row.alerts_open)
            .bind(row.action_plan_versions_activated)
            .bind(row.clients_reporting)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to upsert cohort: {e}")))?;

            Ok(())
        })
    }

    fn clients_on_date(
        &self,
        client_ids: &[String],
        date: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ClientDailyMetrics>>> + Send + '_>> {
        let client_ids = client_ids.to_vec();
        Box::pin(async move {
            let query = format!(
                "SELECT {CLIENT_COLUMNS}
                 FROM client_daily_metrics
                 WHERE client_id = ANY($1) AND date = $2"
            );
            let rows = sqlx::query(&query)
                .bind(&client_ids)
                .bind(date)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    ProjectionError::Storage(format!("Failed to load member rows: {e}"))
                })?;

            Ok(rows.iter().map(Self::client_row).collect())
        })
    }

    fn client_range(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ClientDailyMetrics>>> + Send + '_>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            let query = format!(
                "SELECT {CLIENT_COLUMNS}
                 FROM client_daily_metrics
                 WHERE client_id = $1 AND date BETWEEN $2 AND $3
                 ORDER BY date ASC"
            );
            let rows = sqlx::query(&query)
                .bind(&client_id)
                .bind(from)
                .bind(to)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    ProjectionError::Storage(format!("Failed to load client range: {e}"))
                })?;

            Ok(rows.iter().map(Self::client_row).collect())
        })
    }

    fn client_latest(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ClientDailyMetrics>>> + Send + '_>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            let query = format!(
                "SELECT {CLIENT_COLUMNS}
                 FROM client_daily_metrics
                 WHERE client_id = $1
                 ORDER BY date DESC
                 LIMIT 1"
            );
            let row = sqlx::query(&query)
                .bind(&client_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    ProjectionError::Storage(format!("Failed to load latest row: {e}"))
                })?;

            Ok(row.as_ref().map(Self::client_row))
        })
    }

    fn cohort_range(
        &self,
        cohort_tag: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CohortDailyMetrics>>> + Send + '_>> {
        let cohort_tag = cohort_tag.to_string();
        Box::pin(async move {
            let query = format!(
                "SELECT {COHORT_COLUMNS}
                 FROM cohort_daily_metrics
                 WHERE cohort_tag = $1 AND date BETWEEN $2 AND $3
                 ORDER BY date ASC"
            );
            let rows = sqlx::query(&query)
                .bind(&cohort_tag)
                .bind(from)
                .bind(to)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    ProjectionError::Storage(format!("Failed to load cohort range: {e}"))
                })?;

            Ok(rows.iter().map(Self::cohort_row).collect())
        })
    }

    fn cohort_latest(
        &self,
        cohort_tag: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CohortDailyMetrics>>> + Send + '_>> {
        let cohort_tag = cohort_tag.to_string();
        Box::pin(async move {
            let query = format!(
                "SELECT {COHORT_COLUMNS}
                 FROM cohort_daily_metrics
                 WHERE cohort_tag = $1
                 ORDER BY date DESC
                 LIMIT 1"
            );
            let row = sqlx::query(&query)
                .bind(&cohort_tag)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    ProjectionError::Storage(format!("Failed to load latest cohort: {e}"))
                })?;

            Ok(row.as_ref().map(Self::cohort_row))
        })
    }
}

/// PostgreSQL-backed watermark store.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE projection_watermarks (
///     projection_name TEXT PRIMARY KEY,
///     occurred_at TIMESTAMPTZ NOT NULL,
///     event_id UUID NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
#[derive(Clone)]
pub struct PostgresWatermarkStore {
    pool: PgPool,
}

impl PostgresWatermarkStore {
    /// Create a watermark store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl WatermarkStore for PostgresWatermarkStore {
    fn save(
        &self,
        projection_name: &str,
        watermark: Watermark,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO projection_watermarks
                     (projection_name, occurred_at, event_id, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (projection_name) DO UPDATE
                 SET occurred_at = EXCLUDED.occurred_at,
                     event_id = EXCLUDED.event_id,
                     updated_at = now()",
            )
            .bind(projection_name)
            .bind(watermark.occurred_at)
            .bind(watermark.event_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                ProjectionError::Watermark(format!("Failed to save watermark: {e}"))
            })?;

            Ok(())
        })
    }

    fn load(
        &self,
        projection_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Watermark>>> + Send + '_>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT occurred_at, event_id
                 FROM projection_watermarks
                 WHERE projection_name = $1",
            )
            .bind(projection_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                ProjectionError::Watermark(format!("Failed to load watermark: {e}"))
            })?;

            Ok(row.map(|r| Watermark::new(r.get("occurred_at"), r.get("event_id"))))
        })
    }
}
