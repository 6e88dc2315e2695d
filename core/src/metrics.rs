//! Projected metric rows, deltas, and the metrics store abstraction.
//!
//! The projection engine turns a batch of events into signed
//! [`MetricsDelta`]s per `(client, date)` key and asks the store to apply
//! them. Stores must apply counter deltas with atomic increment-style
//! upserts (`counter = counter + delta`), never whole-row overwrites, so two
//! overlapping projection cycles (a live cycle and a backfill) cannot lose
//! each other's updates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Error type for projection and metrics store operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Watermark load/save error.
    #[error("Watermark error: {0}")]
    Watermark(String),

    /// Directory lookup error during cohort rollup.
    #[error("Directory error: {0}")]
    Directory(String),

    /// Event processing error.
    #[error("Event processing error: {0}")]
    EventProcessing(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Daily metric row for one client.
///
/// One row per `(client_id, date)`. Counters are running totals adjusted by
/// signed deltas; `risk_score_avg` is last-write-wins within the day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientDailyMetrics {
    /// The client this row belongs to.
    pub client_id: String,
    /// The day this row covers (UTC).
    pub date: NaiveDate,
    /// Most recent risk score recorded that day, if any.
    pub risk_score_avg: Option<f64>,
    /// Tasks completed that day.
    pub tasks_completed: i64,
    /// Net change in active tasks; can be negative for a day that only
    /// closed work out.
    pub tasks_active: i64,
    /// Tasks that became blocked that day.
    pub tasks_blocked: i64,
    /// Alerts opened that day.
    pub alerts_open: i64,
    /// Action-plan versions activated that day.
    pub action_plan_versions_activated: i64,
    /// When the row was last touched.
    pub updated_at: DateTime<Utc>,
}

/// Daily metric row for one cohort.
///
/// Derived by summing counters across member clients for the date and
/// averaging `risk_score_avg` over members with a non-null value; the
/// average is `None` when no member reports a score that day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CohortDailyMetrics {
    /// The cohort tag this row belongs to.
    pub cohort_tag: String,
    /// The day this row covers (UTC).
    pub date: NaiveDate,
    /// Mean risk score over members with a score that day.
    pub risk_score_avg: Option<f64>,
    /// Sum of member task completions.
    pub tasks_completed: i64,
    /// Sum of member net active-task changes.
    pub tasks_active: i64,
    /// Sum of member blocked-task counts.
    pub tasks_blocked: i64,
    /// Sum of member opened alerts.
    pub alerts_open: i64,
    /// Sum of member plan activations.
    pub action_plan_versions_activated: i64,
    /// How many members had a row for the date.
    pub clients_reporting: i64,
    /// When the row was last touched.
    pub updated_at: DateTime<Utc>,
}

/// Signed metric changes derived from one or more events.
///
/// Deltas for a single `(client, date)` key are merged across a batch before
/// being applied, so one store round-trip carries the batch's net effect.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsDelta {
    /// Change in completed tasks.
    pub tasks_completed: i64,
    /// Net change in active tasks.
    pub tasks_active: i64,
    /// Change in blocked tasks.
    pub tasks_blocked: i64,
    /// Change in opened alerts.
    pub alerts_open: i64,
    /// Change in activated plan versions.
    pub action_plan_versions_activated: i64,
    /// Risk score stamped with its event time; merging keeps the latest
    /// (last-write-wins), it is never summed or averaged.
    pub risk_score: Option<(DateTime<Utc>, f64)>,
}

impl MetricsDelta {
    /// Merge another delta into this one.
    ///
    /// Counters add; the risk score keeps whichever observation has the
    /// later event timestamp.
    pub fn merge(&mut self, other: &Self) {
        self.tasks_completed += other.tasks_completed;
        self.tasks_active += other.tasks_active;
        self.tasks_blocked += other.tasks_blocked;
        self.alerts_open += other.alerts_open;
        self.action_plan_versions_activated += other.action_plan_versions_activated;

        match (self.risk_score, other.risk_score) {
            (None, Some(score)) => self.risk_score = Some(score),
            (Some((at, _)), Some((other_at, _))) if other_at >= at => {
                self.risk_score = other.risk_score;
            }
            _ => {}
        }
    }

    /// Whether applying this delta would change nothing.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.tasks_completed == 0
            && self.tasks_active == 0
            && self.tasks_blocked == 0
            && self.alerts_open == 0
            && self.action_plan_versions_activated == 0
            && self.risk_score.is_none()
    }
}

/// Storage abstraction for projected metric rows.
///
/// # Implementations
///
/// - `PostgresMetricsStore` (in `caresight-projections`): production storage
/// - `InMemoryMetricsStore` (in `caresight-testing`): deterministic tests
pub trait MetricsStore: Send + Sync {
    /// Apply a delta to the `(client_id, date)` row, creating it on first
    /// touch.
    ///
    /// Counter fields must be applied as atomic increments; the risk score
    /// overwrites only when the delta carries one.
    fn apply_client_delta(
        &self,
        client_id: &str,
        date: NaiveDate,
        delta: &MetricsDelta,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Upsert a cohort row wholesale.
    ///
    /// Cohort rows are recomputed from member rows, so unlike client rows
    /// they are replaced, not incremented.
    fn upsert_cohort(
        &self,
        row: CohortDailyMetrics,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Member rows for a set of clients on one date.
    fn clients_on_date(
        &self,
        client_ids: &[String],
        date: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ClientDailyMetrics>>> + Send + '_>>;

    /// Client rows in `[from, to]`, ascending by date.
    fn client_range(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ClientDailyMetrics>>> + Send + '_>>;

    /// The client's newest row, if any.
    fn client_latest(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ClientDailyMetrics>>> + Send + '_>>;

    /// Cohort rows in `[from, to]`, ascending by date.
    fn cohort_range(
        &self,
        cohort_tag: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CohortDailyMetrics>>> + Send + '_>>;

    /// The cohort's newest row, if any.
    fn cohort_latest(
        &self,
        cohort_tag: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CohortDailyMetrics>>> + Send + '_>>;
}
