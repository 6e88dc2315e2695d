//! The incremental metrics projection engine.
//!
//! [`MetricsProjection`] consumes delivered outbox rows and maintains the
//! per-(client, date) daily metric rows plus the cohort rollups derived from
//! them. It is registered as an ordinary event handler for all four event
//! types, so it receives events from the outbox processor like any other
//! consumer.
//!
//! # Idempotence
//!
//! The engine applies signed *deltas*, so replaying an applied batch would
//! double count. Every batch is filtered against the projection watermark
//! first and the watermark advances only after the batch's deltas are in
//! the store; re-running an already-watermarked batch is a no-op.
//!
//! # Garbage tolerance
//!
//! Producers of outbox rows are not under this crate's control. A row whose
//! payload fails to decode, or whose fields are unusable (e.g. a non-finite
//! risk score), degrades to a zero-effect delta for that row: it is logged,
//! counted as skipped, and still covered by the advancing watermark.

use crate::cohort;
use caresight_core::directory::ClientDirectory;
use caresight_core::event::{EventPayload, TaskState};
use caresight_core::handler::{EventHandler, HandlerError};
use caresight_core::metrics::{MetricsDelta, MetricsStore, ProjectionError, Result};
use caresight_core::outbox::OutboxRecord;
use caresight_core::watermark::{Watermark, WatermarkStore};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Watermark name under which this projection tracks its progress.
pub const PROJECTION_NAME: &str = "client_daily_metrics";

/// Outcome of one batch application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppliedBatch {
    /// Rows whose deltas were applied.
    pub applied: usize,
    /// Rows skipped: already watermarked, undecodable, or zero-effect.
    pub skipped: usize,
}

/// Projects domain events into daily metric rows for clients and cohorts.
pub struct MetricsProjection {
    metrics: Arc<dyn MetricsStore>,
    watermarks: Arc<dyn WatermarkStore>,
    directory: Arc<dyn ClientDirectory>,
}

impl MetricsProjection {
    /// Create a new projection engine.
    #[must_use]
    pub fn new(
        metrics: Arc<dyn MetricsStore>,
        watermarks: Arc<dyn WatermarkStore>,
        directory: Arc<dyn ClientDirectory>,
    ) -> Self {
        Self {
            metrics,
            watermarks,
            directory,
        }
    }

    /// Apply a batch of delivered rows.
    ///
    /// Rows already covered by the watermark are skipped. The remaining
    /// rows are decoded defensively, folded into net deltas per
    /// `(client, date)` key, applied through atomic increments, and the
    /// touched cohort rollups are recomputed. The watermark advances to the
    /// newest consumed row only after everything is stored.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] on store or directory failures. Malformed
    /// rows are not errors; they degrade to zero-effect deltas.
    pub async fn apply_batch(&self, records: &[OutboxRecord]) -> Result<AppliedBatch> {
        let watermark = self.watermarks.load(PROJECTION_NAME).await?;

        let mut fresh: Vec<&OutboxRecord> = records
            .iter()
            .filter(|r| !watermark.is_some_and(|wm| wm.covers(r.occurred_at, r.id)))
            .collect();
        // Timestamp order makes last-write-wins deterministic within the batch.
        fresh.sort_by_key(|r| (r.occurred_at, r.id));

        let mut stats = AppliedBatch {
            applied: 0,
            skipped: records.len() - fresh.len(),
        };
        if fresh.is_empty() {
            return Ok(stats);
        }

        // Fold the batch into net deltas per (client, day).
        let mut deltas: BTreeMap<(String, NaiveDate), MetricsDelta> = BTreeMap::new();
        for record in &fresh {
            match record.decode() {
                Ok(envelope) => {
                    let delta = delta_for(&envelope.payload, envelope.occurred_at);
                    if delta.is_zero() {
                        stats.skipped += 1;
                        continue;
                    }
                    let key = (
                        envelope.payload.client_id().to_string(),
                        envelope.occurred_at.date_naive(),
                    );
                    deltas.entry(key).or_default().merge(&delta);
                    stats.applied += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        event_id = %record.id,
                        event_type = %record.event_type,
                        error = %e,
                        "Undecodable outbox row; projecting zero effect"
                    );
                    stats.skipped += 1;
                }
            }
        }

        for ((client_id, date), delta) in &deltas {
            self.metrics.apply_client_delta(client_id, *date, delta).await?;
            tracing::debug!(
                client_id = %client_id,
                date = %date,
                "Applied metrics delta"
            );
        }

        self.refresh_cohorts(deltas.keys()).await?;

        // Advance only after the deltas are stored; a failure above re-runs
        // the batch on the next delivery.
        let newest = fresh
            .iter()
            .map(|r| (r.occurred_at, r.id))
            .max()
            .map(|(occurred_at, id)| Watermark::new(occurred_at, id));
        if let Some(watermark) = newest {
            self.watermarks.save(PROJECTION_NAME, watermark).await?;
        }

        Ok(stats)
    }

    /// Recompute cohort rows touched by the applied client deltas.
    async fn refresh_cohorts(
        &self,
        touched: impl Iterator<Item = &(String, NaiveDate)>,
    ) -> Result<()> {
        let mut targets: BTreeSet<(String, NaiveDate)> = BTreeSet::new();
        for (client_id, date) in touched {
            let cohorts = self
                .directory
                .cohorts_of(client_id)
                .await
                .map_err(|e| ProjectionError::Directory(e.to_string()))?;
            for cohort_tag in cohorts {
                targets.insert((cohort_tag, *date));
            }
        }

        for (cohort_tag, date) in targets {
            let members = self
                .directory
                .members_of(&cohort_tag)
                .await
                .map_err(|e| ProjectionError::Directory(e.to_string()))?;
            let rows = self.metrics.clients_on_date(&members, date).await?;
            let rollup = cohort::aggregate(&cohort_tag, date, &rows, Utc::now());
            self.metrics.upsert_cohort(rollup).await?;
        }

        Ok(())
    }
}

impl EventHandler for MetricsProjection {
    fn name(&self) -> &str {
        PROJECTION_NAME
    }

    fn handle(
        &self,
        record: &OutboxRecord,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), HandlerError>> + Send + '_>> {
        let record = record.clone();
        Box::pin(async move {
            self.apply_batch(std::slice::from_ref(&record))
                .await
                .map(|_| ())
                .map_err(|e| HandlerError::new(PROJECTION_NAME, e.to_string()))
        })
    }
}

/// Map one event to its metric delta. Pure and total: events the projection
/// does not understand, and unusable field values, yield a zero delta.
#[must_use]
pub fn delta_for(payload: &EventPayload, occurred_at: DateTime<Utc>) -> MetricsDelta {
    let mut delta = MetricsDelta::default();

    match payload {
        EventPayload::TaskStateChanged {
            previous_state,
            new_state,
            ..
        } => {
            if *new_state == TaskState::Completed {
                delta.tasks_completed += 1;
            }
            if *new_state == TaskState::Blocked {
                delta.tasks_blocked += 1;
            }

            let was_active = previous_state.is_some_and(TaskState::is_active);
            if was_active && !new_state.is_active() {
                delta.tasks_active -= 1;
            }
            if !was_active && new_state.is_active() {
                delta.tasks_active += 1;
            }
        }
        EventPayload::AlertCreated { .. } => {
            delta.alerts_open += 1;
        }
        EventPayload::AssessmentRecorded { risk_score, .. } => {
            // A non-finite score is producer garbage; degrade to no effect.
            if risk_score.is_finite() {
                delta.risk_score = Some((occurred_at, *risk_score));
            }
        }
        EventPayload::ActionPlanVersionActivated { .. } => {
            delta.action_plan_versions_activated += 1;
        }
    }

    delta
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    fn task_change(previous: Option<TaskState>, new: TaskState) -> EventPayload {
        EventPayload::TaskStateChanged {
            task_id: "task-1".to_string(),
            client_id: "client-1".to_string(),
            previous_state: previous,
            new_state: new,
        }
    }

    #[test]
    fn completing_an_active_task() {
        let delta = delta_for(
            &task_change(Some(TaskState::InProgress), TaskState::Completed),
            Utc::now(),
        );

        assert_eq!(delta.tasks_completed, 1);
        assert_eq!(delta.tasks_active, -1);
        assert_eq!(delta.tasks_blocked, 0);
    }

    #[test]
    fn starting_a_task_activates_it() {
        let delta = delta_for(
            &task_change(Some(TaskState::NotStarted), TaskState::InProgress),
            Utc::now(),
        );

        assert_eq!(delta.tasks_active, 1);
        assert_eq!(delta.tasks_completed, 0);
    }

    #[test]
    fn blocking_an_active_task() {
        let delta = delta_for(
            &task_change(Some(TaskState::InProgress), TaskState::Blocked),
            Utc::now(),
        );

        assert_eq!(delta.tasks_blocked, 1);
        assert_eq!(delta.tasks_active, -1);
    }

    #[test]
    fn unblocking_back_to_in_progress() {
        let delta = delta_for(
            &task_change(Some(TaskState::Blocked), TaskState::InProgress),
            Utc::now(),
        );

        assert_eq!(delta.tasks_active, 1);
        assert_eq!(delta.tasks_blocked, 0);
    }

    #[test]
    fn brand_new_completed_task_does_not_touch_active() {
        let delta = delta_for(&task_change(None, TaskState::Completed), Utc::now());

        assert_eq!(delta.tasks_completed, 1);
        assert_eq!(delta.tasks_active, 0);
    }

    #[test]
    fn alert_opens_one() {
        let delta = delta_for(
            &EventPayload::AlertCreated {
                alert_id: "alert-1".to_string(),
                client_id: "client-1".to_string(),
                severity: caresight_core::event::AlertSeverity::Warning,
            },
            Utc::now(),
        );

        assert_eq!(delta.alerts_open, 1);
    }

    #[test]
    fn assessment_stamps_risk_score_with_event_time() {
        let at = Utc::now();
        let delta = delta_for(
            &EventPayload::AssessmentRecorded {
                assessment_id: "assessment-1".to_string(),
                client_id: "client-1".to_string(),
                risk_score: 72.5,
            },
            at,
        );

        assert_eq!(delta.risk_score, Some((at, 72.5)));
    }

    #[test]
    fn non_finite_risk_score_degrades_to_zero_effect() {
        let delta = delta_for(
            &EventPayload::AssessmentRecorded {
                assessment_id: "assessment-1".to_string(),
                client_id: "client-1".to_string(),
                risk_score: f64::NAN,
            },
            Utc::now(),
        );

        assert!(delta.is_zero());
    }

    #[test]
    fn plan_activation_counts_one() {
        let delta = delta_for(
            &EventPayload::ActionPlanVersionActivated {
                plan_id: "plan-1".to_string(),
                client_id: "client-1".to_string(),
                version: 4,
            },
            Utc::now(),
        );

        assert_eq!(delta.action_plan_versions_activated, 1);
    }
}
