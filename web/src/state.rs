//! Shared state and response metadata for the read API.

use caresight_core::directory::ClientDirectory;
use caresight_core::metrics::MetricsStore;
use caresight_core::outbox::OutboxStore;
use caresight_telemetry::LagMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Freshness disclosure attached to every analytics response.
#[derive(Clone, Debug, Serialize)]
pub struct ResponseMetadata {
    /// When this response was generated.
    pub generated_at: DateTime<Utc>,
    /// Identifier of the code that produced the projection.
    pub source_version: String,
    /// Seconds between now and the most recently ingested event. `None`
    /// when nothing was ever ingested, or when the outbox probe failed
    /// (degraded disclosure, not an error).
    pub data_lag_seconds: Option<f64>,
}

/// Shared dependencies of the analytics handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Projected metric rows.
    pub metrics: Arc<dyn MetricsStore>,
    /// Client/organization/cohort lookups.
    pub directory: Arc<dyn ClientDirectory>,
    /// Outbox probe for staleness disclosure.
    pub outbox: Arc<dyn OutboxStore>,
    /// Version stamped into response metadata.
    pub source_version: String,
    /// Lag above this emits a warning log alongside the gauge.
    pub lag_warn_threshold: Duration,
}

impl ApiState {
    /// Create state with the crate version and a 60s lag threshold.
    #[must_use]
    pub fn new(
        metrics: Arc<dyn MetricsStore>,
        directory: Arc<dyn ClientDirectory>,
        outbox: Arc<dyn OutboxStore>,
    ) -> Self {
        Self {
            metrics,
            directory,
            outbox,
            source_version: env!("CARGO_PKG_VERSION").to_string(),
            lag_warn_threshold: Duration::from_secs(60),
        }
    }

    /// Override the advertised source version.
    #[must_use]
    pub fn with_source_version(mut self, version: impl Into<String>) -> Self {
        self.source_version = version.into();
        self
    }

    /// Override the lag warning threshold.
    #[must_use]
    pub const fn with_lag_warn_threshold(mut self, threshold: Duration) -> Self {
        self.lag_warn_threshold = threshold;
        self
    }

    /// Build response metadata, degrading the lag field when the outbox
    /// probe fails rather than failing the response.
    pub async fn metadata(&self) -> ResponseMetadata {
        let now = Utc::now();
        let data_lag_seconds = match self.outbox.latest_ingested_at().await {
            Ok(Some(newest)) => {
                let lag = (now - newest).to_std().unwrap_or(Duration::ZERO);
                LagMetrics::observe(lag, self.lag_warn_threshold);
                Some(lag.as_secs_f64())
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Outbox unreachable; omitting data lag");
                None
            }
        };

        ResponseMetadata {
            generated_at: now,
            source_version: self.source_version.clone(),
            data_lag_seconds,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use caresight_core::event::{EventEnvelope, EventPayload, TaskState};
    use caresight_core::outbox::OutboxRecord;
    use caresight_testing::{InMemoryMetricsStore, InMemoryOutboxStore, StaticDirectory};

    fn state_with(outbox: &InMemoryOutboxStore) -> ApiState {
        ApiState::new(
            Arc::new(InMemoryMetricsStore::new()),
            Arc::new(StaticDirectory::new()),
            Arc::new(outbox.clone()),
        )
    }

    #[tokio::test]
    async fn empty_outbox_has_no_lag_value() {
        let outbox = InMemoryOutboxStore::new();
        let metadata = state_with(&outbox).metadata().await;

        assert!(metadata.data_lag_seconds.is_none());
        assert_eq!(metadata.source_version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn lag_measures_distance_to_newest_event() {
        let outbox = InMemoryOutboxStore::new();
        let mut envelope = EventEnvelope::new(EventPayload::TaskStateChanged {
            task_id: "task-1".to_string(),
            client_id: "client-1".to_string(),
            previous_state: None,
            new_state: TaskState::InProgress,
        });
        envelope.occurred_at = Utc::now() - chrono::Duration::seconds(90);
        outbox
            .insert(OutboxRecord::from_envelope(&envelope).unwrap())
            .await
            .unwrap();

        let metadata = state_with(&outbox).metadata().await;
        let lag = metadata.data_lag_seconds.unwrap();
        assert!(lag >= 90.0 && lag < 120.0, "lag was {lag}");
    }

    #[tokio::test]
    async fn probe_failure_degrades_to_no_lag() {
        let outbox = InMemoryOutboxStore::new();
        outbox.fail_fetches(true);

        let metadata = state_with(&outbox).metadata().await;
        assert!(metadata.data_lag_seconds.is_none());
    }
}
