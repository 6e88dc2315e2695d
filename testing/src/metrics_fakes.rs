//! In-memory metrics store and watermark store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already failed

use caresight_core::metrics::{
    ClientDailyMetrics, CohortDailyMetrics, MetricsDelta, MetricsStore, Result,
};
use caresight_core::watermark::{Watermark, WatermarkStore};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// In-memory metrics store mirroring the Postgres upsert semantics.
///
/// Counter deltas increment in place and the risk score is overwritten only
/// when the delta carries one, exactly like the production `ON CONFLICT`
/// statement, so engine tests observe the same arithmetic either way.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetricsStore {
    clients: Arc<RwLock<HashMap<(String, NaiveDate), ClientDailyMetrics>>>,
    cohorts: Arc<RwLock<HashMap<(String, NaiveDate), CohortDailyMetrics>>>,
}

impl InMemoryMetricsStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one client row.
    #[must_use]
    pub fn client_row(&self, client_id: &str, date: NaiveDate) -> Option<ClientDailyMetrics> {
        self.clients
            .read()
            .unwrap()
            .get(&(client_id.to_string(), date))
            .cloned()
    }

    /// Snapshot of one cohort row.
    #[must_use]
    pub fn cohort_row(&self, cohort_tag: &str, date: NaiveDate) -> Option<CohortDailyMetrics> {
        self.cohorts
            .read()
            .unwrap()
            .get(&(cohort_tag.to_string(), date))
            .cloned()
    }

    /// Number of client rows.
    #[must_use]
    pub fn client_row_count(&self) -> usize {
        self.clients.read().unwrap().len()
    }
}

impl MetricsStore for InMemoryMetricsStore {
    fn apply_client_delta(
        &self,
        client_id: &str,
        date: NaiveDate,
        delta: &MetricsDelta,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let client_id = client_id.to_string();
        let delta = delta.clone();
        Box::pin(async move {
            let mut clients = self.clients.write().unwrap();
            let row = clients
                .entry((client_id.clone(), date))
                .or_insert_with(|| ClientDailyMetrics {
                    client_id,
                    date,
                    risk_score_avg: None,
                    tasks_completed: 0,
                    tasks_active: 0,
                    tasks_blocked: 0,
                    alerts_open: 0,
                    action_plan_versions_activated: 0,
                    updated_at: Utc::now(),
                });

            row.tasks_completed += delta.tasks_completed;
            row.tasks_active += delta.tasks_active;
            row.tasks_blocked += delta.tasks_blocked;
            row.alerts_open += delta.alerts_open;
            row.action_plan_versions_activated += delta.action_plan_versions_activated;
            if let Some((_, score)) = delta.risk_score {
                row.risk_score_avg = Some(score);
            }
            row.updated_at = Utc::now();
            Ok(())
        })
    }

    fn upsert_cohort(
        &self,
        row: CohortDailyMetrics,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.cohorts
                .write()
                .unwrap()
                .insert((row.cohort_tag.clone(), row.date), row);
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
            let clients = self.clients.read().unwrap();
            Ok(client_ids
                .iter()
                .filter_map(|id| clients.get(&(id.clone(), date)).cloned())
                .collect())
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
            let clients = self.clients.read().unwrap();
            let mut rows: Vec<ClientDailyMetrics> = clients
                .values()
                .filter(|r| r.client_id == client_id && r.date >= from && r.date <= to)
                .cloned()
                .collect();
            rows.sort_by_key(|r| r.date);
            Ok(rows)
        })
    }

    fn client_latest(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ClientDailyMetrics>>> + Send + '_>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            let clients = self.clients.read().unwrap();
            Ok(clients
                .values()
                .filter(|r| r.client_id == client_id)
                .max_by_key(|r| r.date)
                .cloned())
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
            let cohorts = self.cohorts.read().unwrap();
            let mut rows: Vec<CohortDailyMetrics> = cohorts
                .values()
                .filter(|r| r.cohort_tag == cohort_tag && r.date >= from && r.date <= to)
                .cloned()
                .collect();
            rows.sort_by_key(|r| r.date);
            Ok(rows)
        })
    }

    fn cohort_latest(
        &self,
        cohort_tag: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CohortDailyMetrics>>> + Send + '_>> {
        let cohort_tag = cohort_tag.to_string();
        Box::pin(async move {
            let cohorts = self.cohorts.read().unwrap();
            Ok(cohorts
                .values()
                .filter(|r| r.cohort_tag == cohort_tag)
                .max_by_key(|r| r.date)
                .cloned())
        })
    }
}

/// In-memory watermark store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryWatermarkStore {
    watermarks: Arc<RwLock<HashMap<String, Watermark>>>,
}

impl InMemoryWatermarkStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for InMemoryWatermarkStore {
    fn save(
        &self,
        projection_name: &str,
        watermark: Watermark,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            self.watermarks.write().unwrap().insert(projection_name, watermark);
            Ok(())
        })
    }

    fn load(
        &self,
        projection_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Watermark>>> + Send + '_>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            Ok(self.watermarks.read().unwrap().get(&projection_name).copied())
        })
    }
}
