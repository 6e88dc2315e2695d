//! End-to-end tests for the analytics read API.
//!
//! Each test drives the full router with `tower::ServiceExt::oneshot`,
//! in-memory stores behind the state, and an `Identity` extension standing
//! in for the external authentication middleware.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code uses unwrap for clear failures

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::{Extension, Router};
use caresight_core::metrics::{CohortDailyMetrics, MetricsDelta, MetricsStore};
use caresight_testing::{InMemoryMetricsStore, InMemoryOutboxStore, StaticDirectory};
use caresight_web::{router, ApiState, Identity, Role};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApi {
    metrics: InMemoryMetricsStore,
    outbox: InMemoryOutboxStore,
}

impl TestApi {
    fn new() -> Self {
        Self {
            metrics: InMemoryMetricsStore::new(),
            outbox: InMemoryOutboxStore::new(),
        }
    }

    fn app(&self, identity: Option<Identity>) -> Router {
        let directory = StaticDirectory::new()
            .with_client("client-1", Some("org-a"), &["high-risk"])
            .with_client("client-2", Some("org-b"), &[]);

        let state = ApiState::new(
            Arc::new(self.metrics.clone()),
            Arc::new(directory),
            Arc::new(self.outbox.clone()),
        );

        let app = router(state);
        match identity {
            Some(identity) => app.layer(Extension(identity)),
            None => app,
        }
    }

    async fn seed_client_day(&self, client_id: &str, date: NaiveDate) {
        self.metrics
            .apply_client_delta(
                client_id,
                date,
                &MetricsDelta {
                    tasks_completed: 2,
                    tasks_active: 1,
                    alerts_open: 1,
                    risk_score: Some((Utc::now(), 42.0)),
                    ..MetricsDelta::default()
                },
            )
            .await
            .unwrap();
    }
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

fn super_admin() -> Identity {
    Identity::new("admin-1", Role::SuperAdmin, None)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn super_admin_reads_any_client_series() {
    let api = TestApi::new();
    api.seed_client_day("client-1", date()).await;

    let (status, body) = get_json(
        api.app(Some(super_admin())),
        "/analytics/clients/client-1/daily?from_date=2024-03-01&to_date=2024-03-31",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let metrics = body["metrics"].as_array().unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0]["tasks_completed"], 2);
    assert_eq!(metrics[0]["risk_score_avg"], 42.0);
    assert!(body["metadata"]["generated_at"].is_string());
    assert!(body["metadata"]["source_version"].is_string());
}

#[tokio::test]
async fn client_role_is_limited_to_its_own_id() {
    let api = TestApi::new();
    api.seed_client_day("client-1", date()).await;
    api.seed_client_day("client-2", date()).await;

    let own = Identity::new("client-1", Role::Client, None);
    let (status, _) = get_json(
        api.app(Some(own.clone())),
        "/analytics/clients/client-1/summary",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get_json(
        api.app(Some(own)),
        "/analytics/clients/client-2/summary",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn org_admin_is_scoped_to_its_organization() {
    let api = TestApi::new();
    api.seed_client_day("client-1", date()).await;
    api.seed_client_day("client-2", date()).await;

    let org_admin = Identity::new("oa-1", Role::OrgAdmin, Some("org-a".to_string()));

    let (status, _) = get_json(
        api.app(Some(org_admin.clone())),
        "/analytics/clients/client-1/summary",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get_json(
        api.app(Some(org_admin)),
        "/analytics/clients/client-2/summary",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn inverted_range_is_rejected_with_the_exact_message() {
    let api = TestApi::new();

    let (status, body) = get_json(
        api.app(Some(super_admin())),
        "/analytics/clients/client-1/daily?from_date=2024-01-01&to_date=2023-12-31",
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "end_date must be after start_date");
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn four_hundred_day_range_is_rejected_with_the_exact_message() {
    let api = TestApi::new();

    let (status, body) = get_json(
        api.app(Some(super_admin())),
        "/analytics/clients/client-1/daily?from_date=2023-01-01&to_date=2024-02-05",
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "Date range cannot exceed 365 days");
}

#[tokio::test]
async fn cohort_series_respects_the_role_matrix() {
    let api = TestApi::new();
    api.metrics
        .upsert_cohort(CohortDailyMetrics {
            cohort_tag: "high-risk".to_string(),
            date: date(),
            risk_score_avg: Some(30.0),
            tasks_completed: 5,
            tasks_active: 2,
            tasks_blocked: 0,
            alerts_open: 1,
            action_plan_versions_activated: 0,
            clients_reporting: 3,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    let uri = "/analytics/cohorts/high-risk/daily?from_date=2024-03-01&to_date=2024-03-31";

    let org_admin = Identity::new("oa-1", Role::OrgAdmin, Some("org-a".to_string()));
    let (status, body) = get_json(api.app(Some(org_admin)), uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metrics"][0]["risk_score_avg"], 30.0);
    assert_eq!(body["metrics"][0]["clients_reporting"], 3);

    let case_manager = Identity::new("cm-1", Role::CaseManager, Some("org-a".to_string()));
    let (status, _) = get_json(api.app(Some(case_manager)), uri).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let client = Identity::new("client-1", Role::Client, None);
    let (status, _) = get_json(api.app(Some(client)), "/analytics/cohorts/high-risk/summary").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let api = TestApi::new();

    let (status, body) = get_json(api.app(None), "/analytics/clients/client-1/summary").await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn summary_returns_the_newest_row() {
    let api = TestApi::new();
    api.seed_client_day("client-1", date()).await;
    let newer = date().succ_opt().unwrap();
    api.seed_client_day("client-1", newer).await;

    let (status, body) = get_json(
        api.app(Some(super_admin())),
        "/analytics/clients/client-1/summary",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["client_id"], "client-1");
    assert_eq!(body["latest_metrics"]["date"], newer.to_string());
}

#[tokio::test]
async fn unreachable_outbox_degrades_lag_instead_of_failing() {
    let api = TestApi::new();
    api.seed_client_day("client-1", date()).await;
    api.outbox.fail_fetches(true);

    let (status, body) = get_json(
        api.app(Some(super_admin())),
        "/analytics/clients/client-1/summary",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["metadata"]["data_lag_seconds"].is_null());
}

#[tokio::test]
async fn empty_range_returns_empty_series_not_an_error() {
    let api = TestApi::new();

    let (status, body) = get_json(
        api.app(Some(super_admin())),
        "/analytics/clients/client-1/daily?from_date=2024-03-01&to_date=2024-03-31",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metrics"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let api = TestApi::new();
    let response = api
        .app(None)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
