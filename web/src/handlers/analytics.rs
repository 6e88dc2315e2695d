//! Analytics read handlers.
//!
//! Four read-only operations over the projected metric rows, each gated by
//! the access matrix in [`crate::authz`] and stamped with staleness
//! metadata. The handlers take no locks; the projection engine owns all
//! writes.

use crate::authz::{authorize_client_access, authorize_cohort_access, Identity};
use crate::error::ApiError;
use crate::state::{ApiState, ResponseMetadata};
use crate::validation::DateRangeParams;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use caresight_core::metrics::{ClientDailyMetrics, CohortDailyMetrics};
use serde::Serialize;

/// Daily series response for one client.
#[derive(Debug, Serialize)]
pub struct ClientDailyResponse {
    /// Rows in ascending date order.
    pub metrics: Vec<ClientDailyMetrics>,
    /// Freshness disclosure.
    pub metadata: ResponseMetadata,
}

/// Latest-row summary for one client.
#[derive(Debug, Serialize)]
pub struct ClientSummaryResponse {
    /// The client the summary is for.
    pub client_id: String,
    /// The newest daily row, if the client has any.
    pub latest_metrics: Option<ClientDailyMetrics>,
    /// Freshness disclosure.
    pub metadata: ResponseMetadata,
}

/// Daily series response for one cohort.
#[derive(Debug, Serialize)]
pub struct CohortDailyResponse {
    /// Rows in ascending date order.
    pub metrics: Vec<CohortDailyMetrics>,
    /// Freshness disclosure.
    pub metadata: ResponseMetadata,
}

/// Latest-row summary for one cohort.
#[derive(Debug, Serialize)]
pub struct CohortSummaryResponse {
    /// The cohort the summary is for.
    pub cohort_tag: String,
    /// The newest daily row, if the cohort has any.
    pub latest_metrics: Option<CohortDailyMetrics>,
    /// Freshness disclosure.
    pub metadata: ResponseMetadata,
}

/// `GET /analytics/clients/{client_id}/daily?from_date&to_date`
///
/// # Errors
///
/// 422 on an invalid date range, 403 on a role/ownership mismatch, 503 when
/// the metrics store is unreachable.
pub async fn client_daily(
    State(state): State<ApiState>,
    identity: Identity,
    Path(client_id): Path<String>,
    Query(params): Query<DateRangeParams>,
) -> Result<Json<ClientDailyResponse>, ApiError> {
    let range = params.validate()?;
    authorize_client_access(&identity, &client_id, state.directory.as_ref()).await?;

    let metrics = state
        .metrics
        .client_range(&client_id, range.from, range.to)
        .await?;
    let metadata = state.metadata().await;

    Ok(Json(ClientDailyResponse { metrics, metadata }))
}

/// `GET /analytics/clients/{client_id}/summary`
///
/// # Errors
///
/// 403 on a role/ownership mismatch, 503 when the metrics store is
/// unreachable.
pub async fn client_summary(
    State(state): State<ApiState>,
    identity: Identity,
    Path(client_id): Path<String>,
) -> Result<Json<ClientSummaryResponse>, ApiError> {
    authorize_client_access(&identity, &client_id, state.directory.as_ref()).await?;

    let latest_metrics = state.metrics.client_latest(&client_id).await?;
    let metadata = state.metadata().await;

    Ok(Json(ClientSummaryResponse {
        client_id,
        latest_metrics,
        metadata,
    }))
}

/// `GET /analytics/cohorts/{cohort_tag}/daily?from_date&to_date`
///
/// # Errors
///
/// 422 on an invalid date range, 403 for roles without cohort access, 503
/// when the metrics store is unreachable.
pub async fn cohort_daily(
    State(state): State<ApiState>,
    identity: Identity,
    Path(cohort_tag): Path<String>,
    Query(params): Query<DateRangeParams>,
) -> Result<Json<CohortDailyResponse>, ApiError> {
    let range = params.validate()?;
    authorize_cohort_access(&identity)?;

    let metrics = state
        .metrics
        .cohort_range(&cohort_tag, range.from, range.to)
        .await?;
    let metadata = state.metadata().await;

    Ok(Json(CohortDailyResponse { metrics, metadata }))
}

/// `GET /analytics/cohorts/{cohort_tag}/summary`
///
/// # Errors
///
/// 403 for roles without cohort access, 503 when the metrics store is
/// unreachable.
pub async fn cohort_summary(
    State(state): State<ApiState>,
    identity: Identity,
    Path(cohort_tag): Path<String>,
) -> Result<Json<CohortSummaryResponse>, ApiError> {
    authorize_cohort_access(&identity)?;

    let latest_metrics = state.metrics.cohort_latest(&cohort_tag).await?;
    let metadata = state.metadata().await;

    Ok(Json(CohortSummaryResponse {
        cohort_tag,
        latest_metrics,
        metadata,
    }))
}
