//! # Caresight Web
//!
//! The permission-gated analytics read API.
//!
//! Four read-only routes over the projected metric rows, each RBAC-checked
//! against the caller's pre-validated [`authz::Identity`] and stamped with
//! staleness metadata (generation time, source version, data lag):
//!
//! - `GET /analytics/clients/{client_id}/daily?from_date&to_date`
//! - `GET /analytics/clients/{client_id}/summary`
//! - `GET /analytics/cohorts/{cohort_tag}/daily?from_date&to_date`
//! - `GET /analytics/cohorts/{cohort_tag}/summary`
//!
//! Plus `GET /health` for liveness. The external authentication system is a
//! collaborator: it validates credentials and installs the `Identity`
//! extension; this crate only decides access.

pub mod authz;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;
pub mod validation;

pub use authz::{Identity, Role};
pub use error::ApiError;
pub use state::{ApiState, ResponseMetadata};

use axum::{routing::get, Router};

/// Build the analytics API router.
///
/// The request-tracking middleware (correlation ids + API metrics) is
/// installed here; the identity extension must be installed by the caller's
/// authentication layer.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/analytics/clients/:client_id/daily",
            get(handlers::analytics::client_daily),
        )
        .route(
            "/analytics/clients/:client_id/summary",
            get(handlers::analytics::client_summary),
        )
        .route(
            "/analytics/cohorts/:cohort_tag/daily",
            get(handlers::analytics::cohort_daily),
        )
        .route(
            "/analytics/cohorts/:cohort_tag/summary",
            get(handlers::analytics::cohort_summary),
        )
        .layer(axum::middleware::from_fn(middleware::track_requests))
        .with_state(state)
}
