//! Health check endpoint.
//!
//! Used by load balancers and monitoring systems to verify the service is
//! running. Does NOT check dependencies; the data-lag metadata on real
//! responses is the freshness signal.

use axum::http::StatusCode;

/// Simple liveness check.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_returns_ok() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
