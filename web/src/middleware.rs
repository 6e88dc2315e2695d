//! Request tracking middleware: correlation ids, tracing spans, and
//! API metrics.
//!
//! One middleware covers the whole observability contract of the API:
//!
//! 1. **Extract** the correlation id from `X-Correlation-ID` (or generate a
//!    new UUID) and store it in request extensions
//! 2. **Span** the request with correlation id, method, and route template
//! 3. **Record** a request counter and duration histogram labeled
//!    endpoint/method/status
//! 4. **Echo** the correlation id back in the response header

use axum::{
    extract::{MatchedPath, Request},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use caresight_telemetry::ApiMetrics;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Correlation id attached to the current request.
///
/// Handlers can extract it via `Extension<CorrelationId>` when they need to
/// stamp outgoing events with the caller's correlation context.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

/// The tracking middleware. Install with
/// `axum::middleware::from_fn(track_requests)`.
pub async fn track_requests(mut req: Request, next: Next) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    // The route template ("/analytics/clients/:client_id/daily") keeps the
    // metric cardinality bounded; raw paths would explode it per client id.
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_string(), |p| p.as_str().to_string());
    let method = req.method().as_str().to_string();

    req.extensions_mut().insert(CorrelationId(correlation_id));

    let span = tracing::info_span!(
        "api_request",
        correlation_id = %correlation_id,
        method = %method,
        endpoint = %endpoint,
    );

    let start = Instant::now();
    let mut response = next.run(req).instrument(span).await;

    ApiMetrics::record_request(
        &endpoint,
        &method,
        response.status().as_u16(),
        start.elapsed(),
    );

    if let Ok(header_value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, header_value);
    }

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(track_requests))
    }

    #[tokio::test]
    async fn correlation_id_is_generated_when_missing() {
        let request = HttpRequest::builder()
            .uri("/test")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        let correlation_id = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("correlation id header should be present");
        assert!(Uuid::parse_str(correlation_id.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn correlation_id_from_request_is_echoed_back() {
        let request_uuid = Uuid::new_v4();
        let request = HttpRequest::builder()
            .uri("/test")
            .header(CORRELATION_ID_HEADER, request_uuid.to_string())
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        let echoed = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(echoed, request_uuid.to_string());
    }

    #[tokio::test]
    async fn invalid_correlation_id_is_replaced() {
        let request = HttpRequest::builder()
            .uri("/test")
            .header(CORRELATION_ID_HEADER, "not-a-uuid")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        let echoed = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(Uuid::parse_str(echoed).is_ok());
        assert_ne!(echoed, "not-a-uuid");
    }
}
