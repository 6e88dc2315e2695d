//! Prometheus metrics for the analytics pipeline.
//!
//! This module provides metric collection for every pipeline stage:
//! - Event ingestion through the dispatcher
//! - Outbox processor / projection cycles
//! - Read API calls
//! - Data lag (staleness of the newest ingested event)
//!
//! # Example
//!
//! ```rust,no_run
//! use caresight_telemetry::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and start the HTTP exporter.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), the
    /// install step is skipped with a warning. In production, ensure this is
    /// only called once.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            // Latency buckets shared by all *_duration_seconds histograms
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Ingestion
    describe_counter!(
        "analytics_events_ingested_total",
        "Total number of events written to the outbox, by event type and source aggregate"
    );

    // Projection cycles
    describe_counter!(
        "analytics_projection_cycles_total",
        "Total number of outbox processor cycles, by result"
    );
    describe_histogram!(
        "analytics_projection_cycle_duration_seconds",
        "Time taken by one outbox processor cycle"
    );

    // Read API
    describe_counter!(
        "analytics_api_requests_total",
        "Total number of analytics API requests, by endpoint, method and status"
    );
    describe_histogram!(
        "analytics_api_request_duration_seconds",
        "Time taken to serve one analytics API request"
    );

    // Freshness
    describe_gauge!(
        "analytics_data_lag_seconds",
        "Seconds between now and the most recently ingested event"
    );
}

/// Ingestion metrics recorder.
pub struct IngestionMetrics;

impl IngestionMetrics {
    /// Record one ingested event.
    pub fn record(event_type: &str, source: &str) {
        counter!(
            "analytics_events_ingested_total",
            "event_type" => event_type.to_string(),
            "source" => source.to_string(),
        )
        .increment(1);
    }
}

/// Projection-cycle metrics recorder.
pub struct ProjectionMetrics;

impl ProjectionMetrics {
    /// Record a completed cycle.
    pub fn record_cycle(duration: Duration, success: bool) {
        let result = if success { "success" } else { "error" };
        counter!(
            "analytics_projection_cycles_total",
            "result" => result,
        )
        .increment(1);
        histogram!("analytics_projection_cycle_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Read-API metrics recorder.
pub struct ApiMetrics;

impl ApiMetrics {
    /// Record a served request.
    pub fn record_request(endpoint: &str, method: &str, status: u16, duration: Duration) {
        counter!(
            "analytics_api_requests_total",
            "endpoint" => endpoint.to_string(),
            "method" => method.to_string(),
            "status" => status.to_string(),
        )
        .increment(1);
        histogram!("analytics_api_request_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Data-lag recorder with threshold warning.
pub struct LagMetrics;

impl LagMetrics {
    /// Record the current data lag and warn when it exceeds `threshold`.
    pub fn observe(lag: Duration, threshold: Duration) {
        gauge!("analytics_data_lag_seconds").set(lag.as_secs_f64());

        if lag > threshold {
            tracing::warn!(
                lag_seconds = lag.as_secs_f64(),
                threshold_seconds = threshold.as_secs_f64(),
                "Analytics data lag exceeds threshold"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[test]
    fn recorders_do_not_panic_without_a_recorder_installed() {
        // The metrics facade no-ops when no recorder is installed; these
        // must be callable from unit tests without setup.
        IngestionMetrics::record("TASK_STATE_CHANGED", "task");
        ProjectionMetrics::record_cycle(Duration::from_millis(12), true);
        ProjectionMetrics::record_cycle(Duration::from_millis(12), false);
        ApiMetrics::record_request("client_daily", "GET", 200, Duration::from_millis(3));
        LagMetrics::observe(Duration::from_secs(5), Duration::from_secs(60));
    }

    #[test]
    fn lag_above_threshold_only_warns() {
        // Must not panic or error; the warning is a log line.
        LagMetrics::observe(Duration::from_secs(120), Duration::from_secs(60));
    }
}
