//! # Caresight Telemetry
//!
//! Observability bootstrap for the Caresight analytics pipeline: Prometheus
//! metrics (server, registration, per-stage recorders) and tracing
//! subscriber initialization.
//!
//! Every pipeline stage records through the recorders in [`metrics`]:
//! ingestion counters in the dispatcher, cycle counters/histograms in the
//! outbox processor, request counters/histograms in the read API, and the
//! data-lag gauge from both the processor and the read API's staleness
//! probe.

pub mod metrics;

pub use metrics::{
    ApiMetrics, IngestionMetrics, LagMetrics, MetricsError, MetricsServer, ProjectionMetrics,
};

/// Initialize the global tracing subscriber.
///
/// Uses `RUST_LOG` for filtering, falling back to `default_filter` when the
/// variable is unset. Safe to call once per process; later calls are ignored
/// so tests can initialize freely.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
