//! Caresight analytics service.
//!
//! Composition root wiring the pipeline together: `PostgreSQL` stores, the
//! metrics projection, the outbox processor, the Prometheus exporter, and
//! the read API. Exactly one instance of this binary may run per outbox
//! database; the processor takes no cross-process lease.

mod config;

use anyhow::{Context, Result};
use caresight_core::clock::SystemClock;
use caresight_core::event::ALL_EVENT_TYPES;
use caresight_outbox::{HandlerRegistry, OutboxProcessor};
use caresight_postgres::{PostgresClientDirectory, PostgresDeadLetterQueue, PostgresOutboxStore};
use caresight_projections::{MetricsProjection, PostgresMetricsStore, PostgresWatermarkStore};
use caresight_telemetry::MetricsServer;
use caresight_web::ApiState;
use config::ServerConfig;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    caresight_telemetry::init_tracing("info,caresight=debug");

    let config = ServerConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    // Stores share the pool; both migrators tolerate each other's versions.
    let outbox_store = Arc::new(PostgresOutboxStore::new(pool.clone()));
    outbox_store.migrate().await.context("Outbox migrations failed")?;
    let metrics_store = Arc::new(PostgresMetricsStore::new(pool.clone()));
    metrics_store.migrate().await.context("Metrics migrations failed")?;
    let watermarks = Arc::new(PostgresWatermarkStore::new(pool.clone()));
    let directory = Arc::new(PostgresClientDirectory::new(pool.clone()));
    let dead_letters = Arc::new(PostgresDeadLetterQueue::new(pool));

    // The projection consumes every event type through the outbox.
    let registry = Arc::new(HandlerRegistry::new());
    let projection = Arc::new(MetricsProjection::new(
        metrics_store.clone(),
        watermarks,
        directory.clone(),
    ));
    for event_type in ALL_EVENT_TYPES {
        registry.register(event_type, projection.clone());
    }

    let (processor, control) = OutboxProcessor::new(
        outbox_store.clone(),
        registry,
        Arc::new(SystemClock),
    );
    let mut processor = processor
        .with_batch_size(config.batch_size)
        .with_completion_policy(config.completion_policy)
        .with_lag_warn_threshold(config.lag_warn_threshold)
        .with_dead_letter_sink(dead_letters);
    let poll_interval = config.poll_interval;
    let processor_task = tokio::spawn(async move {
        processor.start(poll_interval).await;
    });

    let mut metrics_server = MetricsServer::new(config.metrics_addr);
    metrics_server.start().context("Failed to start metrics exporter")?;

    let state = ApiState::new(metrics_store, directory, outbox_store)
        .with_lag_warn_threshold(config.lag_warn_threshold);
    let app = caresight_web::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Analytics API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    // The processor finishes its in-flight batch before exiting.
    tracing::info!("Shutting down outbox processor");
    control.stop();
    processor_task.await.context("Processor task panicked")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
