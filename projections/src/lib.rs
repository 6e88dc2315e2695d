//! # Caresight Projections
//!
//! The incremental analytics projection engine and its `PostgreSQL`
//! read-side stores.
//!
//! [`MetricsProjection`] consumes delivered outbox rows, folds them into
//! net per-(client, day) deltas, applies them with increment-style upserts,
//! and recomputes the cohort rollups the batch touched. Idempotence under
//! replay comes from the projection watermark; garbage payloads degrade to
//! zero-effect deltas instead of failing the batch.
//!
//! The pure pieces ([`engine::delta_for`], [`cohort::aggregate`]) are
//! exported separately so tests and backfills can exercise the mapping
//! rules without any store.

pub mod cohort;
pub mod engine;
pub mod postgres;

pub use engine::{AppliedBatch, MetricsProjection, PROJECTION_NAME};
pub use postgres::{PostgresMetricsStore, PostgresWatermarkStore};
