//! # Caresight Core
//!
//! Core event model and store traits for the Caresight analytics pipeline.
//!
//! This crate defines the shared vocabulary of the pipeline:
//!
//! - **Events**: a closed sum type of domain events with an explicit
//!   discriminant-to-decoder registry ([`event`])
//! - **Outbox**: the reliable-delivery row format and store contract
//!   ([`outbox`]), plus the dead-letter hand-off ([`dead_letter`])
//! - **Handlers**: the consumer abstraction shared by the synchronous
//!   dispatch path and the background processor ([`handler`])
//! - **Metrics**: projected daily rows, signed deltas, and the metrics
//!   store contract ([`metrics`])
//! - **Watermarks**: resumable, idempotent projection progress
//!   ([`watermark`])
//! - **Directory**: external-collaborator lookups for cohort membership
//!   and canonical organization keys ([`directory`])
//! - **Clock**: injectable time source for deterministic tests ([`clock`])
//!
//! The concrete machinery lives in the sibling crates: `caresight-outbox`
//! (dispatcher + processor), `caresight-projections` (engine + Postgres
//! read-side stores), `caresight-postgres` (outbox store + dead-letter
//! queue), `caresight-web` (read API), and `caresight-testing` (in-memory
//! fakes).

pub mod clock;
pub mod dead_letter;
pub mod directory;
pub mod event;
pub mod handler;
pub mod metrics;
pub mod outbox;
pub mod watermark;

// Re-export commonly used time types
pub use chrono::{DateTime, NaiveDate, Utc};
