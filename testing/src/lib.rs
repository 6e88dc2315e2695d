//! # Caresight Testing
//!
//! In-memory fakes and helpers for fast, deterministic tests of the
//! Caresight analytics pipeline:
//!
//! - [`InMemoryOutboxStore`] / [`InMemoryDeadLetters`]: outbox rows and
//!   dead-letter capture with failure injection
//! - [`InMemoryMetricsStore`] / [`InMemoryWatermarkStore`]: read-side rows
//!   mirroring the Postgres upsert arithmetic
//! - [`StaticDirectory`]: fixed client/organization/cohort mappings
//! - [`ManualClock`]: virtual time for driving poll loops
//! - [`RecordingHandler`]: event handler with call capture and failure
//!   injection

mod clock;
mod directory;
mod handlers;
mod metrics_fakes;
mod outbox_fakes;

pub use clock::ManualClock;
pub use directory::StaticDirectory;
pub use handlers::RecordingHandler;
pub use metrics_fakes::{InMemoryMetricsStore, InMemoryWatermarkStore};
pub use outbox_fakes::{InMemoryDeadLetters, InMemoryOutboxStore};
