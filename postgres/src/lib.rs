//! # Caresight Postgres
//!
//! `PostgreSQL` write-side storage for the Caresight analytics pipeline:
//! the transactional outbox store and the dead-letter queue for deliveries
//! that exhaust their retry budget.
//!
//! The read-side stores (daily metric tables, projection watermarks) live
//! in `caresight-projections`.

mod dead_letter;
mod directory;
mod outbox_store;

pub use dead_letter::{DeadLetterStatus, PostgresDeadLetterQueue, StoredDeadLetter};
pub use directory::PostgresClientDirectory;
pub use outbox_store::PostgresOutboxStore;
