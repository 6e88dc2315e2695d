//! Dead-letter hand-off for deliveries that exhaust their retry budget.
//!
//! Only the retry completion policy produces these; the default
//! advance-always policy never does. The sink is a trait so tests can
//! capture records in memory while production writes them to the
//! `failed_deliveries` table in `caresight-postgres`.

use crate::outbox::OutboxError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// A delivery that failed its last allowed attempt.
#[derive(Clone, Debug)]
pub struct DeadLetterRecord {
    /// The event that could not be delivered.
    pub event_id: Uuid,
    /// Wire discriminant of the event.
    pub event_type: String,
    /// The serialized envelope, kept for manual reprocessing.
    pub payload: Value,
    /// The handler whose failure exhausted the budget.
    pub handler: String,
    /// The final error message.
    pub error: String,
    /// Total delivery attempts made.
    pub attempts: i32,
    /// When the event originally occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Destination for dead-lettered deliveries.
pub trait DeadLetterSink: Send + Sync {
    /// Persist a dead-lettered delivery.
    fn push(
        &self,
        record: DeadLetterRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>>;
}
