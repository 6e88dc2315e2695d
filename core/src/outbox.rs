//! Outbox records and the outbox store abstraction.
//!
//! The transactional outbox is the reliable delivery channel: business logic
//! persists a state change and the corresponding event row together, and a
//! background processor delivers the row to consumers afterwards. Rows are
//! append-only; the only mutations a store may perform are the single
//! null-to-timestamp transition of `processed_at` and the monotonic
//! `attempts` increment used by the retry policy.
//!
//! # Implementations
//!
//! - `PostgresOutboxStore` (in `caresight-postgres`): production storage
//! - `InMemoryOutboxStore` (in `caresight-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! [`OutboxStore`] uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so it can be shared as `Arc<dyn OutboxStore>` between the
//! dispatcher, the processor, and the read API's staleness probe.

use crate::event::{EventEnvelope, EventError, EventPayload};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during outbox store operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database connection or query error.
    #[error("Outbox database error: {0}")]
    Database(String),

    /// Failed to serialize an envelope into a row payload.
    #[error("Outbox serialization error: {0}")]
    Serialization(String),

    /// A row referenced by id does not exist.
    #[error("Outbox record not found: {0}")]
    RecordNotFound(Uuid),
}

/// A persisted, deliverable event row.
///
/// The row id equals the event id, so "exactly one outbox record per
/// dispatched event" is enforced by the store's primary key.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxRecord {
    /// Row key; equal to the envelope's `event_id`.
    pub id: Uuid,
    /// Wire discriminant, duplicated out of the payload for indexed routing.
    pub event_type: String,
    /// Aggregate type the event is pinned to.
    pub aggregate_type: String,
    /// Aggregate id the event is pinned to.
    pub aggregate_id: String,
    /// The serialized [`EventEnvelope`].
    pub payload: Value,
    /// When the event occurred; batch ordering key.
    pub occurred_at: DateTime<Utc>,
    /// Delivery attempts so far; only increases.
    pub attempts: i32,
    /// Null until the processor closes the row, then stable forever.
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Build a row from an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the envelope cannot be
    /// serialized to JSON.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, EventError> {
        let payload = serde_json::to_value(envelope)
            .map_err(|e| EventError::Serialization(e.to_string()))?;

        Ok(Self {
            id: envelope.event_id,
            event_type: envelope.event_type().to_string(),
            aggregate_type: envelope.aggregate_type().to_string(),
            aggregate_id: envelope.aggregate_id().to_string(),
            payload,
            occurred_at: envelope.occurred_at,
            attempts: 0,
            processed_at: None,
        })
    }

    /// Decode the row back into a typed envelope.
    ///
    /// Decoding goes through the discriminant registry using the row's
    /// `event_type` column, so a row written by a newer producer fails with
    /// [`EventError::UnknownEventType`] rather than a serde error.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEventType`] for unregistered
    /// discriminants and [`EventError::Deserialization`] for payloads that
    /// do not match the registered shape.
    pub fn decode(&self) -> Result<EventEnvelope, EventError> {
        #[derive(Deserialize)]
        struct Parts {
            event_id: Uuid,
            occurred_at: DateTime<Utc>,
            correlation_id: Uuid,
            causation_id: Option<Uuid>,
            #[serde(default)]
            metadata: serde_json::Map<String, Value>,
            payload: Value,
        }

        let parts: Parts =
            serde_json::from_value(self.payload.clone()).map_err(|e| {
                EventError::Deserialization {
                    event_type: self.event_type.clone(),
                    reason: e.to_string(),
                }
            })?;

        let payload = EventPayload::decode(&self.event_type, &parts.payload)?;

        Ok(EventEnvelope {
            event_id: parts.event_id,
            occurred_at: parts.occurred_at,
            correlation_id: parts.correlation_id,
            causation_id: parts.causation_id,
            metadata: parts.metadata,
            payload,
        })
    }
}

/// Storage abstraction for the transactional outbox.
///
/// The contract deliberately mirrors what the processor needs and nothing
/// more: insert, indexed scan of unprocessed rows in occurrence order, the
/// single-field `processed_at` update, the `attempts` increment, and the
/// newest-ingestion probe the read API uses for staleness disclosure.
pub trait OutboxStore: Send + Sync {
    /// Insert a new row.
    ///
    /// This write must complete before any in-process delivery happens
    /// (write-ahead); callers treat failure as fatal for the dispatch.
    fn insert(
        &self,
        record: OutboxRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>>;

    /// Fetch up to `limit` rows where `processed_at` is null, ordered by
    /// `occurred_at` ascending.
    fn fetch_unprocessed(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxRecord>, OutboxError>> + Send + '_>>;

    /// Close a row: transition `processed_at` from null to `at`.
    ///
    /// Stores must treat this as the row's single lifecycle transition; a
    /// second call on the same row is a no-op, never a revert.
    fn mark_processed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>>;

    /// Increment a row's delivery attempt counter, returning the new value.
    fn record_attempt(
        &self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<i32, OutboxError>> + Send + '_>>;

    /// Occurrence time of the newest ingested event, processed or not.
    ///
    /// `None` when the outbox is empty. Used for data-lag disclosure.
    fn latest_ingested_at(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DateTime<Utc>>, OutboxError>> + Send + '_>>;
}
