//! In-memory outbox store and dead-letter sink.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already failed

use caresight_core::dead_letter::{DeadLetterRecord, DeadLetterSink};
use caresight_core::outbox::{OutboxError, OutboxRecord, OutboxStore};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// In-memory outbox store for fast, deterministic testing.
///
/// Supports failure injection so tests can exercise the write-ahead
/// contract and the processor's batch-error survival.
///
/// # Example
///
/// ```
/// use caresight_testing::InMemoryOutboxStore;
/// use caresight_core::outbox::OutboxStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryOutboxStore::new();
/// assert!(store.fetch_unprocessed(10).await?.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryOutboxStore {
    records: Arc<RwLock<Vec<OutboxRecord>>>,
    fail_inserts: Arc<AtomicBool>,
    fail_fetches: Arc<AtomicBool>,
}

impl InMemoryOutboxStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent fetch fail.
    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Snapshot of a row by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<OutboxRecord> {
        self.records.read().unwrap().iter().find(|r| r.id == id).cloned()
    }

    /// Snapshot of all rows, in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<OutboxRecord> {
        self.records.read().unwrap().clone()
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn insert(
        &self,
        record: OutboxRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(OutboxError::Database("injected insert failure".to_string()));
            }

            let mut records = self.records.write().unwrap();
            if records.iter().any(|r| r.id == record.id) {
                return Err(OutboxError::Database(format!(
                    "duplicate outbox id {}",
                    record.id
                )));
            }
            records.push(record);
            Ok(())
        })
    }

    fn fetch_unprocessed(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxRecord>, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_fetches.load(Ordering::SeqCst) {
                return Err(OutboxError::Database("injected fetch failure".to_string()));
            }

            let records = self.records.read().unwrap();
            let mut unprocessed: Vec<OutboxRecord> = records
                .iter()
                .filter(|r| r.processed_at.is_none())
                .cloned()
                .collect();
            unprocessed.sort_by_key(|r| r.occurred_at);
            unprocessed.truncate(limit);
            Ok(unprocessed)
        })
    }

    fn mark_processed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.records.write().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(OutboxError::RecordNotFound(id))?;

            // null -> timestamp happens exactly once; later calls are no-ops.
            if record.processed_at.is_none() {
                record.processed_at = Some(at);
            }
            Ok(())
        })
    }

    fn record_attempt(
        &self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<i32, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.records.write().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(OutboxError::RecordNotFound(id))?;
            record.attempts += 1;
            Ok(record.attempts)
        })
    }

    fn latest_ingested_at(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DateTime<Utc>>, OutboxError>> + Send + '_>>
    {
        Box::pin(async move {
            if self.fail_fetches.load(Ordering::SeqCst) {
                return Err(OutboxError::Database("injected fetch failure".to_string()));
            }
            Ok(self.records.read().unwrap().iter().map(|r| r.occurred_at).max())
        })
    }
}

/// In-memory dead-letter sink that captures records for assertions.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeadLetters {
    records: Arc<RwLock<Vec<DeadLetterRecord>>>,
}

impl InMemoryDeadLetters {
    /// Create a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of captured records.
    #[must_use]
    pub fn all(&self) -> Vec<DeadLetterRecord> {
        self.records.read().unwrap().clone()
    }

    /// Number of captured records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether nothing has been dead-lettered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }
}

impl DeadLetterSink for InMemoryDeadLetters {
    fn push(
        &self,
        record: DeadLetterRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        Box::pin(async move {
            self.records.write().unwrap().push(record);
            Ok(())
        })
    }
}
