//! Recording and failure-injecting event handlers.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already failed

use caresight_core::handler::{EventHandler, HandlerError};
use caresight_core::outbox::OutboxRecord;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Handler that records every event id it sees and can be told to fail.
///
/// # Example
///
/// ```
/// use caresight_testing::RecordingHandler;
///
/// let handler = RecordingHandler::new("audit");
/// handler.fail(true); // every handle() call now errors
/// assert!(handler.seen().is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct RecordingHandler {
    name: String,
    seen: Arc<RwLock<Vec<Uuid>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingHandler {
    /// Create a handler with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seen: Arc::new(RwLock::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Toggle failure injection.
    pub fn fail(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// Event ids handled so far, in order. Failed attempts are recorded too.
    #[must_use]
    pub fn seen(&self) -> Vec<Uuid> {
        self.seen.read().unwrap().clone()
    }

    /// Number of handled events.
    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.seen.read().unwrap().len()
    }
}

impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(
        &self,
        record: &OutboxRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        let id = record.id;
        Box::pin(async move {
            self.seen.write().unwrap().push(id);
            if self.failing.load(Ordering::SeqCst) {
                return Err(HandlerError::new(self.name.clone(), "injected failure"));
            }
            Ok(())
        })
    }
}
