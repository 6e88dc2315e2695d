//! Event handler abstraction shared by the dispatcher and the processor.

use crate::outbox::OutboxRecord;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error returned by an event handler.
///
/// Handler failures are a partial-failure channel by design: callers catch
/// and log them per handler, and never let one failing handler stop the
/// others or abort the surrounding dispatch/batch.
#[derive(Error, Debug)]
#[error("Handler '{handler}' failed: {reason}")]
pub struct HandlerError {
    /// The handler that failed.
    pub handler: String,
    /// Why it failed.
    pub reason: String,
}

impl HandlerError {
    /// Create a new handler error.
    #[must_use]
    pub fn new(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}

/// A consumer of delivered outbox rows.
///
/// Handlers are registered per event type and invoked in registration order,
/// both on the synchronous dispatch path and by the outbox processor. Because
/// outbox delivery is at-least-once, implementations must tolerate seeing the
/// same record twice.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so registries can hold
/// `Arc<dyn EventHandler>` values.
pub trait EventHandler: Send + Sync {
    /// Stable handler name, used in logs and dead-letter records.
    fn name(&self) -> &str;

    /// Consume one delivered record.
    fn handle(
        &self,
        record: &OutboxRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>>;
}
