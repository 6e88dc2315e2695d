//! Event dispatcher: the write-ahead entry point of the pipeline.
//!
//! Business logic calls [`EventDispatcher::dispatch`] after a state change.
//! The outbox insert always happens first and its failure propagates to the
//! caller; the optional synchronous handler fan-out afterwards is a
//! best-effort channel whose failures are logged and swallowed. Reliable
//! delivery is guaranteed only through the outbox path (the background
//! processor).

use crate::registry::HandlerRegistry;
use caresight_core::event::{EventEnvelope, EventError};
use caresight_core::outbox::{OutboxError, OutboxRecord, OutboxStore};
use caresight_telemetry::IngestionMetrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Errors that abort a dispatch call.
///
/// Only the write-ahead path can fail a dispatch; handler failures are
/// swallowed by design.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The envelope could not be serialized into an outbox row.
    #[error(transparent)]
    Event(#[from] EventError),

    /// The outbox insert failed; the event is NOT durable.
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

/// Writes events to the outbox and optionally fans out to in-process
/// handlers synchronously.
///
/// # Concurrency
///
/// The synchronous handler path executes inline with the triggering caller's
/// control flow, so handler cost lands on the critical path of whatever
/// operation raised the event. The process-wide toggle
/// [`EventDispatcher::set_sync_dispatch`] disables that path for batch/test
/// scenarios where only outbox durability matters.
pub struct EventDispatcher {
    outbox: Arc<dyn OutboxStore>,
    registry: Arc<HandlerRegistry>,
    sync_dispatch: AtomicBool,
}

impl EventDispatcher {
    /// Create a dispatcher with synchronous dispatch enabled.
    #[must_use]
    pub fn new(outbox: Arc<dyn OutboxStore>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            outbox,
            registry,
            sync_dispatch: AtomicBool::new(true),
        }
    }

    /// Toggle the process-wide synchronous handler path.
    pub fn set_sync_dispatch(&self, enabled: bool) {
        self.sync_dispatch.store(enabled, Ordering::SeqCst);
    }

    /// Whether the synchronous handler path is currently enabled.
    #[must_use]
    pub fn sync_dispatch_enabled(&self) -> bool {
        self.sync_dispatch.load(Ordering::SeqCst)
    }

    /// Persist an event and, if enabled, run its synchronous handlers.
    ///
    /// The outbox write completes before any handler runs (write-ahead).
    /// Handlers registered for the event's type run in registration order;
    /// each failure is caught and logged independently so one failing
    /// handler never prevents the others from running.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] only when serialization or the outbox
    /// insert fails; in that case nothing was delivered anywhere.
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> Result<(), DispatchError> {
        let record = OutboxRecord::from_envelope(envelope)?;

        // Write-ahead: durability before any delivery.
        self.outbox.insert(record.clone()).await?;

        IngestionMetrics::record(record.event_type.as_str(), record.aggregate_type.as_str());
        tracing::debug!(
            event_id = %record.id,
            event_type = %record.event_type,
            aggregate_id = %record.aggregate_id,
            correlation_id = %envelope.correlation_id,
            "Event written to outbox"
        );

        if self.sync_dispatch.load(Ordering::SeqCst) {
            self.run_sync_handlers(&record).await;
        }

        Ok(())
    }

    /// Best-effort synchronous fan-out. Never fails the dispatch.
    async fn run_sync_handlers(&self, record: &OutboxRecord) {
        for handler in self.registry.handlers_for(&record.event_type) {
            if let Err(e) = handler.handle(record).await {
                tracing::warn!(
                    handler = handler.name(),
                    event_id = %record.id,
                    event_type = %record.event_type,
                    error = %e,
                    "Synchronous handler failed; outbox delivery will still occur"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use caresight_core::event::{EventPayload, TaskState, ALERT_CREATED, TASK_STATE_CHANGED};
    use caresight_testing::{InMemoryOutboxStore, RecordingHandler};

    fn task_event() -> EventEnvelope {
        EventEnvelope::new(EventPayload::TaskStateChanged {
            task_id: "task-1".to_string(),
            client_id: "client-1".to_string(),
            previous_state: Some(TaskState::InProgress),
            new_state: TaskState::Completed,
        })
    }

    fn dispatcher_with(
        store: &InMemoryOutboxStore,
    ) -> (EventDispatcher, Arc<HandlerRegistry>) {
        let registry = Arc::new(HandlerRegistry::new());
        let dispatcher =
            EventDispatcher::new(Arc::new(store.clone()), Arc::clone(&registry));
        (dispatcher, registry)
    }

    #[tokio::test]
    async fn dispatch_writes_exactly_one_record_keyed_by_event_id() {
        let store = InMemoryOutboxStore::new();
        let (dispatcher, _registry) = dispatcher_with(&store);

        let envelope = task_event();
        dispatcher.dispatch(&envelope).await.unwrap();

        assert_eq!(store.len(), 1);
        let record = store.get(envelope.event_id).unwrap();
        assert!(record.processed_at.is_none());
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let store = InMemoryOutboxStore::new();
        let (dispatcher, registry) = dispatcher_with(&store);

        let first = Arc::new(RecordingHandler::new("first"));
        let second = Arc::new(RecordingHandler::new("second"));
        registry.register(TASK_STATE_CHANGED, Arc::clone(&first) as _);
        registry.register(TASK_STATE_CHANGED, Arc::clone(&second) as _);

        let envelope = task_event();
        dispatcher.dispatch(&envelope).await.unwrap();

        assert_eq!(first.seen(), vec![envelope.event_id]);
        assert_eq!(second.seen(), vec![envelope.event_id]);
    }

    #[tokio::test]
    async fn one_failing_handler_does_not_stop_the_others() {
        let store = InMemoryOutboxStore::new();
        let (dispatcher, registry) = dispatcher_with(&store);

        let failing = Arc::new(RecordingHandler::new("failing"));
        failing.fail(true);
        let healthy = Arc::new(RecordingHandler::new("healthy"));
        registry.register(TASK_STATE_CHANGED, Arc::clone(&failing) as _);
        registry.register(TASK_STATE_CHANGED, Arc::clone(&healthy) as _);

        let envelope = task_event();
        dispatcher.dispatch(&envelope).await.unwrap();

        // Dispatch succeeded, the outbox row exists, and the healthy handler
        // still ran after the failing one.
        assert_eq!(store.len(), 1);
        assert_eq!(failing.seen_count(), 1);
        assert_eq!(healthy.seen_count(), 1);
    }

    #[tokio::test]
    async fn outbox_failure_is_fatal_and_no_handler_runs() {
        let store = InMemoryOutboxStore::new();
        let (dispatcher, registry) = dispatcher_with(&store);

        let handler = Arc::new(RecordingHandler::new("handler"));
        registry.register(TASK_STATE_CHANGED, Arc::clone(&handler) as _);

        store.fail_inserts(true);
        let result = dispatcher.dispatch(&task_event()).await;

        assert!(matches!(result, Err(DispatchError::Outbox(_))));
        assert_eq!(handler.seen_count(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sync_toggle_skips_handlers_but_still_persists() {
        let store = InMemoryOutboxStore::new();
        let (dispatcher, registry) = dispatcher_with(&store);

        let handler = Arc::new(RecordingHandler::new("handler"));
        registry.register(TASK_STATE_CHANGED, Arc::clone(&handler) as _);

        dispatcher.set_sync_dispatch(false);
        assert!(!dispatcher.sync_dispatch_enabled());

        dispatcher.dispatch(&task_event()).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(handler.seen_count(), 0);
    }

    #[tokio::test]
    async fn handlers_for_other_types_are_not_invoked() {
        let store = InMemoryOutboxStore::new();
        let (dispatcher, registry) = dispatcher_with(&store);

        let alert_handler = Arc::new(RecordingHandler::new("alerts_only"));
        registry.register(ALERT_CREATED, Arc::clone(&alert_handler) as _);

        dispatcher.dispatch(&task_event()).await.unwrap();

        assert_eq!(alert_handler.seen_count(), 0);
    }
}
