//! Outbox processor: the background delivery worker.
//!
//! A single long-lived task per process polls the outbox for unprocessed
//! rows and delivers them to registered handlers. The loop is cooperative:
//! suspension happens only at the inter-batch sleep and between handler
//! invocations inside a batch, and a stop request is honored once per
//! iteration, after the in-flight batch finishes.
//!
//! # Single instance
//!
//! No cross-process lease is taken on outbox rows. Running more than one
//! processor against the same outbox double-delivers; single-instance
//! deployment is a hard operational requirement (see DESIGN.md). The
//! metrics projection is idempotent under replay via its watermark, so an
//! accidental second instance corrupts nothing, it only duplicates work and
//! best-effort handler invocations.

use crate::registry::HandlerRegistry;
use caresight_core::clock::Clock;
use caresight_core::dead_letter::{DeadLetterRecord, DeadLetterSink};
use caresight_core::handler::HandlerError;
use caresight_core::outbox::{OutboxError, OutboxRecord, OutboxStore};
use caresight_telemetry::{LagMetrics, ProjectionMetrics};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Observable lifecycle of the processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorState {
    /// Not running.
    Stopped,
    /// Polling and delivering.
    Running,
    /// Stop requested; the current batch is finishing.
    Stopping,
}

const STATE_STOPPED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;

impl ProcessorState {
    const fn from_u8(value: u8) -> Self {
        match value {
            STATE_RUNNING => Self::Running,
            STATE_STOPPING => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => STATE_STOPPED,
            Self::Running => STATE_RUNNING,
            Self::Stopping => STATE_STOPPING,
        }
    }
}

/// What to do with a row whose handlers have been attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Mark `processed_at` once all handlers were attempted, success or not.
    ///
    /// This is the default and trades perfect delivery for forward
    /// progress: a persistently failing handler loses events (at most once
    /// per consumer) instead of wedging the queue.
    AdvanceAlways,

    /// Mark only on full success; retry failed rows on later polls and
    /// dead-letter them once the attempt budget is exhausted.
    RetryThenDeadLetter {
        /// Delivery attempts before the row is dead-lettered.
        max_attempts: i32,
    },
}

/// Stop/state handle for a running [`OutboxProcessor`].
#[derive(Clone)]
pub struct ProcessorControl {
    shutdown: watch::Sender<bool>,
    state: Arc<AtomicU8>,
}

impl ProcessorControl {
    /// Request cooperative shutdown.
    ///
    /// The request is checked once per loop iteration; the in-flight batch
    /// always finishes before the loop exits.
    pub fn stop(&self) {
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_STOPPING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let _ = self.shutdown.send(true);
    }

    /// Current processor state.
    #[must_use]
    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Background worker delivering outbox rows to registered handlers.
pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    batch_size: usize,
    policy: CompletionPolicy,
    lag_warn_threshold: Duration,
    state: Arc<AtomicU8>,
    shutdown: watch::Receiver<bool>,
}

impl OutboxProcessor {
    /// Create a processor and its control handle.
    ///
    /// Defaults: batch size 100, [`CompletionPolicy::AdvanceAlways`], 60s
    /// lag warning threshold, no dead-letter sink.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> (Self, ProcessorControl) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(AtomicU8::new(STATE_STOPPED));

        let processor = Self {
            store,
            registry,
            clock,
            dead_letters: None,
            batch_size: 100,
            policy: CompletionPolicy::AdvanceAlways,
            lag_warn_threshold: Duration::from_secs(60),
            state: Arc::clone(&state),
            shutdown: shutdown_rx,
        };

        let control = ProcessorControl {
            shutdown: shutdown_tx,
            state,
        };

        (processor, control)
    }

    /// Set the maximum rows fetched per poll.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the completion policy.
    #[must_use]
    pub const fn with_completion_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach a dead-letter sink for the retry policy.
    #[must_use]
    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Set the data-lag warning threshold.
    #[must_use]
    pub const fn with_lag_warn_threshold(mut self, threshold: Duration) -> Self {
        self.lag_warn_threshold = threshold;
        self
    }

    /// Current processor state.
    #[must_use]
    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Run the poll loop until a stop is requested.
    ///
    /// Each iteration: fetch a batch, deliver it, record cycle metrics and
    /// data lag, then sleep `poll_interval`. A batch-level error (store
    /// unreachable) never stops the loop; it is logged and retried after
    /// the next sleep, indefinitely.
    pub async fn start(&mut self, poll_interval: Duration) {
        self.state.store(STATE_RUNNING, Ordering::SeqCst);
        tracing::info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            policy = ?self.policy,
            "Outbox processor started"
        );

        loop {
            // Cooperative shutdown, checked once per iteration.
            if *self.shutdown.borrow() {
                break;
            }

            let cycle_start = Instant::now();
            match self.run_once().await {
                Ok(delivered) => {
                    ProjectionMetrics::record_cycle(cycle_start.elapsed(), true);
                    if delivered > 0 {
                        tracing::debug!(delivered, "Outbox batch delivered");
                    }
                }
                Err(e) => {
                    ProjectionMetrics::record_cycle(cycle_start.elapsed(), false);
                    tracing::error!(
                        error = %e,
                        "Outbox batch failed; retrying after poll interval"
                    );
                }
            }

            self.observe_lag().await;

            tokio::select! {
                () = self.clock.sleep(poll_interval) => {}
                _ = self.shutdown.changed() => {}
            }
        }

        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        tracing::info!("Outbox processor stopped");
    }

    /// Fetch and deliver one batch. Public so tests (and backfills) can
    /// drive iterations deterministically without the sleep loop.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError`] on store failures; handler failures never
    /// surface here.
    pub async fn run_once(&self) -> Result<usize, OutboxError> {
        let batch = self.store.fetch_unprocessed(self.batch_size).await?;

        for record in &batch {
            self.deliver(record).await?;
        }

        Ok(batch.len())
    }

    /// Deliver one row to all handlers for its type, then close it per the
    /// completion policy.
    async fn deliver(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        let mut first_failure: Option<HandlerError> = None;

        for handler in self.registry.handlers_for(&record.event_type) {
            if let Err(e) = handler.handle(record).await {
                tracing::warn!(
                    handler = handler.name(),
                    event_id = %record.id,
                    event_type = %record.event_type,
                    error = %e,
                    "Outbox handler failed"
                );
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }

        match (self.policy, first_failure) {
            // Advance regardless of handler outcome: forward progress over
            // perfect delivery.
            (CompletionPolicy::AdvanceAlways, _)
            | (CompletionPolicy::RetryThenDeadLetter { .. }, None) => {
                self.store.mark_processed(record.id, self.clock.now()).await
            }

            (CompletionPolicy::RetryThenDeadLetter { max_attempts }, Some(failure)) => {
                let attempts = self.store.record_attempt(record.id).await?;
                if attempts < max_attempts {
                    tracing::info!(
                        event_id = %record.id,
                        attempts,
                        max_attempts,
                        "Delivery failed; row left for retry"
                    );
                    return Ok(());
                }

                self.dead_letter(record, &failure, attempts).await?;
                self.store.mark_processed(record.id, self.clock.now()).await
            }
        }
    }

    async fn dead_letter(
        &self,
        record: &OutboxRecord,
        failure: &HandlerError,
        attempts: i32,
    ) -> Result<(), OutboxError> {
        tracing::warn!(
            event_id = %record.id,
            event_type = %record.event_type,
            handler = %failure.handler,
            attempts,
            "Delivery attempts exhausted; dead-lettering"
        );

        let Some(sink) = &self.dead_letters else {
            tracing::error!(
                event_id = %record.id,
                "No dead-letter sink configured; failed delivery is dropped"
            );
            return Ok(());
        };

        sink.push(DeadLetterRecord {
            event_id: record.id,
            event_type: record.event_type.clone(),
            payload: record.payload.clone(),
            handler: failure.handler.clone(),
            error: failure.reason.clone(),
            attempts,
            occurred_at: record.occurred_at,
        })
        .await
    }

    /// Update the data-lag gauge from the newest ingested event.
    async fn observe_lag(&self) {
        match self.store.latest_ingested_at().await {
            Ok(Some(newest)) => {
                let lag = (self.clock.now() - newest)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                LagMetrics::observe(lag, self.lag_warn_threshold);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Could not compute data lag");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use caresight_core::event::{EventEnvelope, EventPayload, TaskState, TASK_STATE_CHANGED};
    use caresight_testing::{
        InMemoryDeadLetters, InMemoryOutboxStore, ManualClock, RecordingHandler,
    };
    use chrono::Duration as ChronoDuration;

    fn task_record(occurred_offset_secs: i64) -> OutboxRecord {
        let mut envelope = EventEnvelope::new(EventPayload::TaskStateChanged {
            task_id: format!("task-{occurred_offset_secs}"),
            client_id: "client-1".to_string(),
            previous_state: Some(TaskState::InProgress),
            new_state: TaskState::Completed,
        });
        envelope.occurred_at += ChronoDuration::seconds(occurred_offset_secs);
        OutboxRecord::from_envelope(&envelope).unwrap()
    }

    async fn seed(store: &InMemoryOutboxStore, records: Vec<OutboxRecord>) {
        for record in records {
            store.insert(record).await.unwrap();
        }
    }

    fn processor_with(
        store: &InMemoryOutboxStore,
        registry: Arc<HandlerRegistry>,
    ) -> (OutboxProcessor, ProcessorControl) {
        OutboxProcessor::new(
            Arc::new(store.clone()),
            registry,
            Arc::new(ManualClock::fixed()),
        )
    }

    #[tokio::test]
    async fn batch_is_delivered_in_occurrence_order() {
        let store = InMemoryOutboxStore::new();
        // Inserted out of order on purpose.
        let late = task_record(30);
        let early = task_record(10);
        let middle = task_record(20);
        let expected = vec![early.id, middle.id, late.id];
        seed(&store, vec![late, early, middle]).await;

        let registry = Arc::new(HandlerRegistry::new());
        let handler = Arc::new(RecordingHandler::new("recorder"));
        registry.register(TASK_STATE_CHANGED, Arc::clone(&handler) as _);

        let (processor, _control) = processor_with(&store, registry);
        let delivered = processor.run_once().await.unwrap();

        assert_eq!(delivered, 3);
        assert_eq!(handler.seen(), expected);
    }

    #[tokio::test]
    async fn advance_always_marks_processed_despite_handler_failure() {
        let store = InMemoryOutboxStore::new();
        let record = task_record(0);
        let id = record.id;
        seed(&store, vec![record]).await;

        let registry = Arc::new(HandlerRegistry::new());
        let failing = Arc::new(RecordingHandler::new("failing"));
        failing.fail(true);
        registry.register(TASK_STATE_CHANGED, Arc::clone(&failing) as _);

        let (processor, _control) = processor_with(&store, registry);
        processor.run_once().await.unwrap();

        assert!(store.get(id).unwrap().processed_at.is_some());

        // A second cycle finds nothing: processed_at is stable.
        assert_eq!(processor.run_once().await.unwrap(), 0);
        assert_eq!(failing.seen_count(), 1);
    }

    #[tokio::test]
    async fn retry_policy_leaves_failed_rows_then_dead_letters() {
        let store = InMemoryOutboxStore::new();
        let dead_letters = InMemoryDeadLetters::new();
        let record = task_record(0);
        let id = record.id;
        seed(&store, vec![record]).await;

        let registry = Arc::new(HandlerRegistry::new());
        let failing = Arc::new(RecordingHandler::new("failing"));
        failing.fail(true);
        registry.register(TASK_STATE_CHANGED, Arc::clone(&failing) as _);

        let (processor, _control) = OutboxProcessor::new(
            Arc::new(store.clone()),
            registry,
            Arc::new(ManualClock::fixed()),
        );
        let processor = processor
            .with_completion_policy(CompletionPolicy::RetryThenDeadLetter { max_attempts: 2 })
            .with_dead_letter_sink(Arc::new(dead_letters.clone()));

        // First attempt: row stays unprocessed, no dead letter yet.
        processor.run_once().await.unwrap();
        let row = store.get(id).unwrap();
        assert!(row.processed_at.is_none());
        assert_eq!(row.attempts, 1);
        assert!(dead_letters.is_empty());

        // Second attempt exhausts the budget: dead letter + processed.
        processor.run_once().await.unwrap();
        let row = store.get(id).unwrap();
        assert!(row.processed_at.is_some());
        assert_eq!(row.attempts, 2);
        assert_eq!(dead_letters.len(), 1);
        let dead = &dead_letters.all()[0];
        assert_eq!(dead.event_id, id);
        assert_eq!(dead.handler, "failing");
    }

    #[tokio::test]
    async fn retry_policy_marks_successful_rows_without_attempts() {
        let store = InMemoryOutboxStore::new();
        let record = task_record(0);
        let id = record.id;
        seed(&store, vec![record]).await;

        let registry = Arc::new(HandlerRegistry::new());
        registry.register(
            TASK_STATE_CHANGED,
            Arc::new(RecordingHandler::new("healthy")) as _,
        );

        let (processor, _control) = OutboxProcessor::new(
            Arc::new(store.clone()),
            registry,
            Arc::new(ManualClock::fixed()),
        );
        let processor = processor
            .with_completion_policy(CompletionPolicy::RetryThenDeadLetter { max_attempts: 3 });

        processor.run_once().await.unwrap();

        let row = store.get(id).unwrap();
        assert!(row.processed_at.is_some());
        assert_eq!(row.attempts, 0);
    }

    #[tokio::test]
    async fn rows_with_no_registered_handler_are_still_closed() {
        let store = InMemoryOutboxStore::new();
        let record = task_record(0);
        let id = record.id;
        seed(&store, vec![record]).await;

        let (processor, _control) =
            processor_with(&store, Arc::new(HandlerRegistry::new()));
        processor.run_once().await.unwrap();

        assert!(store.get(id).unwrap().processed_at.is_some());
    }

    #[tokio::test]
    async fn start_and_stop_transition_the_state_machine() {
        let store = InMemoryOutboxStore::new();
        let registry = Arc::new(HandlerRegistry::new());
        let (mut processor, control) = processor_with(&store, registry);

        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert_eq!(control.state(), ProcessorState::Stopped);

        let handle = tokio::spawn(async move {
            processor.start(Duration::from_millis(1)).await;
        });

        // Let the loop spin up, then request shutdown.
        tokio::task::yield_now().await;
        control.stop();
        handle.await.unwrap();

        assert_eq!(control.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn loop_survives_batch_errors_and_keeps_polling() {
        let store = InMemoryOutboxStore::new();
        store.fail_fetches(true);

        let clock = ManualClock::fixed();
        let registry = Arc::new(HandlerRegistry::new());
        let (mut processor, control) = OutboxProcessor::new(
            Arc::new(store.clone()),
            registry,
            Arc::new(clock.clone()),
        );

        let handle = tokio::spawn(async move {
            processor.start(Duration::from_millis(1)).await;
        });

        // The loop must keep sleeping and retrying despite fetch errors.
        while clock.sleep_count() < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(control.state(), ProcessorState::Running);

        control.stop();
        handle.await.unwrap();
        assert_eq!(control.state(), ProcessorState::Stopped);
    }
}
