//! # Caresight Outbox
//!
//! The transactional-outbox delivery machinery of the Caresight analytics
//! pipeline:
//!
//! - [`EventDispatcher`]: write-ahead outbox insert plus optional
//!   synchronous in-process handler fan-out
//! - [`OutboxProcessor`]: the single background worker that polls
//!   unprocessed rows and delivers them to registered handlers
//! - [`HandlerRegistry`]: event-type to handler mapping shared by both
//!
//! # Delivery semantics
//!
//! The outbox gives at-least-once delivery without distributed
//! transactions: the event row is durable before anything is delivered, and
//! the processor closes rows according to a configurable
//! [`CompletionPolicy`]. The synchronous path is best-effort only; its
//! failures are logged and swallowed.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use caresight_outbox::{EventDispatcher, HandlerRegistry, OutboxProcessor};
//! use caresight_core::clock::SystemClock;
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! let dispatcher = EventDispatcher::new(Arc::clone(&outbox_store), Arc::clone(&registry));
//!
//! let (mut processor, control) =
//!     OutboxProcessor::new(outbox_store, registry, Arc::new(SystemClock));
//! tokio::spawn(async move { processor.start(Duration::from_secs(1)).await });
//!
//! // ... later, on shutdown:
//! control.stop();
//! ```

mod dispatcher;
mod processor;
mod registry;

pub use dispatcher::{DispatchError, EventDispatcher};
pub use processor::{CompletionPolicy, OutboxProcessor, ProcessorControl, ProcessorState};
pub use registry::HandlerRegistry;
