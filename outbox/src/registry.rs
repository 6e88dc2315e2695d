//! Handler registry shared by the dispatcher and the processor.

use caresight_core::handler::EventHandler;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry mapping event discriminants to their consumers.
///
/// Registration order is preserved per event type; both the synchronous
/// dispatch path and the outbox processor invoke handlers in that order.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use caresight_core::event::TASK_STATE_CHANGED;
/// use caresight_outbox::HandlerRegistry;
/// # use caresight_core::handler::{EventHandler, HandlerError};
/// # use caresight_core::outbox::OutboxRecord;
/// # use std::pin::Pin;
/// # use std::future::Future;
/// # struct AuditLog;
/// # impl EventHandler for AuditLog {
/// #     fn name(&self) -> &str { "audit_log" }
/// #     fn handle(&self, _: &OutboxRecord)
/// #         -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
/// #         Box::pin(async { Ok(()) })
/// #     }
/// # }
///
/// let registry = HandlerRegistry::new();
/// registry.register(TASK_STATE_CHANGED, Arc::new(AuditLog));
/// assert_eq!(registry.handlers_for(TASK_STATE_CHANGED).len(), 1);
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type.
    ///
    /// The same handler instance may be registered for several types (the
    /// metrics projection registers for all four).
    pub fn register(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    /// Handlers registered for `event_type`, in registration order.
    #[must_use]
    pub fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let handlers = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.get(event_type).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caresight_core::event::{ALERT_CREATED, TASK_STATE_CHANGED};
    use caresight_testing::RecordingHandler;

    #[test]
    fn registration_order_is_preserved() {
        let registry = HandlerRegistry::new();
        registry.register(TASK_STATE_CHANGED, Arc::new(RecordingHandler::new("first")));
        registry.register(TASK_STATE_CHANGED, Arc::new(RecordingHandler::new("second")));
        registry.register(ALERT_CREATED, Arc::new(RecordingHandler::new("other")));

        let names: Vec<String> = registry
            .handlers_for(TASK_STATE_CHANGED)
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn unknown_type_has_no_handlers() {
        let registry = HandlerRegistry::new();
        assert!(registry.handlers_for("ASSESSMENT_RECORDED").is_empty());
    }
}
