//! Domain events and the discriminant-to-decoder registry.
//!
//! Events are immutable facts about things that already happened in the care
//! domain. The set of event types is closed: [`EventPayload`] is a sum type
//! over the known variants, and an explicit discriminant-to-decoder table maps
//! the wire discriminant (e.g. `TASK_STATE_CHANGED`) back to a decoder. The
//! compiler checks exhaustiveness for known variants; the runtime
//! [`EventError::UnknownEventType`] guard only fires for discriminants this
//! build has never heard of (a producer/consumer version mismatch).
//!
//! # Identity invariants
//!
//! `event_type`, `aggregate_type`, and `aggregate_id` are derived from the
//! payload variant and its identifying field. They are fixed at construction
//! and cannot be supplied (or mutated) by callers.
//!
//! # Example
//!
//! ```
//! use caresight_core::event::{EventEnvelope, EventPayload, TaskState};
//!
//! let envelope = EventEnvelope::new(EventPayload::TaskStateChanged {
//!     task_id: "task-7".to_string(),
//!     client_id: "client-1".to_string(),
//!     previous_state: Some(TaskState::InProgress),
//!     new_state: TaskState::Completed,
//! });
//!
//! assert_eq!(envelope.event_type(), "TASK_STATE_CHANGED");
//! assert_eq!(envelope.aggregate_type(), "task");
//! assert_eq!(envelope.aggregate_id(), "task-7");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Discriminant for [`EventPayload::TaskStateChanged`].
pub const TASK_STATE_CHANGED: &str = "TASK_STATE_CHANGED";
/// Discriminant for [`EventPayload::AlertCreated`].
pub const ALERT_CREATED: &str = "ALERT_CREATED";
/// Discriminant for [`EventPayload::AssessmentRecorded`].
pub const ASSESSMENT_RECORDED: &str = "ASSESSMENT_RECORDED";
/// Discriminant for [`EventPayload::ActionPlanVersionActivated`].
pub const ACTION_PLAN_VERSION_ACTIVATED: &str = "ACTION_PLAN_VERSION_ACTIVATED";

/// All known event discriminants, in registry order.
pub const ALL_EVENT_TYPES: &[&str] = &[
    TASK_STATE_CHANGED,
    ALERT_CREATED,
    ASSESSMENT_RECORDED,
    ACTION_PLAN_VERSION_ACTIVATED,
];

/// Error types for event construction and decoding.
#[derive(Error, Debug)]
pub enum EventError {
    /// The discriminant is not in the decoder registry.
    ///
    /// This is fatal at decode time: it means the producer is writing an
    /// event type this consumer build does not know about.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// Failed to serialize an event envelope.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// The payload bytes did not match the shape the discriminant promises.
    #[error("Failed to decode {event_type} payload: {reason}")]
    Deserialization {
        /// The discriminant whose decoder rejected the payload.
        event_type: String,
        /// What the decoder objected to.
        reason: String,
    },
}

/// Lifecycle state of a care task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created but not yet started.
    NotStarted,
    /// Being actively worked; the only *active* state.
    InProgress,
    /// Progress is stopped on an impediment.
    Blocked,
    /// Finished successfully.
    Completed,
    /// Abandoned before completion.
    Cancelled,
}

impl TaskState {
    /// Whether this state counts toward the active-tasks gauge.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::InProgress)
    }
}

/// Severity attached to an alert at creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational, no action required.
    Info,
    /// Needs attention soon.
    Warning,
    /// Needs immediate attention.
    Critical,
}

/// The closed set of domain events this pipeline understands.
///
/// Serialization is internally tagged with the wire discriminant so a stored
/// payload is self-describing; decoding goes through the explicit registry in
/// [`EventPayload::decode`] so an unknown discriminant is caught before serde
/// ever runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    /// A care task moved between lifecycle states.
    #[serde(rename = "TASK_STATE_CHANGED")]
    TaskStateChanged {
        /// The task that changed.
        task_id: String,
        /// The client the task belongs to.
        client_id: String,
        /// State before the change; `None` when the task was just created.
        previous_state: Option<TaskState>,
        /// State after the change.
        new_state: TaskState,
    },

    /// An alert was opened for a client.
    #[serde(rename = "ALERT_CREATED")]
    AlertCreated {
        /// The new alert.
        alert_id: String,
        /// The client the alert concerns.
        client_id: String,
        /// How urgent the alert is.
        severity: AlertSeverity,
    },

    /// A risk assessment was recorded for a client.
    #[serde(rename = "ASSESSMENT_RECORDED")]
    AssessmentRecorded {
        /// The assessment that was recorded.
        assessment_id: String,
        /// The client that was assessed.
        client_id: String,
        /// Computed risk score, higher is riskier.
        risk_score: f64,
    },

    /// A new version of a client's action plan became the active one.
    #[serde(rename = "ACTION_PLAN_VERSION_ACTIVATED")]
    ActionPlanVersionActivated {
        /// The action plan whose version changed.
        plan_id: String,
        /// The client the plan belongs to.
        client_id: String,
        /// The version that was activated.
        version: u32,
    },
}

/// A payload decoder: turns a raw JSON payload into a typed variant.
type Decoder = fn(&Value) -> Result<EventPayload, EventError>;

/// The discriminant-to-decoder registry.
///
/// Adding a variant to [`EventPayload`] without registering it here is caught
/// by the round-trip tests below, not silently at runtime.
const DECODERS: &[(&str, Decoder)] = &[
    (TASK_STATE_CHANGED, decode_task_state_changed),
    (ALERT_CREATED, decode_alert_created),
    (ASSESSMENT_RECORDED, decode_assessment_recorded),
    (ACTION_PLAN_VERSION_ACTIVATED, decode_action_plan_version_activated),
];

fn decode_task_state_changed(payload: &Value) -> Result<EventPayload, EventError> {
    #[derive(Deserialize)]
    struct Fields {
        task_id: String,
        client_id: String,
        previous_state: Option<TaskState>,
        new_state: TaskState,
    }

    let fields: Fields = from_payload(TASK_STATE_CHANGED, payload)?;
    Ok(EventPayload::TaskStateChanged {
        task_id: fields.task_id,
        client_id: fields.client_id,
        previous_state: fields.previous_state,
        new_state: fields.new_state,
    })
}

fn decode_alert_created(payload: &Value) -> Result<EventPayload, EventError> {
    #[derive(Deserialize)]
    struct Fields {
        alert_id: String,
        client_id: String,
        severity: AlertSeverity,
    }

    let fields: Fields = from_payload(ALERT_CREATED, payload)?;
    Ok(EventPayload::AlertCreated {
        alert_id: fields.alert_id,
        client_id: fields.client_id,
        severity: fields.severity,
    })
}

fn decode_assessment_recorded(payload: &Value) -> Result<EventPayload, EventError> {
    #[derive(Deserialize)]
    struct Fields {
        assessment_id: String,
        client_id: String,
        risk_score: f64,
    }

    let fields: Fields = from_payload(ASSESSMENT_RECORDED, payload)?;
    Ok(EventPayload::AssessmentRecorded {
        assessment_id: fields.assessment_id,
        client_id: fields.client_id,
        risk_score: fields.risk_score,
    })
}

fn decode_action_plan_version_activated(payload: &Value) -> Result<EventPayload, EventError> {
    #[derive(Deserialize)]
    struct Fields {
        plan_id: String,
        client_id: String,
        version: u32,
    }

    let fields: Fields = from_payload(ACTION_PLAN_VERSION_ACTIVATED, payload)?;
    Ok(EventPayload::ActionPlanVersionActivated {
        plan_id: fields.plan_id,
        client_id: fields.client_id,
        version: fields.version,
    })
}

fn from_payload<T: serde::de::DeserializeOwned>(
    event_type: &str,
    payload: &Value,
) -> Result<T, EventError> {
    serde_json::from_value(payload.clone()).map_err(|e| EventError::Deserialization {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })
}

impl EventPayload {
    /// Returns the wire discriminant for this variant.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::TaskStateChanged { .. } => TASK_STATE_CHANGED,
            Self::AlertCreated { .. } => ALERT_CREATED,
            Self::AssessmentRecorded { .. } => ASSESSMENT_RECORDED,
            Self::ActionPlanVersionActivated { .. } => ACTION_PLAN_VERSION_ACTIVATED,
        }
    }

    /// Returns the aggregate type this variant is pinned to.
    #[must_use]
    pub const fn aggregate_type(&self) -> &'static str {
        match self {
            Self::TaskStateChanged { .. } => "task",
            Self::AlertCreated { .. } => "alert",
            Self::AssessmentRecorded { .. } => "assessment",
            Self::ActionPlanVersionActivated { .. } => "action_plan",
        }
    }

    /// Returns the aggregate id, derived from the variant's identifying field.
    #[must_use]
    pub fn aggregate_id(&self) -> &str {
        match self {
            Self::TaskStateChanged { task_id, .. } => task_id,
            Self::AlertCreated { alert_id, .. } => alert_id,
            Self::AssessmentRecorded { assessment_id, .. } => assessment_id,
            Self::ActionPlanVersionActivated { plan_id, .. } => plan_id,
        }
    }

    /// Returns the client this event concerns.
    #[must_use]
    pub fn client_id(&self) -> &str {
        match self {
            Self::TaskStateChanged { client_id, .. }
            | Self::AlertCreated { client_id, .. }
            | Self::AssessmentRecorded { client_id, .. }
            | Self::ActionPlanVersionActivated { client_id, .. } => client_id,
        }
    }

    /// Decode a payload through the discriminant registry.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEventType`] when `event_type` is not
    /// registered, or [`EventError::Deserialization`] when the payload does
    /// not match the registered shape.
    pub fn decode(event_type: &str, payload: &Value) -> Result<Self, EventError> {
        let decoder = DECODERS
            .iter()
            .find(|(discriminant, _)| *discriminant == event_type)
            .map(|(_, decoder)| decoder)
            .ok_or_else(|| EventError::UnknownEventType(event_type.to_string()))?;

        decoder(payload)
    }
}

/// An immutable domain event with identity and causation context.
///
/// Envelopes are created once by business logic and never updated. The
/// identity triple (`event_type`, `aggregate_type`, `aggregate_id`) is
/// delegated to the payload variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally unique event identifier (also the outbox row key).
    pub event_id: Uuid,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
    /// Links all events of one logical operation.
    pub correlation_id: Uuid,
    /// The event that directly caused this one, if any.
    pub causation_id: Option<Uuid>,
    /// Open metadata map (user id, channel, schema hints, ...).
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    /// The typed domain payload.
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Create a new envelope, stamping identity and occurrence time.
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
            metadata: serde_json::Map::new(),
            payload,
        }
    }

    /// Create an envelope caused by `parent`.
    ///
    /// Correlation is inherited; causation points at the parent event.
    #[must_use]
    pub fn caused_by(payload: EventPayload, parent: &Self) -> Self {
        Self {
            correlation_id: parent.correlation_id,
            causation_id: Some(parent.event_id),
            ..Self::new(payload)
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the wire discriminant, pinned by the payload variant.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Returns the aggregate type, pinned by the payload variant.
    #[must_use]
    pub const fn aggregate_type(&self) -> &'static str {
        self.payload.aggregate_type()
    }

    /// Returns the aggregate id, derived from the payload's identifying field.
    #[must_use]
    pub fn aggregate_id(&self) -> &str {
        self.payload.aggregate_id()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    fn sample_task_event() -> EventPayload {
        EventPayload::TaskStateChanged {
            task_id: "task-1".to_string(),
            client_id: "client-9".to_string(),
            previous_state: Some(TaskState::InProgress),
            new_state: TaskState::Completed,
        }
    }

    #[test]
    fn identity_is_pinned_by_variant() {
        let envelope = EventEnvelope::new(sample_task_event());
        assert_eq!(envelope.event_type(), "TASK_STATE_CHANGED");
        assert_eq!(envelope.aggregate_type(), "task");
        assert_eq!(envelope.aggregate_id(), "task-1");
        assert_eq!(envelope.payload.client_id(), "client-9");
    }

    #[test]
    fn every_variant_round_trips_through_the_registry() {
        let variants = vec![
            sample_task_event(),
            EventPayload::AlertCreated {
                alert_id: "alert-3".to_string(),
                client_id: "client-9".to_string(),
                severity: AlertSeverity::Critical,
            },
            EventPayload::AssessmentRecorded {
                assessment_id: "assessment-2".to_string(),
                client_id: "client-9".to_string(),
                risk_score: 42.5,
            },
            EventPayload::ActionPlanVersionActivated {
                plan_id: "plan-8".to_string(),
                client_id: "client-9".to_string(),
                version: 3,
            },
        ];

        for payload in variants {
            let json = serde_json::to_value(&payload).unwrap();
            let decoded = EventPayload::decode(payload.event_type(), &json).unwrap();
            assert_eq!(payload, decoded);
        }
    }

    #[test]
    fn registry_covers_all_discriminants() {
        for event_type in ALL_EVENT_TYPES {
            assert!(
                DECODERS.iter().any(|(discriminant, _)| discriminant == event_type),
                "no decoder registered for {event_type}"
            );
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = EventPayload::decode("CERTIFICATE_ISSUED", &serde_json::json!({}));
        assert!(matches!(err, Err(EventError::UnknownEventType(t)) if t == "CERTIFICATE_ISSUED"));
    }

    #[test]
    fn malformed_payload_is_a_deserialization_error() {
        let err = EventPayload::decode(
            ASSESSMENT_RECORDED,
            &serde_json::json!({ "assessment_id": "a-1" }),
        );
        assert!(matches!(err, Err(EventError::Deserialization { .. })));
    }

    #[test]
    fn caused_by_inherits_correlation() {
        let parent = EventEnvelope::new(sample_task_event());
        let child = EventEnvelope::caused_by(
            EventPayload::AlertCreated {
                alert_id: "alert-1".to_string(),
                client_id: "client-9".to_string(),
                severity: AlertSeverity::Warning,
            },
            &parent,
        );

        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.causation_id, Some(parent.event_id));
        assert_ne!(child.event_id, parent.event_id);
    }

    #[test]
    fn only_in_progress_is_active() {
        assert!(TaskState::InProgress.is_active());
        assert!(!TaskState::NotStarted.is_active());
        assert!(!TaskState::Blocked.is_active());
        assert!(!TaskState::Completed.is_active());
        assert!(!TaskState::Cancelled.is_active());
    }
}
