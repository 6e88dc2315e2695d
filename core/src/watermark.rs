//! Projection watermarks for resumable, idempotent re-runs.
//!
//! Because the projection engine applies *deltas*, replaying an
//! already-applied batch would double count. The watermark records how far a
//! named projection has progressed through the event stream; the engine
//! skips anything the watermark already covers.

use crate::metrics::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// Progress marker for one projection.
///
/// Carries the `occurred_at` and `event_id` of the last successfully applied
/// event. The id disambiguates an exact-timestamp replay of the watermark
/// event itself; ordering between distinct events is by `occurred_at` alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Occurrence time of the last applied event.
    pub occurred_at: DateTime<Utc>,
    /// Id of the last applied event.
    pub event_id: Uuid,
}

impl Watermark {
    /// Create a new watermark.
    #[must_use]
    pub const fn new(occurred_at: DateTime<Utc>, event_id: Uuid) -> Self {
        Self {
            occurred_at,
            event_id,
        }
    }

    /// Whether an event is already reflected in this watermark.
    ///
    /// Strictly-older events are covered; an event at exactly the watermark
    /// timestamp is covered only when it *is* the watermark event.
    #[must_use]
    pub fn covers(&self, occurred_at: DateTime<Utc>, event_id: Uuid) -> bool {
        occurred_at < self.occurred_at
            || (occurred_at == self.occurred_at && event_id == self.event_id)
    }
}

/// Storage abstraction for projection watermarks.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the engine can hold an
/// `Arc<dyn WatermarkStore>` dependency.
pub trait WatermarkStore: Send + Sync {
    /// Persist the watermark for `projection_name`.
    fn save(
        &self,
        projection_name: &str,
        watermark: Watermark,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Load the watermark for `projection_name`.
    ///
    /// `None` means the projection has never applied anything: start from
    /// the beginning.
    fn load(
        &self,
        projection_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Watermark>>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn covers_older_events() {
        let wm = Watermark::new(
            Utc.timestamp_opt(1_000, 0).single().unwrap_or_default(),
            Uuid::new_v4(),
        );
        let older = Utc.timestamp_opt(999, 0).single().unwrap_or_default();
        let newer = Utc.timestamp_opt(1_001, 0).single().unwrap_or_default();

        assert!(wm.covers(older, Uuid::new_v4()));
        assert!(!wm.covers(newer, Uuid::new_v4()));
    }

    #[test]
    fn exact_timestamp_requires_id_match() {
        let id = Uuid::new_v4();
        let ts = Utc.timestamp_opt(1_000, 0).single().unwrap_or_default();
        let wm = Watermark::new(ts, id);

        assert!(wm.covers(ts, id));
        assert!(!wm.covers(ts, Uuid::new_v4()));
    }
}
