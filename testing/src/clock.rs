//! Manually driven clock for deterministic worker tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already failed

use caresight_core::clock::Clock;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A clock whose time only moves when the test says so.
///
/// `sleep` completes immediately (after yielding to the scheduler) and
/// counts invocations, so a test can drive a poll loop without real delays
/// and assert how many times the worker went to sleep.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
    sleeps: Arc<AtomicUsize>,
}

impl ManualClock {
    /// Create a clock pinned at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
            sleeps: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a clock pinned at an arbitrary fixed epoch.
    #[must_use]
    pub fn fixed() -> Self {
        Self::new(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap())
    }

    /// Move time forward.
    pub fn advance(&self, delta: ChronoDuration) {
        let mut now = self.now.write().unwrap();
        *now += delta;
    }

    /// How many times `sleep` has been awaited.
    #[must_use]
    pub fn sleep_count(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        let now = Arc::clone(&self.now);
        Box::pin(async move {
            // Advance virtual time by the requested duration, then yield so
            // other tasks (e.g. a stop signal) get a chance to run.
            if let Ok(delta) = ChronoDuration::from_std(duration) {
                *now.write().unwrap() += delta;
            }
            tokio::task::yield_now().await;
        })
    }
}
