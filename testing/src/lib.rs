//! # Studio Credits Testing
//!
//! Testing utilities and helpers for the studio credits engine.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - A Given-When-Then harness for reducers (`ReducerTest`)
//! - Assertion helpers for effect lists
//!
//! ## Example
//!
//! ```ignore
//! use studio_credits_testing::{test_clock, ManualClock};
//!
//! let clock = ManualClock::new(test_clock().now());
//! clock.advance(chrono::Duration::hours(4));
//! ```

use chrono::{DateTime, Duration, Utc};
use studio_credits_core::environment::Clock;
use std::sync::{Arc, RwLock};

pub mod reducer_test;

pub use reducer_test::{assertions, ReducerTest};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Arc, Clock, DateTime, Duration, RwLock, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use studio_credits_testing::mocks::FixedClock;
    /// use studio_credits_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same underlying instant, so a test can keep one
    /// handle while the engine holds another and time-travel between steps.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward (or backward, for negative durations)
        pub fn advance(&self, by: Duration) {
            let mut time = self
                .time
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute instant
        pub fn set(&self, to: DateTime<Utc>) {
            let mut time = self
                .time
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *time = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .time
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// The instant `test_clock()` is frozen at
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is a constant.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Install a compact tracing subscriber for tests (idempotent).
///
/// Honors `RUST_LOG`; output is captured by the test harness.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{test_clock, test_epoch, FixedClock, ManualClock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now(), test_epoch());
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_epoch());
        let handle = clock.clone();

        handle.advance(Duration::hours(3));
        assert_eq!(clock.now(), test_epoch() + Duration::hours(3));

        clock.set(test_epoch());
        assert_eq!(handle.now(), test_epoch());
    }
}
