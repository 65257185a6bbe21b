//! # Turnstile Testing
//!
//! Testing utilities and helpers for the Turnstile admission-control crates.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - A scriptable `MessageSender` that records deliveries
//! - A call-counting operation for asserting fail-fast behavior
//!
//! ## Example
//!
//! ```ignore
//! use turnstile_testing::{ManualClock, test_clock};
//! use std::time::Duration;
//!
//! #[tokio::test]
//! async fn test_breaker_recovers() {
//!     let clock = ManualClock::starting_at(test_clock().now());
//!     let breaker = CircuitBreaker::with_clock("payment", config, Arc::new(clock.clone()));
//!
//!     // ... open the breaker ...
//!     clock.advance(Duration::from_secs(30));
//!     // ... the next call is the half-open probe ...
//! }
//! ```

use chrono::{DateTime, Utc};
use turnstile_core::environment::Clock;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_testing::mocks::FixedClock;
    /// use turnstile_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
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

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same underlying time, so a test can hand one clone to
    /// the component under test and keep another to advance it.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_testing::mocks::ManualClock;
    /// use turnstile_core::environment::Clock;
    /// use std::time::Duration;
    ///
    /// let clock = ManualClock::default();
    /// let handle = clock.clone();
    /// let before = clock.now();
    /// handle.advance(Duration::from_millis(250));
    /// assert_eq!((clock.now() - before).num_milliseconds(), 250);
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at the given instant
        #[must_use]
        pub fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += delta;
        }

        /// Jump to an absolute instant
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::starting_at(test_clock().now())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

/// Mock collaborators standing in for external services
pub mod doubles;

// Re-export commonly used items
pub use doubles::{FlakyOperation, MockDeliveryError, RecordingSender};
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let handle = clock.clone();

        handle.advance(Duration::from_secs(61));

        assert_eq!((clock.now() - test_clock().now()).num_seconds(), 61);
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::default();
        let target = test_clock().now() + chrono::Duration::hours(2);
        clock.set(target);
        assert_eq!(clock.now(), target);
    }
}
