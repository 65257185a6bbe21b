//! Classified admission errors.
//!
//! These errors are produced purely from breaker, limiter or queue state,
//! before any dependency is reached. They are distinct from the errors of
//! the guarded operations so callers can decide to queue, retry later or
//! report upstream.

use crate::circuit::CircuitState;
use std::time::Duration;
use thiserror::Error;

/// A call was rejected because its circuit breaker does not admit traffic.
///
/// Raised while the circuit is OPEN and its reset timeout has not elapsed,
/// or while it is HALF_OPEN with the single probe already in flight.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker '{breaker}' is {state}, rejecting call")]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call
    pub breaker: String,
    /// State the breaker was in when it rejected
    pub state: CircuitState,
    /// Time left until the breaker admits a probe, when known
    pub retry_after: Option<Duration>,
}

/// A caller exceeded the request budget of a rate limiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Rate limit exceeded for '{limiter}', retry after {}ms", .retry_after.as_millis())]
pub struct RateLimitExceededError {
    /// Name of the limiter that rejected the request
    pub limiter: String,
    /// Caller identity the request was counted against
    pub key: String,
    /// Time until the current window ends
    pub retry_after: Duration,
}

impl RateLimitExceededError {
    /// Retry hint in whole milliseconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn retry_after_ms(&self) -> u64 {
        // Windows are minutes to hours; the value fits in u64.
        self.retry_after.as_millis() as u64
    }
}

/// The retry queue is at capacity and configured to reject new entries.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Retry queue is full (capacity {capacity})")]
pub struct QueueFullError {
    /// Configured queue capacity
    pub capacity: usize,
}
