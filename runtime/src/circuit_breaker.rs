//! Circuit breaker pattern for preventing cascading failures.
//!
//! A circuit breaker monitors calls to one external dependency and "opens"
//! (stops calling it) once failures reach a threshold, so a dead payment
//! gateway or email service is not hammered while it recovers.
//!
//! # States
//!
//! - **Closed**: Normal operation. Calls pass through. Failures are counted.
//! - **Open**: Calls fail immediately with [`CircuitOpenError`] until the
//!   reset timeout has elapsed.
//! - **HalfOpen**: A single probe call is let through. Its success closes the
//!   circuit; its failure reopens it.
//!
//! # Example
//!
//! ```rust
//! use turnstile_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(5)
//!     .reset_timeout(Duration::from_secs(30))
//!     .build();
//!
//! let breaker = CircuitBreaker::new("payment", config);
//!
//! match breaker.execute(|| async {
//!     // Your fallible operation
//!     Ok::<_, String>(42)
//! }).await {
//!     Ok(result) => println!("Success: {result}"),
//!     Err(e) => println!("Failed: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

use crate::observer::{Listeners, StateChangeListener, Subscription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use turnstile_core::environment::{Clock, SystemClock};
use turnstile_core::{CircuitOpenError, CircuitState};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of failures in the CLOSED window before opening the circuit
    pub failure_threshold: u32,
    /// Duration to wait in OPEN before admitting a probe
    pub reset_timeout: Duration,
    /// Number of probe successes in `HalfOpen` before closing the circuit
    pub success_threshold: u32,
    /// Number of transitions kept in the breaker's history
    pub history_limit: usize,
    /// An open critical breaker makes the service unhealthy rather than degraded
    pub critical: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_threshold: None,
            reset_timeout: None,
            success_threshold: None,
            history_limit: None,
            critical: false,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<u32>,
    reset_timeout: Option<Duration>,
    success_threshold: Option<u32>,
    history_limit: Option<usize>,
    critical: bool,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure threshold.
    ///
    /// Circuit opens after this many failures without an intervening success.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set the reset timeout.
    ///
    /// How long to stay in Open before letting a probe through.
    #[must_use]
    pub const fn reset_timeout(mut self, duration: Duration) -> Self {
        self.reset_timeout = Some(duration);
        self
    }

    /// Set the success threshold.
    ///
    /// Number of successful probes needed to close the circuit.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    /// Set how many transitions the breaker remembers.
    #[must_use]
    pub const fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Mark the guarded dependency as critical for health reporting.
    #[must_use]
    pub const fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Build the configuration.
    ///
    /// Thresholds and the history limit are clamped to at least 1.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(5).max(1),
            reset_timeout: self.reset_timeout.unwrap_or(Duration::from_secs(60)),
            success_threshold: self.success_threshold.unwrap_or(1).max(1),
            history_limit: self.history_limit.unwrap_or(100).max(1),
            critical: self.critical,
        }
    }
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit rejected the call without invoking the operation
    #[error(transparent)]
    Open(#[from] CircuitOpenError),
    /// Operation ran and failed; its error is passed through untouched
    #[error("Operation failed: {0}")]
    Operation(E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether the call was rejected by the circuit.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// The operation's own error, if the operation ran.
    #[must_use]
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Open(_) => None,
            Self::Operation(err) => Some(err),
        }
    }
}

/// One recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    /// Breaker that transitioned
    pub breaker: String,
    /// State before the transition
    pub previous_state: CircuitState,
    /// State after the transition
    pub new_state: CircuitState,
    /// Why the transition happened
    pub reason: String,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time snapshot of a breaker.
///
/// Two snapshots taken without an intervening call or transition compare
/// equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Failures counted in the current CLOSED window
    pub failure_count: u32,
    /// Failures required to open
    pub failure_threshold: u32,
    /// Probe successes required to close
    pub success_threshold: u32,
    /// Reset timeout in milliseconds
    pub reset_timeout_ms: u64,
    /// Last time the breaker entered OPEN
    pub opened_at: Option<DateTime<Utc>>,
    /// Last time a guarded call failed
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Milliseconds until a probe is admitted; only set while OPEN
    pub time_until_retry_ms: Option<u64>,
    /// Probe successes since entering `HalfOpen`
    pub half_open_successes: u32,
    /// Probe failures since entering `HalfOpen`
    pub half_open_failures: u32,
    /// Whether the `HalfOpen` probe is currently running
    pub probe_in_flight: bool,
    /// Calls attempted, including rejected ones
    pub total_calls: u64,
    /// Calls whose operation succeeded
    pub total_successes: u64,
    /// Calls whose operation failed
    pub total_failures: u64,
    /// Calls rejected without running the operation
    pub total_rejections: u64,
}

/// How a call got past admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Regular call while CLOSED
    Normal { generation: u64 },
    /// The single `HalfOpen` probe
    Probe { generation: u64 },
}

/// Internal state of the circuit breaker.
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Bumped on every transition so late results from an earlier state are ignored
    generation: u64,
    failure_count: u32,
    opened_at_ms: Option<i64>,
    last_failure_at: Option<DateTime<Utc>>,
    half_open_successes: u32,
    half_open_failures: u32,
    probe_in_flight: bool,
    history: VecDeque<StateChangeEvent>,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

/// Circuit breaker guarding one external dependency.
///
/// The state lives behind a mutex that is never held across the guarded
/// operation's await point, so slow calls do not block other callers.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
    listeners: Arc<Listeners>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker using the system clock.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a new circuit breaker with an injected clock.
    #[must_use]
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let history = VecDeque::with_capacity(config.history_limit.min(128));
        Self {
            name: name.into(),
            config,
            clock,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                failure_count: 0,
                opened_at_ms: None,
                last_failure_at: None,
                half_open_successes: 0,
                half_open_failures: 0,
                probe_in_flight: false,
                history,
                total_calls: 0,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run an operation through the circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerError::Open` if the circuit rejects the call; the
    /// operation is not invoked in that case.
    /// Returns `CircuitBreakerError::Operation` with the operation's own error
    /// if it ran and failed.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit()?;
        let mut guard = ProbeGuard::new(self, admission);

        let outcome = operation().await;
        guard.disarm();

        match outcome {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(admission);
                Err(CircuitBreakerError::Operation(err))
            }
        }
    }

    /// Whether a call made now would be admitted.
    ///
    /// Has no side effects; the answer may be stale by the time the caller
    /// acts on it.
    #[must_use]
    pub fn would_admit(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.remaining_cooldown(&inner, self.clock.now_millis()).is_zero(),
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Force the circuit open.
    ///
    /// Always records a history entry, even if the circuit is already open.
    /// The breaker still admits a probe once the reset timeout elapses.
    pub fn force_open(&self, reason: &str) {
        let event = {
            let mut inner = self.lock();
            self.transition(&mut inner, CircuitState::Open, format!("forced open: {reason}"))
        };
        tracing::info!(breaker = %self.name, reason, "Circuit breaker forced OPEN");
        self.listeners.notify(&event);
    }

    /// Force the circuit closed and reset its failure count.
    ///
    /// Always records a history entry, even if the circuit is already closed.
    pub fn force_close(&self, reason: &str) {
        let event = {
            let mut inner = self.lock();
            self.transition(&mut inner, CircuitState::Closed, format!("forced closed: {reason}"))
        };
        tracing::info!(breaker = %self.name, reason, "Circuit breaker forced CLOSED");
        self.listeners.notify(&event);
    }

    /// Register a listener invoked after every transition.
    ///
    /// The listener runs synchronously on the thread that performed the
    /// transition, after the state is committed. It must not block.
    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(listener))
    }

    pub(crate) fn subscribe(&self, listener: StateChangeListener) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Snapshot of the breaker's counters and state.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        let now_ms = self.clock.now_millis();
        let time_until_retry_ms = (inner.state == CircuitState::Open).then(|| {
            u64::try_from(self.remaining_cooldown(&inner, now_ms).as_millis()).unwrap_or(u64::MAX)
        });

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            reset_timeout_ms: u64::try_from(self.config.reset_timeout.as_millis())
                .unwrap_or(u64::MAX),
            opened_at: inner.opened_at_ms.and_then(DateTime::from_timestamp_millis),
            last_failure_at: inner.last_failure_at,
            time_until_retry_ms,
            half_open_successes: inner.half_open_successes,
            half_open_failures: inner.half_open_failures,
            probe_in_flight: inner.probe_in_flight,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    /// Most recent transitions, newest first.
    #[must_use]
    pub fn state_change_history(&self, limit: usize) -> Vec<StateChangeEvent> {
        self.lock().history.iter().rev().take(limit).cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_timeout_ms(&self) -> i64 {
        i64::try_from(self.config.reset_timeout.as_millis()).unwrap_or(i64::MAX)
    }

    fn remaining_cooldown(&self, inner: &BreakerState, now_ms: i64) -> Duration {
        let Some(opened_at_ms) = inner.opened_at_ms else {
            return Duration::ZERO;
        };
        let retry_at = opened_at_ms.saturating_add(self.reset_timeout_ms());
        let remaining = retry_at.saturating_sub(now_ms).max(0);
        Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
    }

    fn admit(&self) -> Result<Admission, CircuitOpenError> {
        let mut inner = self.lock();
        inner.total_calls += 1;

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal {
                generation: inner.generation,
            }),
            CircuitState::Open => {
                let remaining = self.remaining_cooldown(&inner, self.clock.now_millis());
                if !remaining.is_zero() {
                    return Err(self.reject(&mut inner, Some(remaining)));
                }

                let event =
                    self.transition(&mut inner, CircuitState::HalfOpen, "reset timeout elapsed");
                inner.probe_in_flight = true;
                let generation = inner.generation;
                drop(inner);

                tracing::info!(breaker = %self.name, "Circuit breaker transitioning OPEN -> HALF_OPEN");
                self.listeners.notify(&event);
                Ok(Admission::Probe { generation })
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.reject(&mut inner, None));
                }
                inner.probe_in_flight = true;
                Ok(Admission::Probe {
                    generation: inner.generation,
                })
            }
        }
    }

    fn reject(&self, inner: &mut BreakerState, retry_after: Option<Duration>) -> CircuitOpenError {
        inner.total_rejections += 1;
        metrics::counter!("circuit_breaker.rejected", "breaker" => self.name.clone()).increment(1);
        tracing::debug!(breaker = %self.name, state = %inner.state, "Circuit breaker rejecting call");

        CircuitOpenError {
            breaker: self.name.clone(),
            state: inner.state,
            retry_after,
        }
    }

    fn record_success(&self, admission: Admission) {
        metrics::counter!("circuit_breaker.calls", "breaker" => self.name.clone(), "outcome" => "success")
            .increment(1);

        let event = {
            let mut inner = self.lock();
            inner.total_successes += 1;

            match admission {
                Admission::Normal { generation }
                    if generation == inner.generation && inner.state == CircuitState::Closed =>
                {
                    inner.failure_count = 0;
                    None
                }
                Admission::Probe { generation }
                    if generation == inner.generation && inner.state == CircuitState::HalfOpen =>
                {
                    inner.probe_in_flight = false;
                    inner.half_open_successes += 1;
                    (inner.half_open_successes >= self.config.success_threshold).then(|| {
                        self.transition(&mut inner, CircuitState::Closed, "probe succeeded")
                    })
                }
                // State moved on while the call was running.
                _ => None,
            }
        };

        if let Some(event) = event {
            tracing::info!(breaker = %self.name, "Circuit breaker transitioning HALF_OPEN -> CLOSED");
            self.listeners.notify(&event);
        }
    }

    fn record_failure(&self, admission: Admission) {
        metrics::counter!("circuit_breaker.calls", "breaker" => self.name.clone(), "outcome" => "failure")
            .increment(1);

        let event = {
            let mut inner = self.lock();
            inner.total_failures += 1;
            inner.last_failure_at = Some(self.clock.now());

            match admission {
                Admission::Normal { generation }
                    if generation == inner.generation && inner.state == CircuitState::Closed =>
                {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.failure_threshold {
                        tracing::warn!(
                            breaker = %self.name,
                            failures = inner.failure_count,
                            threshold = self.config.failure_threshold,
                            "Circuit breaker transitioning CLOSED -> OPEN"
                        );
                        let reason = format!(
                            "failure threshold reached ({}/{})",
                            inner.failure_count, self.config.failure_threshold
                        );
                        Some(self.transition(&mut inner, CircuitState::Open, reason))
                    } else {
                        None
                    }
                }
                Admission::Probe { generation }
                    if generation == inner.generation && inner.state == CircuitState::HalfOpen =>
                {
                    inner.probe_in_flight = false;
                    inner.half_open_failures += 1;
                    tracing::warn!(
                        breaker = %self.name,
                        "Circuit breaker transitioning HALF_OPEN -> OPEN (probe failed)"
                    );
                    Some(self.transition(&mut inner, CircuitState::Open, "probe failed"))
                }
                _ => None,
            }
        };

        if let Some(event) = event {
            self.listeners.notify(&event);
        }
    }

    /// Free the probe slot of a probe that never completed.
    fn release_probe(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
            tracing::debug!(breaker = %self.name, "Probe dropped before completion, slot released");
        }
    }

    /// Apply a transition while holding the lock.
    ///
    /// Counters are updated and the history entry appended before the caller
    /// releases the lock and notifies listeners with the returned event.
    fn transition(
        &self,
        inner: &mut BreakerState,
        to: CircuitState,
        reason: impl Into<String>,
    ) -> StateChangeEvent {
        let now = self.clock.now();
        let from = inner.state;

        inner.state = to;
        inner.generation += 1;
        inner.probe_in_flight = false;
        match to {
            CircuitState::Open => inner.opened_at_ms = Some(now.timestamp_millis()),
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
                inner.half_open_failures = 0;
            }
            CircuitState::Closed => inner.failure_count = 0,
        }

        let event = StateChangeEvent {
            breaker: self.name.clone(),
            previous_state: from,
            new_state: to,
            reason: reason.into(),
            timestamp: now,
        };

        while inner.history.len() >= self.config.history_limit {
            inner.history.pop_front();
        }
        inner.history.push_back(event.clone());

        metrics::counter!(
            "circuit_breaker.state_change",
            "breaker" => self.name.clone(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);

        event
    }
}

/// Releases the `HalfOpen` probe slot if the probe future is dropped.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: Option<u64>,
}

impl<'a> ProbeGuard<'a> {
    const fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        let generation = match admission {
            Admission::Probe { generation } => Some(generation),
            Admission::Normal { .. } => None,
        };
        Self { breaker, generation }
    }

    const fn disarm(&mut self) {
        self.generation = None;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.generation {
            self.breaker.release_probe(generation);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use turnstile_testing::{FlakyOperation, ManualClock};

    fn breaker(threshold: u32, clock: &ManualClock) -> CircuitBreaker {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .reset_timeout(Duration::from_secs(30))
            .build();
        CircuitBreaker::with_clock("payment", config, Arc::new(clock.clone()))
    }

    async fn fail_times(breaker: &CircuitBreaker, op: &FlakyOperation, times: usize) {
        op.set_failing(true);
        for _ in 0..times {
            let _ = breaker.execute(|| op.run()).await;
        }
    }

    #[tokio::test]
    async fn test_closed_on_success() {
        let breaker = CircuitBreaker::new("payment", CircuitBreakerConfig::default());

        let result = breaker.execute(|| async { Ok::<_, String>(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_at_threshold_not_before() {
        let clock = ManualClock::default();
        let breaker = breaker(3, &clock);
        let op = FlakyOperation::failing();

        fail_times(&breaker, &op, 2).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 2);

        fail_times(&breaker, &op, 1).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().opened_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let clock = ManualClock::default();
        let breaker = breaker(3, &clock);
        let op = FlakyOperation::failing();

        fail_times(&breaker, &op, 2).await;
        op.set_failing(false);
        breaker.execute(|| op.run()).await.unwrap();
        fail_times(&breaker, &op, 2).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 2);
    }

    #[tokio::test]
    async fn test_operation_error_passes_through() {
        let breaker = CircuitBreaker::new("email", CircuitBreakerConfig::default());

        let err = breaker
            .execute(|| async { Err::<(), _>("smtp down") })
            .await
            .unwrap_err();

        assert!(!err.is_open());
        assert_eq!(err.into_operation(), Some("smtp down"));
    }

    #[tokio::test]
    async fn test_open_rejects_without_calling_operation() {
        let clock = ManualClock::default();
        let breaker = breaker(2, &clock);
        fail_times(&breaker, &FlakyOperation::failing(), 2).await;

        let op = FlakyOperation::succeeding();
        clock.advance(Duration::from_secs(10));
        let err = breaker.execute(|| op.run()).await.unwrap_err();

        assert_eq!(op.calls(), 0);
        match err {
            CircuitBreakerError::Open(open) => {
                assert_eq!(open.breaker, "payment");
                assert_eq!(open.state, CircuitState::Open);
                assert_eq!(open.retry_after, Some(Duration::from_secs(20)));
            }
            CircuitBreakerError::Operation(_) => panic!("expected rejection"),
        }
        assert_eq!(breaker.stats().total_rejections, 1);
        assert_eq!(breaker.stats().time_until_retry_ms, Some(20_000));
    }

    #[tokio::test]
    async fn test_probe_success_closes() {
        let clock = ManualClock::default();
        let breaker = breaker(2, &clock);
        fail_times(&breaker, &FlakyOperation::failing(), 2).await;

        clock.advance(Duration::from_secs(30));
        let op = FlakyOperation::succeeding();
        breaker.execute(|| op.run()).await.unwrap();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(op.calls(), 1);

        let history = breaker.state_change_history(10);
        let transitions: Vec<_> = history
            .iter()
            .map(|e| (e.previous_state, e.new_state))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (CircuitState::HalfOpen, CircuitState::Closed),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::Closed, CircuitState::Open),
            ]
        );
    }

    #[tokio::test]
    async fn test_probe_failure_reopens_with_new_opened_at() {
        let clock = ManualClock::default();
        let breaker = breaker(2, &clock);
        fail_times(&breaker, &FlakyOperation::failing(), 2).await;
        let first_opened = breaker.stats().opened_at.unwrap();

        clock.advance(Duration::from_secs(31));
        fail_times(&breaker, &FlakyOperation::failing(), 1).await;

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.half_open_failures, 1);
        assert_eq!(stats.opened_at.unwrap(), first_opened + chrono::Duration::seconds(31));
        assert_eq!(stats.time_until_retry_ms, Some(30_000));
    }

    #[tokio::test]
    async fn test_concurrent_call_rejected_during_probe() {
        let clock = ManualClock::default();
        let breaker = Arc::new(breaker(1, &clock));
        fail_times(&breaker, &FlakyOperation::failing(), 1).await;
        clock.advance(Duration::from_secs(30));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

        let probe = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        started_tx.send(()).unwrap();
                        release_rx.await.unwrap();
                        Ok::<_, String>(())
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let op = FlakyOperation::succeeding();
        let err = breaker.execute(|| op.run()).await.unwrap_err();
        assert!(err.is_open());
        assert_eq!(op.calls(), 0);

        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_probe_releases_slot() {
        let clock = ManualClock::default();
        let breaker = breaker(1, &clock);
        fail_times(&breaker, &FlakyOperation::failing(), 1).await;
        clock.advance(Duration::from_secs(30));

        {
            let pending = breaker.execute(|| std::future::pending::<Result<(), String>>());
            let mut pending = Box::pin(pending);
            assert!(futures::poll!(pending.as_mut()).is_pending());
            assert!(breaker.stats().probe_in_flight);
        }

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.stats().probe_in_flight);
        assert!(breaker.would_admit());

        breaker.execute(|| async { Ok::<_, String>(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_force_open_and_close_always_record_history() {
        let breaker = CircuitBreaker::new("database", CircuitBreakerConfig::default());

        breaker.force_close("maintenance check");
        breaker.force_open("database failover");
        breaker.force_open("still failing over");

        let history = breaker.state_change_history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].reason, "forced open: still failing over");
        assert_eq!(history[0].previous_state, CircuitState::Open);
        assert_eq!(history[2].previous_state, CircuitState::Closed);
        assert_eq!(history[2].new_state, CircuitState::Closed);

        let op = FlakyOperation::succeeding();
        assert!(breaker.execute(|| op.run()).await.unwrap_err().is_open());
        assert_eq!(op.calls(), 0);
    }

    #[tokio::test]
    async fn test_force_close_resets_failures() {
        let clock = ManualClock::default();
        let breaker = breaker(5, &clock);
        fail_times(&breaker, &FlakyOperation::failing(), 4).await;

        breaker.force_close("operator reset");

        assert_eq!(breaker.stats().failure_count, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_listeners_see_committed_state() {
        let clock = ManualClock::default();
        let breaker = Arc::new(breaker(1, &clock));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _subscription = {
            let seen = Arc::clone(&seen);
            let observed = Arc::downgrade(&breaker);
            breaker.on_state_change(move |event| {
                let state = observed.upgrade().map(|b| b.state());
                seen.lock().unwrap().push((event.new_state, state));
            })
        };

        fail_times(&breaker, &FlakyOperation::failing(), 1).await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![(CircuitState::Open, Some(CircuitState::Open))]);
    }

    #[tokio::test]
    async fn test_panicking_listener_is_isolated() {
        let breaker = CircuitBreaker::new("email", CircuitBreakerConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let _bad = breaker.on_state_change(|_| panic!("listener bug"));
        let _good = {
            let calls = Arc::clone(&calls);
            breaker.on_state_change(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        breaker.force_open("test");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_notifications() {
        let breaker = CircuitBreaker::new("email", CircuitBreakerConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let subscription = {
            let calls = Arc::clone(&calls);
            breaker.on_state_change(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        breaker.force_open("first");
        assert!(subscription.unsubscribe());
        breaker.force_close("second");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let config = CircuitBreakerConfig::builder().history_limit(3).build();
        let breaker = CircuitBreaker::new("email", config);

        for i in 0..5 {
            breaker.force_open(&format!("round {i}"));
        }

        let history = breaker.state_change_history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].reason, "forced open: round 4");
        assert_eq!(history[2].reason, "forced open: round 2");
    }

    #[tokio::test]
    async fn test_stats_snapshots_compare_equal() {
        let clock = ManualClock::default();
        let breaker = breaker(2, &clock);
        fail_times(&breaker, &FlakyOperation::failing(), 2).await;

        assert_eq!(breaker.stats(), breaker.stats());
    }

    #[tokio::test]
    async fn test_forced_open_breaker_probes_after_timeout() {
        let clock = ManualClock::default();
        let breaker = breaker(5, &clock);
        breaker.force_open("gateway incident");

        clock.advance(Duration::from_secs(30));
        assert!(breaker.would_admit());
        breaker.execute(|| async { Ok::<_, String>(()) }).await.unwrap();

        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
