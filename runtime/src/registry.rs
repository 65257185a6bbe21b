//! Named circuit breakers, one per external dependency.
//!
//! The registry is built once at startup and shared by `Arc`. Its map is not
//! mutated after construction; each breaker guards its own state. Every
//! breaker transition is copied into a bounded registry-wide feed and fanned
//! out to registry subscribers.

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats,
    StateChangeEvent,
};
use crate::observer::{Listeners, Subscription};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use turnstile_core::CircuitOpenError;
use turnstile_core::environment::{Clock, SystemClock};

/// Breaker guarding the payment gateway.
pub const PAYMENT: &str = "payment";
/// Breaker guarding the email delivery service.
pub const EMAIL: &str = "email";
/// Breaker guarding the database service.
pub const DATABASE: &str = "database";

/// Default size of the registry-wide transition feed.
pub const DEFAULT_FEED_LIMIT: usize = 500;

/// No breaker is registered under the requested name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No circuit breaker registered under '{0}'")]
pub struct UnknownBreakerError(pub String);

/// Errors from [`CircuitBreakerRegistry::execute`].
#[derive(Error, Debug)]
pub enum RegistryError<E> {
    /// No breaker with that name
    #[error(transparent)]
    Unknown(#[from] UnknownBreakerError),
    /// Circuit rejected the call without invoking the operation
    #[error(transparent)]
    Open(CircuitOpenError),
    /// Operation ran and failed
    #[error("Operation failed: {0}")]
    Operation(E),
}

impl<E> From<CircuitBreakerError<E>> for RegistryError<E> {
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::Open(open) => Self::Open(open),
            CircuitBreakerError::Operation(inner) => Self::Operation(inner),
        }
    }
}

/// Registry of named circuit breakers.
///
/// # Example
///
/// ```
/// use turnstile_runtime::registry::{CircuitBreakerRegistry, PAYMENT};
///
/// # async fn example() {
/// let registry = CircuitBreakerRegistry::with_defaults();
/// let charged = registry
///     .execute(PAYMENT, || async { Ok::<_, String>("ch_123") })
///     .await;
/// assert!(charged.is_ok());
/// # }
/// ```
pub struct CircuitBreakerRegistry {
    breakers: BTreeMap<String, Arc<CircuitBreaker>>,
    clock: Arc<dyn Clock>,
    feed: Arc<Mutex<VecDeque<StateChangeEvent>>>,
    feed_limit: usize,
    listeners: Arc<Listeners>,
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.breakers.keys().collect::<Vec<_>>())
            .field("feed_limit", &self.feed_limit)
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerRegistry {
    /// Create an empty registry using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty registry whose breakers use the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: BTreeMap::new(),
            clock,
            feed: Arc::new(Mutex::new(VecDeque::new())),
            feed_limit: DEFAULT_FEED_LIMIT,
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Registry with the `payment`, `email` and `database` breakers at their
    /// default settings.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (name, config) in default_breakers() {
            registry.register(name, config);
        }
        registry
    }

    /// Set how many transitions the registry-wide feed keeps.
    #[must_use]
    pub fn with_feed_limit(mut self, limit: usize) -> Self {
        self.feed_limit = limit.max(1);
        self
    }

    /// Register a breaker.
    ///
    /// Registering a name twice keeps the first breaker and returns it.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let name = name.into();
        if let Some(existing) = self.breakers.get(&name) {
            tracing::warn!(breaker = %name, "Circuit breaker already registered, keeping existing");
            return Arc::clone(existing);
        }

        let breaker = Arc::new(CircuitBreaker::with_clock(
            name.clone(),
            config,
            Arc::clone(&self.clock),
        ));

        let feed = Arc::clone(&self.feed);
        let listeners = Arc::clone(&self.listeners);
        let feed_limit = self.feed_limit;
        // Lives as long as the breaker; never unsubscribed.
        let _forwarder = breaker.subscribe(Arc::new(move |event: &StateChangeEvent| {
            record_transition(&feed, feed_limit, event);
            listeners.notify(event);
        }));

        tracing::debug!(breaker = %name, "Circuit breaker registered");
        self.breakers.insert(name, Arc::clone(&breaker));
        breaker
    }

    /// Clock shared by every registered breaker.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Look up a breaker by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    /// Registered breaker names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.breakers.keys().map(String::as_str)
    }

    /// Iterate over the registered breakers, sorted by name.
    pub fn breakers(&self) -> impl Iterator<Item = &Arc<CircuitBreaker>> {
        self.breakers.values()
    }

    /// Run an operation through the named breaker.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Unknown` if no breaker has that name,
    /// `RegistryError::Open` if the circuit rejects the call, and
    /// `RegistryError::Operation` if the operation ran and failed.
    pub async fn execute<F, Fut, T, E>(&self, name: &str, operation: F) -> Result<T, RegistryError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.lookup(name)?;
        Ok(breaker.execute(operation).await?)
    }

    /// Snapshot of one breaker.
    #[must_use]
    pub fn stats(&self, name: &str) -> Option<CircuitBreakerStats> {
        self.breakers.get(name).map(|breaker| breaker.stats())
    }

    /// Snapshots of every breaker, keyed by name.
    #[must_use]
    pub fn all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    /// Force a breaker open.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownBreakerError`] if no breaker has that name.
    pub fn force_open(&self, name: &str, reason: &str) -> Result<(), UnknownBreakerError> {
        self.lookup(name)?.force_open(reason);
        Ok(())
    }

    /// Force a breaker closed.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownBreakerError`] if no breaker has that name.
    pub fn force_close(&self, name: &str, reason: &str) -> Result<(), UnknownBreakerError> {
        self.lookup(name)?.force_close(reason);
        Ok(())
    }

    /// Register a listener invoked after any breaker transitions.
    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateChangeEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(Arc::new(listener))
    }

    /// Most recent transitions across all breakers, newest first.
    #[must_use]
    pub fn state_change_history(&self, limit: usize) -> Vec<StateChangeEvent> {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    fn lookup(&self, name: &str) -> Result<&Arc<CircuitBreaker>, UnknownBreakerError> {
        self.breakers
            .get(name)
            .ok_or_else(|| UnknownBreakerError(name.to_string()))
    }
}

/// Append to the feed, keeping it sorted by timestamp.
///
/// Forwarders run after the breaker releases its lock, so two breakers
/// transitioning at once can deliver their events out of timestamp order.
fn record_transition(
    feed: &Mutex<VecDeque<StateChangeEvent>>,
    limit: usize,
    event: &StateChangeEvent,
) {
    let mut feed = feed.lock().unwrap_or_else(PoisonError::into_inner);
    let at = feed
        .iter()
        .rposition(|existing| existing.timestamp <= event.timestamp)
        .map_or(0, |i| i + 1);
    feed.insert(at, event.clone());
    while feed.len() > limit {
        feed.pop_front();
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Default settings for the three guarded dependencies.
#[must_use]
pub fn default_breakers() -> [(&'static str, CircuitBreakerConfig); 3] {
    [
        (
            PAYMENT,
            CircuitBreakerConfig::builder()
                .failure_threshold(5)
                .reset_timeout(Duration::from_secs(30))
                .build(),
        ),
        (
            EMAIL,
            CircuitBreakerConfig::builder()
                .failure_threshold(3)
                .reset_timeout(Duration::from_secs(60))
                .build(),
        ),
        (
            DATABASE,
            CircuitBreakerConfig::builder()
                .failure_threshold(5)
                .reset_timeout(Duration::from_secs(10))
                .critical(true)
                .build(),
        ),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use turnstile_core::CircuitState;
    use turnstile_testing::{FlakyOperation, ManualClock};

    fn registry(clock: &ManualClock) -> CircuitBreakerRegistry {
        let mut registry = CircuitBreakerRegistry::with_clock(Arc::new(clock.clone()));
        for (name, config) in default_breakers() {
            registry.register(name, config);
        }
        registry
    }

    #[test]
    fn test_default_breakers() {
        let registry = CircuitBreakerRegistry::with_defaults();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec![DATABASE, EMAIL, PAYMENT]);

        let email = registry.stats(EMAIL).unwrap();
        assert_eq!(email.failure_threshold, 3);
        assert_eq!(email.reset_timeout_ms, 60_000);
        assert!(registry.get(DATABASE).unwrap().config().critical);
    }

    #[tokio::test]
    async fn test_execute_unknown_breaker() {
        let registry = CircuitBreakerRegistry::new();
        let op = FlakyOperation::succeeding();

        let err = registry.execute("sms", || op.run()).await.unwrap_err();

        assert!(matches!(err, RegistryError::Unknown(UnknownBreakerError(ref name)) if name == "sms"));
        assert_eq!(op.calls(), 0);
    }

    #[tokio::test]
    async fn test_breakers_are_independent() {
        let clock = ManualClock::default();
        let registry = registry(&clock);
        let failing = FlakyOperation::failing();

        for _ in 0..3 {
            let _ = registry.execute(EMAIL, || failing.run()).await;
        }

        assert_eq!(registry.stats(EMAIL).unwrap().state, CircuitState::Open);
        assert_eq!(registry.stats(PAYMENT).unwrap().state, CircuitState::Closed);

        let op = FlakyOperation::succeeding();
        assert!(matches!(
            registry.execute(EMAIL, || op.run()).await,
            Err(RegistryError::Open(_))
        ));
        assert_eq!(registry.execute(PAYMENT, || op.run()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_feed_collects_all_breakers_newest_first() {
        let clock = ManualClock::default();
        let registry = registry(&clock);

        registry.force_open(PAYMENT, "gateway incident").unwrap();
        clock.advance(Duration::from_secs(1));
        registry.force_open(DATABASE, "failover").unwrap();
        clock.advance(Duration::from_secs(1));
        registry.force_close(PAYMENT, "resolved").unwrap();

        let feed = registry.state_change_history(10);
        let breakers: Vec<_> = feed.iter().map(|e| e.breaker.as_str()).collect();
        assert_eq!(breakers, vec![PAYMENT, DATABASE, PAYMENT]);
        assert!(feed.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(registry.state_change_history(1).len(), 1);
    }

    #[test]
    fn test_feed_is_bounded() {
        let mut registry = CircuitBreakerRegistry::new().with_feed_limit(2);
        registry.register(EMAIL, CircuitBreakerConfig::default());

        for i in 0..4 {
            registry.force_open(EMAIL, &format!("round {i}")).unwrap();
        }

        let feed = registry.state_change_history(10);
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].reason, "forced open: round 3");
    }

    #[test]
    fn test_late_transition_lands_in_timestamp_order() {
        let clock = ManualClock::default();
        let registry = registry(&clock);
        let start = clock.now();

        registry.force_open(PAYMENT, "gateway incident").unwrap();
        clock.advance(Duration::from_secs(2));
        registry.force_open(DATABASE, "failover").unwrap();

        // An email transition stamped between the two, delivered last.
        let mut late = registry.state_change_history(1)[0].clone();
        late.breaker = EMAIL.to_string();
        late.timestamp = start + chrono::Duration::seconds(1);
        record_transition(&registry.feed, registry.feed_limit, &late);

        let feed = registry.state_change_history(10);
        let breakers: Vec<_> = feed.iter().map(|e| e.breaker.as_str()).collect();
        assert_eq!(breakers, vec![DATABASE, EMAIL, PAYMENT]);
        assert!(feed.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[test]
    fn test_force_unknown_breaker() {
        let registry = CircuitBreakerRegistry::new();
        assert_eq!(
            registry.force_open("sms", "test"),
            Err(UnknownBreakerError("sms".to_string()))
        );
    }

    #[test]
    fn test_registry_listener_and_unsubscribe() {
        let registry = CircuitBreakerRegistry::with_defaults();
        let calls = Arc::new(AtomicUsize::new(0));

        let subscription = {
            let calls = Arc::clone(&calls);
            registry.on_state_change(move |event| {
                assert_eq!(event.breaker, EMAIL);
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        registry.force_open(EMAIL, "smtp outage").unwrap();
        assert!(subscription.unsubscribe());
        registry.force_close(EMAIL, "smtp back").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = CircuitBreakerRegistry::new();
        let first = registry.register(EMAIL, CircuitBreakerConfig::default());
        let second = registry.register(
            EMAIL,
            CircuitBreakerConfig::builder().failure_threshold(1).build(),
        );

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.stats(EMAIL).unwrap().failure_threshold, 5);
    }

    #[test]
    fn test_all_stats_compare_equal_without_changes() {
        let registry = CircuitBreakerRegistry::with_defaults();
        registry.force_open(PAYMENT, "test").unwrap();

        assert_eq!(registry.all_stats(), registry.all_stats());
        assert_eq!(registry.all_stats().len(), 3);
    }
}
