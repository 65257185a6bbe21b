//! Keyed fixed-window rate limiting.
//!
//! Each [`RateLimiter`] counts requests per caller key inside fixed time
//! windows aligned to the epoch:
//!
//! ```text
//! window = 60s, max_requests = 3
//!
//! 12:00:00          12:01:00          12:02:00
//! |  1  2  3  4✗    |  1  2           |
//! ```
//!
//! The request that trips the limit is rejected and counted once; further
//! rejected requests in the same window leave the count at `max_requests + 1`.
//!
//! Buckets live in a sharded concurrent map, so two callers only contend when
//! their keys hash to the same shard. Buckets idle for several windows are
//! evicted by an opportunistic sweep.
//!
//! ## Usage
//!
//! ```
//! use turnstile_runtime::rate_limiter::{ProtectedSurface, RateLimiters};
//!
//! let limiters = RateLimiters::with_defaults();
//! let auth = limiters.get(ProtectedSurface::Authentication);
//!
//! for _ in 0..5 {
//!     assert!(auth.check("203.0.113.7").allowed);
//! }
//! let decision = auth.check("203.0.113.7");
//! assert!(!decision.allowed);
//! assert!(decision.retry_after.is_some());
//! ```

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use turnstile_core::environment::{Clock, SystemClock};
use turnstile_core::{DateTime, RateLimitExceededError, Utc};

const ONE_HOUR_MS: i64 = 60 * 60 * 1000;

/// Rate limiter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Length of one counting window
    pub window: Duration,
    /// Requests allowed per key and window
    pub max_requests: u32,
    /// Number of violations kept for inspection
    pub violation_history: usize,
    /// Buckets idle for this many windows are evicted
    pub idle_windows: u32,
}

impl RateLimiterConfig {
    /// Configuration allowing `max_requests` per `window`.
    #[must_use]
    pub const fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            violation_history: 1000,
            idle_windows: 3,
        }
    }

    /// Set how many violations are kept.
    #[must_use]
    pub const fn with_violation_history(mut self, limit: usize) -> Self {
        self.violation_history = limit;
        self
    }

    /// Set after how many idle windows a bucket is evicted.
    #[must_use]
    pub const fn with_idle_windows(mut self, windows: u32) -> Self {
        self.idle_windows = windows;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), 60)
    }
}

/// Request context recorded alongside a violation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Endpoint that was called, e.g. `POST /api/orders`
    pub endpoint: Option<String>,
    /// Client IP address
    pub ip: Option<String>,
}

impl RequestMeta {
    /// Empty request context
    #[must_use]
    pub const fn new() -> Self {
        Self {
            endpoint: None,
            ip: None,
        }
    }

    /// Set the endpoint
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the client IP
    #[must_use]
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests counted for the key in the current window
    pub count: u32,
    /// Requests allowed per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Time until the current window ends
    pub reset_after: Duration,
    /// Set when the request was rejected; equals `reset_after`
    pub retry_after: Option<Duration>,
}

/// A rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitViolation {
    /// Bucket key, prefixed with the limiter name
    pub key: String,
    /// Endpoint that was called, if known
    pub endpoint: Option<String>,
    /// Client IP, if known
    pub ip: Option<String>,
    /// Count that tripped the limit
    pub count: u32,
    /// Requests allowed per window
    pub max_requests: u32,
    /// When the request was rejected
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of a limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    /// Limiter name
    pub name: String,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests allowed per key and window
    pub max_requests: u32,
    /// Keys currently tracked
    pub total_keys: usize,
    /// Rejections since startup
    pub total_violations: u64,
    /// Rejections in the last hour still held in the violation log
    pub violations_last_hour: usize,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start_ms: i64,
    count: u32,
    last_seen_ms: i64,
}

/// Fixed-window rate limiter keyed by caller identity.
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    buckets: DashMap<String, Bucket>,
    violations: Mutex<VecDeque<RateLimitViolation>>,
    total_violations: AtomicU64,
    last_sweep_ms: AtomicI64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("keys", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a rate limiter using the system clock.
    #[must_use]
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a rate limiter with an injected clock.
    #[must_use]
    pub fn with_clock(
        name: impl Into<String>,
        config: RateLimiterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now_ms = clock.now_millis();
        Self {
            name: name.into(),
            config,
            clock,
            buckets: DashMap::new(),
            violations: Mutex::new(VecDeque::new()),
            total_violations: AtomicU64::new(0),
            last_sweep_ms: AtomicI64::new(now_ms),
        }
    }

    /// Get rate limiter name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get rate limiter configuration
    #[must_use]
    pub const fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Count a request for `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_with(key, &RequestMeta::default())
    }

    /// Like [`check`](Self::check), recording endpoint and IP on a violation.
    pub fn check_with(&self, key: &str, meta: &RequestMeta) -> RateLimitDecision {
        let now_ms = self.clock.now_millis();
        let window_ms = self.window_ms();
        let window_start_ms = now_ms - now_ms.rem_euclid(window_ms);
        let max = self.config.max_requests;
        let bucket_key = self.bucket_key(key);

        let count = {
            let mut bucket = self.buckets.entry(bucket_key.clone()).or_insert(Bucket {
                window_start_ms,
                count: 0,
                last_seen_ms: now_ms,
            });
            if bucket.window_start_ms != window_start_ms {
                bucket.window_start_ms = window_start_ms;
                bucket.count = 0;
            }
            if bucket.count <= max {
                bucket.count += 1;
            }
            bucket.last_seen_ms = now_ms;
            bucket.count
        };

        metrics::counter!("rate_limiter.checks", "limiter" => self.name.clone()).increment(1);
        self.maybe_sweep(now_ms);

        let reset_after = duration_from_millis(window_start_ms + window_ms - now_ms);
        if count > max {
            self.record_violation(bucket_key, meta, count);
            return RateLimitDecision {
                allowed: false,
                count,
                limit: max,
                remaining: 0,
                reset_after,
                retry_after: Some(reset_after),
            };
        }

        RateLimitDecision {
            allowed: true,
            count,
            limit: max,
            remaining: max - count,
            reset_after,
            retry_after: None,
        }
    }

    /// Check and turn a rejection into an error.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceededError`] when the key is over its limit.
    pub fn enforce(
        &self,
        key: &str,
        meta: &RequestMeta,
    ) -> Result<RateLimitDecision, RateLimitExceededError> {
        let decision = self.check_with(key, meta);
        match decision.retry_after {
            Some(retry_after) if !decision.allowed => Err(RateLimitExceededError {
                limiter: self.name.clone(),
                key: self.bucket_key(key),
                retry_after,
            }),
            _ => Ok(decision),
        }
    }

    /// Clear the bucket for `key`.
    ///
    /// Returns whether a bucket existed.
    #[allow(clippy::must_use_candidate)]
    pub fn reset(&self, key: &str) -> bool {
        let removed = self.buckets.remove(&self.bucket_key(key)).is_some();
        if removed {
            tracing::info!(limiter = %self.name, key, "Rate limit bucket reset");
        }
        removed
    }

    /// Evict buckets idle for `idle_windows` windows.
    ///
    /// Returns the number of evicted buckets.
    #[allow(clippy::must_use_candidate)]
    pub fn evict_idle(&self) -> usize {
        let now_ms = self.clock.now_millis();
        self.last_sweep_ms.store(now_ms, Ordering::Relaxed);
        self.sweep(now_ms)
    }

    /// Snapshot of the limiter.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let hour_ago_ms = self.clock.now_millis() - ONE_HOUR_MS;
        let violations_last_hour = self
            .violations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|v| v.timestamp.timestamp_millis() >= hour_ago_ms)
            .count();

        RateLimiterStats {
            name: self.name.clone(),
            window_ms: u64::try_from(self.config.window.as_millis()).unwrap_or(u64::MAX),
            max_requests: self.config.max_requests,
            total_keys: self.buckets.len(),
            total_violations: self.total_violations.load(Ordering::Relaxed),
            violations_last_hour,
        }
    }

    /// Most recent violations, newest first.
    #[must_use]
    pub fn violations(&self, limit: usize) -> Vec<RateLimitViolation> {
        self.violations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    fn bucket_key(&self, key: &str) -> String {
        format!("{}:{key}", self.name)
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.config.window.as_millis())
            .unwrap_or(i64::MAX)
            .max(1)
    }

    fn idle_ms(&self) -> i64 {
        self.window_ms()
            .saturating_mul(i64::from(self.config.idle_windows.max(1)))
    }

    fn record_violation(&self, key: String, meta: &RequestMeta, count: u32) {
        self.total_violations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rate_limiter.rejected", "limiter" => self.name.clone()).increment(1);
        tracing::warn!(
            limiter = %self.name,
            key = %key,
            endpoint = meta.endpoint.as_deref().unwrap_or("-"),
            ip = meta.ip.as_deref().unwrap_or("-"),
            count,
            max_requests = self.config.max_requests,
            "Rate limit exceeded"
        );

        if self.config.violation_history == 0 {
            return;
        }

        let violation = RateLimitViolation {
            key,
            endpoint: meta.endpoint.clone(),
            ip: meta.ip.clone(),
            count,
            max_requests: self.config.max_requests,
            timestamp: self.clock.now(),
        };

        let mut violations = self.violations.lock().unwrap_or_else(PoisonError::into_inner);
        while violations.len() >= self.config.violation_history {
            violations.pop_front();
        }
        violations.push_back(violation);
    }

    fn maybe_sweep(&self, now_ms: i64) {
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < self.idle_ms() {
            return;
        }
        // Only one caller wins the sweep for this interval.
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.sweep(now_ms);
        }
    }

    fn sweep(&self, now_ms: i64) -> usize {
        let idle_ms = self.idle_ms();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now_ms.saturating_sub(bucket.last_seen_ms) < idle_ms);
        let remaining = self.buckets.len();
        let evicted = before.saturating_sub(remaining);

        #[allow(clippy::cast_precision_loss)]
        let tracked = remaining as f64;
        metrics::gauge!("rate_limiter.buckets", "limiter" => self.name.clone()).set(tracked);
        if evicted > 0 {
            tracing::debug!(limiter = %self.name, evicted, "Evicted idle rate limit buckets");
        }
        evicted
    }
}

fn duration_from_millis(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

/// Endpoint classes with their own limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectedSurface {
    /// Order placement
    OrderCreation,
    /// Login attempts
    Authentication,
    /// Password reset requests
    PasswordReset,
    /// Verification email resends
    EmailVerification,
    /// Inbound payment webhooks
    Webhook,
    /// Ticket scans at the venue gate
    TicketScan,
}

impl ProtectedSurface {
    /// Every surface, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::OrderCreation,
        Self::Authentication,
        Self::PasswordReset,
        Self::EmailVerification,
        Self::Webhook,
        Self::TicketScan,
    ];

    /// Limiter name for the surface.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderCreation => "order_creation",
            Self::Authentication => "authentication",
            Self::PasswordReset => "password_reset",
            Self::EmailVerification => "email_verification",
            Self::Webhook => "webhook",
            Self::TicketScan => "ticket_scan",
        }
    }

    /// Default window and budget for the surface.
    #[must_use]
    pub const fn default_config(self) -> RateLimiterConfig {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        match self {
            Self::OrderCreation => RateLimiterConfig::new(Duration::from_secs(MINUTE), 10),
            Self::Authentication => RateLimiterConfig::new(Duration::from_secs(15 * MINUTE), 5),
            Self::PasswordReset => RateLimiterConfig::new(Duration::from_secs(HOUR), 3),
            Self::EmailVerification => RateLimiterConfig::new(Duration::from_secs(HOUR), 5),
            Self::Webhook => RateLimiterConfig::new(Duration::from_secs(MINUTE), 100),
            Self::TicketScan => RateLimiterConfig::new(Duration::from_secs(MINUTE), 300),
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ProtectedSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name does not match any protected surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown rate limit surface '{0}'")]
pub struct UnknownSurfaceError(pub String);

impl FromStr for ProtectedSurface {
    type Err = UnknownSurfaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|surface| surface.as_str() == s)
            .ok_or_else(|| UnknownSurfaceError(s.to_string()))
    }
}

/// One rate limiter per protected surface.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    limiters: [Arc<RateLimiter>; 6],
}

impl RateLimiters {
    /// Build the limiters, asking `config_for` for each surface's settings.
    #[must_use]
    pub fn new(
        clock: &Arc<dyn Clock>,
        config_for: impl Fn(ProtectedSurface) -> RateLimiterConfig,
    ) -> Self {
        Self {
            limiters: ProtectedSurface::ALL.map(|surface| {
                Arc::new(RateLimiter::with_clock(
                    surface.as_str(),
                    config_for(surface),
                    Arc::clone(clock),
                ))
            }),
        }
    }

    /// Limiters with the default settings and the system clock.
    #[must_use]
    pub fn with_defaults() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::new(&clock, ProtectedSurface::default_config)
    }

    /// Limiter for one surface.
    #[must_use]
    pub fn get(&self, surface: ProtectedSurface) -> &Arc<RateLimiter> {
        &self.limiters[surface.index()]
    }

    /// Snapshots of every limiter, in surface order.
    #[must_use]
    pub fn all_stats(&self) -> Vec<RateLimiterStats> {
        self.limiters.iter().map(|limiter| limiter.stats()).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use turnstile_testing::ManualClock;

    fn limiter(window_ms: u64, max: u32, clock: &ManualClock) -> RateLimiter {
        RateLimiter::with_clock(
            "test",
            RateLimiterConfig::new(Duration::from_millis(window_ms), max),
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn test_allows_up_to_max_then_rejects() {
        let clock = ManualClock::default();
        let limiter = limiter(1000, 5, &clock);

        for expected in 1..=5 {
            let decision = limiter.check("user-1");
            assert!(decision.allowed);
            assert_eq!(decision.count, expected);
            assert_eq!(decision.remaining, 5 - expected);
        }

        let rejected = limiter.check("user-1");
        assert!(!rejected.allowed);
        assert!(rejected.retry_after.unwrap() > Duration::ZERO);
        assert_eq!(rejected.remaining, 0);

        clock.advance(Duration::from_millis(1000));
        let next = limiter.check("user-1");
        assert!(next.allowed);
        assert_eq!(next.count, 1);
    }

    #[test]
    fn test_count_stops_at_max_plus_one() {
        let clock = ManualClock::default();
        let limiter = limiter(1000, 2, &clock);

        for _ in 0..10 {
            limiter.check("ip");
        }

        let violations = limiter.violations(100);
        assert_eq!(violations.len(), 8);
        assert!(violations.iter().all(|v| v.count == 3));
        assert_eq!(limiter.stats().total_violations, 8);
    }

    #[test]
    fn test_retry_after_is_time_to_window_end() {
        let clock = ManualClock::default();
        let limiter = limiter(1000, 1, &clock);

        clock.advance(Duration::from_millis(250));
        limiter.check("k");
        let decision = limiter.check("k");

        assert_eq!(decision.retry_after, Some(Duration::from_millis(750)));
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = ManualClock::default();
        let limiter = limiter(1000, 1, &clock);

        assert!(limiter.check("alice").allowed);
        assert!(!limiter.check("alice").allowed);
        assert!(limiter.check("bob").allowed);
        assert_eq!(limiter.stats().total_keys, 2);
    }

    #[test]
    fn test_violation_records_request_meta() {
        let clock = ManualClock::default();
        let limiter = limiter(60_000, 1, &clock);
        let meta = RequestMeta::new().endpoint("POST /api/orders").ip("198.51.100.4");

        limiter.check_with("user-9", &meta);
        limiter.check_with("user-9", &meta);

        let violation = &limiter.violations(1)[0];
        assert_eq!(violation.key, "test:user-9");
        assert_eq!(violation.endpoint.as_deref(), Some("POST /api/orders"));
        assert_eq!(violation.ip.as_deref(), Some("198.51.100.4"));
        assert_eq!(violation.max_requests, 1);
        assert_eq!(violation.timestamp, clock.now());
    }

    #[test]
    fn test_violations_newest_first_and_bounded() {
        let clock = ManualClock::default();
        let limiter = RateLimiter::with_clock(
            "test",
            RateLimiterConfig::new(Duration::from_secs(60), 0).with_violation_history(2),
            Arc::new(clock.clone()),
        );

        for key in ["a", "b", "c"] {
            limiter.check(key);
        }

        let keys: Vec<_> = limiter.violations(10).into_iter().map(|v| v.key).collect();
        assert_eq!(keys, vec!["test:c", "test:b"]);
    }

    #[test]
    fn test_violations_last_hour() {
        let clock = ManualClock::default();
        let limiter = limiter(1000, 0, &clock);

        limiter.check("old");
        clock.advance(Duration::from_secs(61 * 60));
        limiter.check("new");

        let stats = limiter.stats();
        assert_eq!(stats.total_violations, 2);
        assert_eq!(stats.violations_last_hour, 1);
    }

    #[test]
    fn test_enforce_maps_rejection() {
        let clock = ManualClock::default();
        let limiter = limiter(60_000, 1, &clock);

        assert!(limiter.enforce("k", &RequestMeta::new()).is_ok());
        let err = limiter.enforce("k", &RequestMeta::new()).unwrap_err();

        assert_eq!(err.limiter, "test");
        assert_eq!(err.key, "test:k");
        assert_eq!(err.retry_after, Duration::from_secs(60));
    }

    #[test]
    fn test_reset_unblocks_key() {
        let clock = ManualClock::default();
        let limiter = limiter(60_000, 1, &clock);

        limiter.check("k");
        assert!(!limiter.check("k").allowed);
        assert!(limiter.reset("k"));
        assert!(limiter.check("k").allowed);
        assert!(!limiter.reset("missing"));
    }

    #[test]
    fn test_idle_buckets_are_evicted() {
        let clock = ManualClock::default();
        let limiter = limiter(1000, 5, &clock);

        limiter.check("stale");
        clock.advance(Duration::from_millis(2500));
        limiter.check("fresh");
        assert_eq!(limiter.evict_idle(), 0);

        clock.advance(Duration::from_millis(1000));
        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.stats().total_keys, 1);
    }

    #[test]
    fn test_opportunistic_sweep_on_check() {
        let clock = ManualClock::default();
        let limiter = limiter(1000, 5, &clock);

        limiter.check("stale");
        clock.advance(Duration::from_secs(10));
        limiter.check("fresh");

        assert_eq!(limiter.stats().total_keys, 1);
    }

    #[test]
    fn test_stats_compare_equal_without_changes() {
        let clock = ManualClock::default();
        let limiter = limiter(1000, 1, &clock);
        limiter.check("a");
        limiter.check("a");

        assert_eq!(limiter.stats(), limiter.stats());
    }

    #[test]
    fn test_surface_defaults() {
        let limiters = RateLimiters::with_defaults();

        let auth = limiters.get(ProtectedSurface::Authentication).config();
        assert_eq!(auth.window, Duration::from_secs(900));
        assert_eq!(auth.max_requests, 5);
        assert_eq!(
            limiters.get(ProtectedSurface::TicketScan).config().max_requests,
            300
        );
        assert_eq!(limiters.get(ProtectedSurface::Webhook).name(), "webhook");

        let names: Vec<_> = limiters.all_stats().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "order_creation",
                "authentication",
                "password_reset",
                "email_verification",
                "webhook",
                "ticket_scan"
            ]
        );
    }

    #[test]
    fn test_surfaces_are_independent() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let limiters = RateLimiters::new(&clock, |_| {
            RateLimiterConfig::new(Duration::from_secs(60), 1)
        });

        assert!(limiters.get(ProtectedSurface::PasswordReset).check("ip").allowed);
        assert!(!limiters.get(ProtectedSurface::PasswordReset).check("ip").allowed);
        assert!(limiters.get(ProtectedSurface::OrderCreation).check("ip").allowed);
    }

    #[test]
    fn test_surface_from_str() {
        for surface in ProtectedSurface::ALL {
            assert_eq!(surface.as_str().parse::<ProtectedSurface>(), Ok(surface));
        }
        assert_eq!(
            "checkout".parse::<ProtectedSurface>(),
            Err(UnknownSurfaceError("checkout".to_string()))
        );
    }
}
