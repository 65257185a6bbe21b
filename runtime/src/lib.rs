//! # Turnstile Runtime
//!
//! In-process admission control for the ticket-sales service.
//!
//! - [`circuit_breaker`]: per-dependency breaker with a single half-open probe
//! - [`registry`]: the `payment`, `email` and `database` breakers, with an
//!   aggregate transition feed
//! - [`rate_limiter`]: keyed fixed-window limiters, one per protected surface
//! - [`retry_queue`]: bounded queue parking email sends while their circuit is
//!   open, drained by a background worker once it closes
//! - [`health`], [`metrics`], [`config`]: the ambient pieces wiring the above
//!   into a service
//!
//! All state is process-local and in memory. Nothing here coordinates across
//! replicas, and everything resets on restart.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use turnstile_runtime::registry::{CircuitBreakerRegistry, RegistryError, PAYMENT};
//!
//! # async fn charge() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(CircuitBreakerRegistry::with_defaults());
//!
//! match registry.execute(PAYMENT, || async { Ok::<_, std::io::Error>(()) }).await {
//!     Ok(()) => {}
//!     Err(RegistryError::Open(open)) => println!("payment unavailable: {open}"),
//!     Err(err) => return Err(err.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod dead_letter;
pub mod health;
pub mod metrics;
mod observer;
pub mod rate_limiter;
pub mod registry;
pub mod retry_queue;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats,
    StateChangeEvent,
};
pub use config::{AdmissionConfig, ConfigError};
pub use dead_letter::{DeadLetter, DeadLetterQueue, DeadLetterReason, DeadLetterSummary};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use observer::{StateChangeListener, Subscription};
pub use rate_limiter::{
    ProtectedSurface, RateLimitDecision, RateLimitViolation, RateLimiter, RateLimiterConfig,
    RateLimiterStats, RateLimiters, RequestMeta,
};
pub use registry::{CircuitBreakerRegistry, RegistryError, UnknownBreakerError};
pub use retry_queue::{
    DrainReport, GuardedSendError, OverflowPolicy, QueueMonitor, QueuedMessage, RetryQueue,
    RetryQueueConfig, RetryQueueStats, RetryQueueWorker, SendOutcome,
};
pub use turnstile_core::{CircuitOpenError, CircuitState, QueueFullError, RateLimitExceededError};
