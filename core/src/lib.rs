//! # Turnstile Core
//!
//! Core traits and types shared by the Turnstile admission-control crates.
//!
//! Turnstile guards a ticket-sales service against its unreliable
//! dependencies and against abusive traffic:
//!
//! - **Circuit breakers** fail fast when the payment gateway, the email
//!   service or the database keeps failing, and probe for recovery.
//! - **Rate limiters** cap request rates per caller on sensitive endpoints.
//! - **A retry queue** buffers email sends rejected by an open circuit until
//!   the email service recovers.
//!
//! This crate holds the vocabulary those components share: the circuit
//! state, the classified admission errors, and the environment traits that
//! abstract time and outbound delivery so everything stays testable.
//!
//! ## Example
//!
//! ```
//! use turnstile_core::environment::{Clock, SystemClock};
//! use turnstile_core::CircuitState;
//!
//! let clock = SystemClock;
//! let _now = clock.now();
//! assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod circuit;
pub mod error;

pub use circuit::CircuitState;
pub use error::{CircuitOpenError, QueueFullError, RateLimitExceededError};

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// where they are needed, never reached through globals.
pub mod environment {
    use chrono::{DateTime, Utc};
    use std::future::Future;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - manually advanced time for deterministic tests
    /// let clock = ManualClock::new(start);
    /// clock.advance(Duration::from_secs(30));
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Current time as milliseconds since the Unix epoch
        fn now_millis(&self) -> i64 {
            self.now().timestamp_millis()
        }
    }

    /// Wall-clock time source used in production.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Outbound delivery of a side-effecting message (an email send, a webhook
    /// callback).
    ///
    /// The actual network client lives outside this workspace; Turnstile only
    /// wraps calls to it.
    ///
    /// # Example
    ///
    /// ```ignore
    /// struct SmtpSender { /* ... */ }
    ///
    /// impl MessageSender<Email> for SmtpSender {
    ///     type Error = SmtpError;
    ///
    ///     async fn send(&self, email: &Email) -> Result<(), SmtpError> {
    ///         self.transport.send(email).await
    ///     }
    /// }
    /// ```
    pub trait MessageSender<M>: Send + Sync {
        /// Error returned by the underlying client
        type Error: std::fmt::Display + Send + Sync + 'static;

        /// Deliver one message.
        ///
        /// # Errors
        ///
        /// Returns the client's error when delivery fails.
        fn send(&self, message: &M) -> impl Future<Output = Result<(), Self::Error>> + Send;
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn test_system_clock_millis_match_now() {
        let clock = SystemClock;
        let before = clock.now().timestamp_millis();
        let millis = clock.now_millis();
        assert!(millis >= before);
    }
}
