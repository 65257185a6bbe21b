//! Test doubles for the external dependencies Turnstile guards.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use turnstile_core::environment::MessageSender;

/// Error produced by the doubles in this module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("mock dependency failure: {0}")]
pub struct MockDeliveryError(pub String);

/// `MessageSender` that records every delivered message.
///
/// Failures can be scripted: `fail_next(n)` makes the next `n` sends fail,
/// `set_failing(true)` makes every send fail until switched back.
///
/// # Example
///
/// ```
/// use turnstile_testing::RecordingSender;
///
/// let sender = RecordingSender::<String>::new();
/// sender.fail_next(2);
/// assert_eq!(sender.delivered().len(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct RecordingSender<M> {
    delivered: Arc<Mutex<Vec<M>>>,
    attempts: Arc<AtomicUsize>,
    scripted_failures: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl<M> RecordingSender<M> {
    /// Create a sender that succeeds until told otherwise
    #[must_use]
    pub fn new() -> Self {
        Self {
            delivered: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
            scripted_failures: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make the next `count` sends fail
    pub fn fail_next(&self, count: usize) {
        self.scripted_failures.store(count, Ordering::SeqCst);
    }

    /// Fail every send while `failing` is true
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of send attempts, successful or not
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Messages delivered so far, in delivery order
    #[must_use]
    pub fn delivered(&self) -> Vec<M>
    where
        M: Clone,
    {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn should_fail(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.scripted_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<M> Default for RecordingSender<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MessageSender<M> for RecordingSender<M>
where
    M: Clone + Send + Sync,
{
    type Error = MockDeliveryError;

    async fn send(&self, message: &M) -> Result<(), MockDeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.should_fail() {
            return Err(MockDeliveryError("delivery refused".to_string()));
        }

        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

/// Async operation that counts how often it actually ran.
///
/// Used to prove that an open circuit never reaches the dependency.
///
/// # Example
///
/// ```
/// use turnstile_testing::FlakyOperation;
///
/// # tokio_test::block_on(async {
/// let op = FlakyOperation::failing();
/// assert!(op.run().await.is_err());
/// op.set_failing(false);
/// assert_eq!(op.run().await, Ok(2));
/// assert_eq!(op.calls(), 2);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct FlakyOperation {
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl FlakyOperation {
    /// Operation that succeeds
    #[must_use]
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Operation that fails
    #[must_use]
    pub fn failing() -> Self {
        let op = Self::default();
        op.set_failing(true);
        op
    }

    /// Switch between failing and succeeding
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of times the operation body ran
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Run the operation once.
    ///
    /// Returns the call number on success.
    ///
    /// # Errors
    ///
    /// Returns [`MockDeliveryError`] while the operation is set to fail.
    pub async fn run(&self) -> Result<usize, MockDeliveryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            Err(MockDeliveryError(format!("call {call} failed")))
        } else {
            Ok(call)
        }
    }
}
