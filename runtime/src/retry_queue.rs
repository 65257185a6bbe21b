//! Bounded retry queue for sends rejected by an open circuit.
//!
//! When the email breaker is open, a send is parked here instead of failing
//! the user's request. The queue is drained when the breaker closes again and
//! on a periodic timer:
//!
//! ```text
//! send ──► breaker OPEN ──► enqueue ──► [m1][m2][m3]
//!                                          │
//!            breaker CLOSED / tick ──► process_queue ──► sender
//!                                          │
//!                 failed max_attempts ──► dead letters
//! ```
//!
//! One pass attempts each queued message at most once. A circuit rejection
//! during a pass puts the message back at the head without charging an
//! attempt and ends the pass.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::config::ConfigError;
use crate::dead_letter::{DeadLetter, DeadLetterQueue, DeadLetterReason, DeadLetterSummary};
use crate::observer::Subscription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use turnstile_core::environment::{Clock, MessageSender, SystemClock};
use turnstile_core::{CircuitState, QueueFullError};
use uuid::Uuid;

/// Shortest drain period a worker will tick at.
pub const MIN_DRAIN_INTERVAL: Duration = Duration::from_millis(1);

/// What to do when a message arrives at a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest message to the dead-letter log
    #[default]
    DropOldest,
    /// Refuse the new message with [`QueueFullError`]
    Reject,
}

/// Retry queue configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryQueueConfig {
    /// Maximum queued messages
    pub capacity: usize,
    /// Delivery attempts before a message is dead-lettered
    pub max_attempts: u32,
    /// Period of the background drain
    pub drain_interval: Duration,
    /// Behaviour at capacity
    pub overflow: OverflowPolicy,
    /// Entries kept in the dead-letter log
    pub dead_letter_limit: usize,
}

impl RetryQueueConfig {
    /// Check the values a queue cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` naming the first zero field among
    /// `capacity`, `max_attempts` and `drain_interval`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Validation("retry_queue.capacity must be > 0".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry_queue.max_attempts must be > 0".to_string(),
            ));
        }
        if self.drain_interval.is_zero() {
            return Err(ConfigError::Validation(
                "retry_queue.drain_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Raise zero values to the smallest usable ones.
    #[must_use]
    pub fn clamped(self) -> Self {
        let clamped = Self {
            capacity: self.capacity.max(1),
            max_attempts: self.max_attempts.max(1),
            drain_interval: self.drain_interval.max(MIN_DRAIN_INTERVAL),
            ..self
        };
        if clamped != self {
            tracing::warn!(
                requested = ?self,
                effective = ?clamped,
                "Retry queue config has zero values, clamping"
            );
        }
        clamped
    }
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            max_attempts: 5,
            drain_interval: Duration::from_secs(30),
            overflow: OverflowPolicy::DropOldest,
            dead_letter_limit: 500,
        }
    }
}

/// A parked message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage<M> {
    /// Queue-assigned id
    pub id: Uuid,
    /// The message to deliver
    pub payload: M,
    /// When the message was queued
    pub enqueued_at: DateTime<Utc>,
    /// Delivery attempts that reached the sender and failed
    pub attempts: u32,
    /// Attempts allowed before dead-lettering
    pub max_attempts: u32,
}

/// Snapshot of a retry queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryQueueStats {
    /// Queue name (the guarded breaker's name)
    pub name: String,
    /// Messages currently queued
    pub queued_count: usize,
    /// Maximum queued messages
    pub capacity: usize,
    /// Messages accepted since startup
    pub total_queued: u64,
    /// Messages delivered from the queue
    pub total_sent: u64,
    /// Messages dead-lettered after exhausting their attempts
    pub total_failed: u64,
    /// Messages evicted at capacity
    pub total_evicted: u64,
    /// Messages refused at capacity
    pub total_rejected: u64,
    /// Entries in the dead-letter log
    pub dead_letter_count: usize,
    /// Whether a drain pass is running
    pub is_processing: bool,
    /// Earliest enqueue time among queued messages
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages delivered
    pub sent: usize,
    /// Messages that failed and went back to the tail
    pub retried: usize,
    /// Messages that failed for the last time
    pub dead_lettered: usize,
    /// Whether the pass stopped because the circuit stopped admitting calls
    pub halted: bool,
    /// Messages left after the pass
    pub remaining: usize,
}

/// How [`RetryQueue::send_or_enqueue`] disposed of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered immediately
    Sent,
    /// Circuit was open; parked under this id
    Queued(Uuid),
}

/// Errors from [`RetryQueue::send_or_enqueue`].
#[derive(Error, Debug)]
pub enum GuardedSendError<E> {
    /// Circuit was open and the queue refused the message
    #[error(transparent)]
    QueueFull(#[from] QueueFullError),
    /// Circuit admitted the send and delivery failed
    #[error("Delivery failed: {0}")]
    Delivery(E),
}

/// Read-only view of a retry queue, independent of its message type.
pub trait QueueMonitor: Send + Sync {
    /// Snapshot of the queue
    fn stats(&self) -> RetryQueueStats;

    /// Most recent dead letters without payloads, newest first
    fn dead_letter_summaries(&self, limit: usize) -> Vec<DeadLetterSummary>;
}

/// Bounded FIFO of messages waiting for their circuit to close.
pub struct RetryQueue<M, S> {
    config: RetryQueueConfig,
    sender: S,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    queue: Mutex<VecDeque<QueuedMessage<M>>>,
    dead_letters: DeadLetterQueue<M>,
    processing: AtomicBool,
    wake: Arc<Notify>,
    total_queued: AtomicU64,
    total_sent: AtomicU64,
    total_failed: AtomicU64,
    total_evicted: AtomicU64,
    total_rejected: AtomicU64,
}

impl<M, S> std::fmt::Debug for RetryQueue<M, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryQueue")
            .field("breaker", &self.breaker.name())
            .field("config", &self.config)
            .field("queued", &self.len())
            .finish_non_exhaustive()
    }
}

impl<M, S> RetryQueue<M, S> {
    /// Create a queue delivering through `sender`, guarded by `breaker`.
    #[must_use]
    pub fn new(config: RetryQueueConfig, sender: S, breaker: Arc<CircuitBreaker>) -> Self {
        Self::with_clock(config, sender, breaker, Arc::new(SystemClock))
    }

    /// Create a queue with an injected clock.
    ///
    /// Zero `capacity`, `max_attempts` or `drain_interval` values are raised
    /// to their minimum; see [`RetryQueueConfig::clamped`].
    #[must_use]
    pub fn with_clock(
        config: RetryQueueConfig,
        sender: S,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = config.clamped();
        Self {
            dead_letters: DeadLetterQueue::new(config.dead_letter_limit),
            config,
            sender,
            breaker,
            clock,
            queue: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
            total_queued: AtomicU64::new(0),
            total_sent: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Queue name (the guarded breaker's name)
    #[must_use]
    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    /// Queue configuration
    #[must_use]
    pub const fn config(&self) -> &RetryQueueConfig {
        &self.config
    }

    /// Number of queued messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Park a message until its circuit recovers.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFullError`] if the queue is full and the overflow policy
    /// is [`OverflowPolicy::Reject`].
    pub fn enqueue(&self, payload: M) -> Result<Uuid, QueueFullError> {
        let now = self.clock.now();
        let message = QueuedMessage {
            id: Uuid::new_v4(),
            payload,
            enqueued_at: now,
            attempts: 0,
            max_attempts: self.config.max_attempts,
        };
        let id = message.id;

        let evicted = {
            let mut queue = self.lock();
            let evicted = if queue.len() >= self.config.capacity {
                match self.config.overflow {
                    OverflowPolicy::Reject => {
                        drop(queue);
                        self.total_rejected.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("retry_queue.rejected", "queue" => self.name().to_string())
                            .increment(1);
                        tracing::warn!(
                            queue = %self.name(),
                            capacity = self.config.capacity,
                            "Retry queue full, rejecting message"
                        );
                        return Err(QueueFullError {
                            capacity: self.config.capacity,
                        });
                    }
                    OverflowPolicy::DropOldest => queue.pop_front(),
                }
            } else {
                None
            };
            queue.push_back(message);
            self.record_size(queue.len());
            evicted
        };

        self.total_queued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("retry_queue.enqueued", "queue" => self.name().to_string()).increment(1);
        tracing::info!(queue = %self.name(), message_id = %id, "Message queued for retry");

        if let Some(oldest) = evicted {
            self.total_evicted.fetch_add(1, Ordering::Relaxed);
            self.dead_letter(oldest, DeadLetterReason::Evicted);
        }

        Ok(id)
    }

    /// Snapshot of the queue.
    #[must_use]
    pub fn stats(&self) -> RetryQueueStats {
        let (queued_count, oldest_enqueued_at) = {
            let queue = self.lock();
            let oldest = queue.iter().map(|m| m.enqueued_at).min();
            (queue.len(), oldest)
        };

        RetryQueueStats {
            name: self.name().to_string(),
            queued_count,
            capacity: self.config.capacity,
            total_queued: self.total_queued.load(Ordering::Relaxed),
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            dead_letter_count: self.dead_letters.len(),
            is_processing: self.processing.load(Ordering::Acquire),
            oldest_enqueued_at,
        }
    }

    /// Most recent dead letters, newest first.
    #[must_use]
    pub fn dead_letters(&self, limit: usize) -> Vec<DeadLetter<M>>
    where
        M: Clone,
    {
        self.dead_letters.recent(limit)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedMessage<M>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_front(&self) -> Option<QueuedMessage<M>> {
        let mut queue = self.lock();
        let message = queue.pop_front();
        self.record_size(queue.len());
        message
    }

    fn requeue(&self, message: QueuedMessage<M>, at_head: bool) {
        let mut queue = self.lock();
        if at_head {
            queue.push_front(message);
        } else {
            queue.push_back(message);
        }
        self.record_size(queue.len());
    }

    fn dead_letter(&self, message: QueuedMessage<M>, reason: DeadLetterReason) {
        self.dead_letters.push(DeadLetter {
            id: message.id,
            payload: message.payload,
            attempts: message.attempts,
            reason,
            enqueued_at: message.enqueued_at,
            dead_lettered_at: self.clock.now(),
        });
    }

    fn record_size(&self, len: usize) {
        #[allow(clippy::cast_precision_loss)]
        let size = len as f64;
        metrics::gauge!("retry_queue.size", "queue" => self.name().to_string()).set(size);
    }
}

impl<M, S> RetryQueue<M, S>
where
    M: Send + Sync,
    S: MessageSender<M>,
{
    /// Send through the breaker, parking the message if the circuit is open.
    ///
    /// # Errors
    ///
    /// Returns `GuardedSendError::Delivery` if the circuit admitted the send
    /// and it failed; the message is not queued in that case.
    /// Returns `GuardedSendError::QueueFull` if the circuit was open and the
    /// queue refused the message.
    pub async fn send_or_enqueue(&self, payload: M) -> Result<SendOutcome, GuardedSendError<S::Error>> {
        match self.breaker.execute(|| self.sender.send(&payload)).await {
            Ok(()) => Ok(SendOutcome::Sent),
            Err(CircuitBreakerError::Open(rejection)) => {
                tracing::debug!(queue = %self.name(), state = %rejection.state, "Circuit open, parking message");
                Ok(SendOutcome::Queued(self.enqueue(payload)?))
            }
            Err(CircuitBreakerError::Operation(err)) => Err(GuardedSendError::Delivery(err)),
        }
    }

    /// Run one drain pass.
    ///
    /// Returns `None` if another pass is already running.
    pub async fn process_queue(&self) -> Option<DrainReport> {
        let Some(_pass) = ProcessingGuard::acquire(&self.processing) else {
            tracing::debug!(queue = %self.name(), "Drain already in progress, skipping");
            return None;
        };

        let mut report = DrainReport::default();
        let budget = self.len();

        for _ in 0..budget {
            if !self.breaker.would_admit() {
                report.halted = true;
                break;
            }
            let Some(mut message) = self.pop_front() else {
                break;
            };

            match self.breaker.execute(|| self.sender.send(&message.payload)).await {
                Ok(()) => {
                    report.sent += 1;
                    self.total_sent.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("retry_queue.sent", "queue" => self.name().to_string())
                        .increment(1);
                    tracing::debug!(queue = %self.name(), message_id = %message.id, "Queued message delivered");
                }
                Err(CircuitBreakerError::Operation(err)) => {
                    message.attempts += 1;
                    if message.attempts >= message.max_attempts {
                        report.dead_lettered += 1;
                        self.total_failed.fetch_add(1, Ordering::Relaxed);
                        let last_error = err.to_string();
                        self.dead_letter(message, DeadLetterReason::AttemptsExhausted { last_error });
                    } else {
                        report.retried += 1;
                        tracing::debug!(
                            queue = %self.name(),
                            message_id = %message.id,
                            attempts = message.attempts,
                            error = %err,
                            "Queued message failed, will retry"
                        );
                        self.requeue(message, false);
                    }
                }
                Err(CircuitBreakerError::Open(_)) => {
                    self.requeue(message, true);
                    report.halted = true;
                    break;
                }
            }
        }

        report.remaining = self.len();
        if report.sent + report.retried + report.dead_lettered > 0 {
            tracing::info!(
                queue = %self.name(),
                sent = report.sent,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                remaining = report.remaining,
                halted = report.halted,
                "Retry queue drain pass complete"
            );
        }
        Some(report)
    }
}

impl<M, S> RetryQueue<M, S>
where
    M: Send + Sync + 'static,
    S: MessageSender<M> + 'static,
{
    /// Start the background drain worker.
    ///
    /// The worker drains on every `drain_interval` tick and whenever the
    /// guarded breaker transitions to CLOSED. Must be called inside a tokio
    /// runtime.
    #[must_use = "call shutdown() on the worker to stop it gracefully"]
    pub fn spawn(self: &Arc<Self>) -> RetryQueueWorker {
        let wake = Arc::clone(&self.wake);
        let subscription = self.breaker.on_state_change(move |event| {
            if event.new_state == CircuitState::Closed {
                wake.notify_one();
            }
        });

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let queue = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.config.drain_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            tracing::info!(queue = %queue.name(), "Retry queue worker started");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    () = queue.wake.notified() => {
                        tracing::debug!(queue = %queue.name(), "Circuit closed, draining");
                    }
                    _ = ticker.tick() => {}
                }

                if !queue.is_empty() {
                    queue.process_queue().await;
                }
            }

            tracing::info!(queue = %queue.name(), remaining = queue.len(), "Retry queue worker stopped");
        });

        RetryQueueWorker {
            handle,
            shutdown_tx,
            subscription,
        }
    }
}

impl<M, S> QueueMonitor for RetryQueue<M, S>
where
    M: Send + Sync,
    S: Send + Sync,
{
    fn stats(&self) -> RetryQueueStats {
        Self::stats(self)
    }

    fn dead_letter_summaries(&self, limit: usize) -> Vec<DeadLetterSummary> {
        self.dead_letters.summaries(limit)
    }
}

/// Handle to a running drain worker.
#[derive(Debug)]
pub struct RetryQueueWorker {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    subscription: Subscription,
}

impl RetryQueueWorker {
    /// Stop the worker after its current pass and wait for it to exit.
    ///
    /// Messages still queued stay in the queue.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.handle.await {
            tracing::error!(error = %err, "Retry queue worker terminated abnormally");
        }
        self.subscription.unsubscribe();
    }
}

/// Marks a drain pass as running; clears the flag on drop.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use turnstile_testing::{ManualClock, RecordingSender};

    fn setup(
        config: RetryQueueConfig,
        failure_threshold: u32,
    ) -> (
        Arc<RetryQueue<String, RecordingSender<String>>>,
        RecordingSender<String>,
        Arc<CircuitBreaker>,
        ManualClock,
    ) {
        let clock = ManualClock::default();
        let breaker = Arc::new(CircuitBreaker::with_clock(
            "email",
            CircuitBreakerConfig::builder()
                .failure_threshold(failure_threshold)
                .reset_timeout(Duration::from_secs(60))
                .build(),
            Arc::new(clock.clone()),
        ));
        let sender = RecordingSender::new();
        let queue = Arc::new(RetryQueue::with_clock(
            config,
            sender.clone(),
            Arc::clone(&breaker),
            Arc::new(clock.clone()),
        ));
        (queue, sender, breaker, clock)
    }

    #[tokio::test]
    async fn test_drains_after_circuit_closes() {
        let (queue, sender, breaker, _) = setup(RetryQueueConfig::default(), 3);
        breaker.force_open("smtp outage");

        for i in 0..3 {
            queue.enqueue(format!("mail-{i}")).unwrap();
        }
        assert_eq!(queue.process_queue().await.unwrap().sent, 0);

        breaker.force_close("smtp back");
        let report = queue.process_queue().await.unwrap();

        assert_eq!(report.sent, 3);
        let stats = queue.stats();
        assert_eq!(stats.total_sent, 3);
        assert_eq!(stats.queued_count, 0);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(sender.delivered(), vec!["mail-0", "mail-1", "mail-2"]);
    }

    #[tokio::test]
    async fn test_message_dead_lettered_after_max_attempts() {
        let config = RetryQueueConfig {
            max_attempts: 3,
            ..RetryQueueConfig::default()
        };
        let (queue, sender, _, _) = setup(config, 100);
        sender.set_failing(true);
        queue.enqueue("welcome".to_string()).unwrap();

        for _ in 0..2 {
            let report = queue.process_queue().await.unwrap();
            assert_eq!(report.retried, 1);
        }
        let report = queue.process_queue().await.unwrap();
        assert_eq!(report.dead_lettered, 1);

        let stats = queue.stats();
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.queued_count, 0);
        assert_eq!(sender.attempts(), 3);

        assert_eq!(queue.process_queue().await.unwrap(), DrainReport::default());
        assert_eq!(queue.stats().total_failed, 1);

        let dead = queue.dead_letters(10);
        assert_eq!(dead[0].payload, "welcome");
        assert_eq!(dead[0].attempts, 3);
        assert!(matches!(dead[0].reason, DeadLetterReason::AttemptsExhausted { .. }));
    }

    #[tokio::test]
    async fn test_one_attempt_per_message_per_pass() {
        let (queue, sender, _, _) = setup(RetryQueueConfig::default(), 100);
        sender.set_failing(true);
        queue.enqueue("a".to_string()).unwrap();
        queue.enqueue("b".to_string()).unwrap();

        let report = queue.process_queue().await.unwrap();

        assert_eq!(report.retried, 2);
        assert_eq!(sender.attempts(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_circuit_opening_mid_pass_halts_without_charging() {
        let (queue, sender, breaker, _) = setup(RetryQueueConfig::default(), 1);
        sender.fail_next(1);
        for name in ["a", "b", "c"] {
            queue.enqueue(name.to_string()).unwrap();
        }

        let report = queue.process_queue().await.unwrap();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(report.retried, 1);
        assert!(report.halted);
        assert_eq!(report.remaining, 3);
        assert_eq!(sender.attempts(), 1);

        let queued = queue.lock().iter().map(|m| (m.payload.clone(), m.attempts)).collect::<Vec<_>>();
        assert_eq!(
            queued,
            vec![("b".to_string(), 0), ("c".to_string(), 0), ("a".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_drop_oldest_at_capacity() {
        let config = RetryQueueConfig {
            capacity: 2,
            ..RetryQueueConfig::default()
        };
        let (queue, _, _, _) = setup(config, 3);

        queue.enqueue("a".to_string()).unwrap();
        queue.enqueue("b".to_string()).unwrap();
        queue.enqueue("c".to_string()).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.queued_count, 2);
        assert_eq!(stats.total_evicted, 1);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(stats.dead_letter_count, 1);
        assert_eq!(queue.dead_letters(1)[0].reason, DeadLetterReason::Evicted);
        assert_eq!(queue.dead_letters(1)[0].payload, "a");
    }

    #[tokio::test]
    async fn test_reject_at_capacity() {
        let config = RetryQueueConfig {
            capacity: 1,
            overflow: OverflowPolicy::Reject,
            ..RetryQueueConfig::default()
        };
        let (queue, _, _, _) = setup(config, 3);

        queue.enqueue("a".to_string()).unwrap();
        let err = queue.enqueue("b".to_string()).unwrap_err();

        assert_eq!(err, QueueFullError { capacity: 1 });
        assert_eq!(queue.stats().total_rejected, 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_send_or_enqueue() {
        let (queue, sender, breaker, _) = setup(RetryQueueConfig::default(), 3);

        assert_eq!(
            queue.send_or_enqueue("now".to_string()).await.unwrap(),
            SendOutcome::Sent
        );

        sender.fail_next(1);
        let err = queue.send_or_enqueue("fails".to_string()).await.unwrap_err();
        assert!(matches!(err, GuardedSendError::Delivery(_)));
        assert!(queue.is_empty());

        breaker.force_open("outage");
        let outcome = queue.send_or_enqueue("later".to_string()).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Queued(_)));
        assert_eq!(queue.len(), 1);
        assert_eq!(sender.delivered(), vec!["now"]);
    }

    #[tokio::test]
    async fn test_stats_report_oldest_and_compare_equal() {
        let (queue, _, _, clock) = setup(RetryQueueConfig::default(), 3);
        let first_at = clock.now();
        queue.enqueue("a".to_string()).unwrap();
        clock.advance(Duration::from_secs(5));
        queue.enqueue("b".to_string()).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.oldest_enqueued_at, Some(first_at));
        assert_eq!(stats, queue.stats());
        assert!(!stats.is_processing);
    }

    #[tokio::test]
    async fn test_oldest_survives_requeue_at_tail() {
        let (queue, sender, _, clock) = setup(RetryQueueConfig::default(), 1);
        let first_at = clock.now();
        queue.enqueue("a".to_string()).unwrap();
        clock.advance(Duration::from_secs(60));
        queue.enqueue("b".to_string()).unwrap();

        sender.fail_next(1);
        let report = queue.process_queue().await.unwrap();
        assert_eq!(report.retried, 1);
        assert!(report.halted);

        let order: Vec<_> = queue.lock().iter().map(|m| m.payload.clone()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(queue.stats().oldest_enqueued_at, Some(first_at));
    }

    #[test]
    fn test_zero_max_attempts_is_clamped() {
        let config = RetryQueueConfig {
            max_attempts: 0,
            ..RetryQueueConfig::default()
        };
        assert!(config.validate().is_err());

        let (queue, _, _, _) = setup(config, 3);
        assert_eq!(queue.config().max_attempts, 1);
        queue.enqueue("a".to_string()).unwrap();
        assert_eq!(queue.lock()[0].max_attempts, 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_never_exceeds_one() {
        let config = RetryQueueConfig {
            capacity: 0,
            ..RetryQueueConfig::default()
        };
        assert!(config.validate().is_err());

        let (queue, _, _, _) = setup(config, 3);
        for name in ["a", "b", "c"] {
            queue.enqueue(name.to_string()).unwrap();
        }

        let stats = queue.stats();
        assert_eq!(stats.capacity, 1);
        assert_eq!(stats.queued_count, 1);
        assert_eq!(stats.total_evicted, 2);
    }

    #[tokio::test]
    async fn test_zero_drain_interval_worker_runs() {
        let config = RetryQueueConfig {
            drain_interval: Duration::ZERO,
            ..RetryQueueConfig::default()
        };
        assert!(config.validate().is_err());

        let (queue, sender, _, _) = setup(config, 3);
        assert_eq!(queue.config().drain_interval, MIN_DRAIN_INTERVAL);
        queue.enqueue("tick".to_string()).unwrap();

        let worker = queue.spawn();
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.stats().total_sent < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker should drain on its interval");
        worker.shutdown().await;

        assert_eq!(sender.delivered(), vec!["tick"]);
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_skipped() {
        let (queue, _, _, _) = setup(RetryQueueConfig::default(), 3);
        let _running = ProcessingGuard::acquire(&queue.processing).unwrap();

        assert!(queue.stats().is_processing);
        assert_eq!(queue.process_queue().await, None);
    }

    #[tokio::test]
    async fn test_worker_drains_when_circuit_closes() {
        let config = RetryQueueConfig {
            drain_interval: Duration::from_secs(3600),
            ..RetryQueueConfig::default()
        };
        let (queue, sender, breaker, _) = setup(config, 3);
        breaker.force_open("outage");
        queue.enqueue("queued".to_string()).unwrap();

        let worker = queue.spawn();
        breaker.force_close("recovered");

        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.stats().total_sent < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker should drain after the circuit closes");

        worker.shutdown().await;
        assert_eq!(sender.delivered(), vec!["queued"]);
    }
}
