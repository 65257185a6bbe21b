//! Bounded log of messages the retry queue gave up on.
//!
//! Entries are kept for inspection only; nothing redrives them. When the log
//! is full the oldest entry is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Why a message was dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Delivery failed `max_attempts` times
    AttemptsExhausted {
        /// Error from the final attempt
        last_error: String,
    },
    /// Evicted to make room at capacity
    Evicted,
}

impl DeadLetterReason {
    /// Stable label for metrics and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AttemptsExhausted { .. } => "attempts_exhausted",
            Self::Evicted => "evicted",
        }
    }
}

/// Dead letter entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter<M> {
    /// Id the message had in the retry queue
    pub id: Uuid,
    /// The undelivered message
    pub payload: M,
    /// Delivery attempts made
    pub attempts: u32,
    /// Why the message was given up on
    pub reason: DeadLetterReason,
    /// When the message was first queued
    pub enqueued_at: DateTime<Utc>,
    /// When the message was dead-lettered
    pub dead_lettered_at: DateTime<Utc>,
}

/// Dead letter entry without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterSummary {
    /// Id the message had in the retry queue
    pub id: Uuid,
    /// Delivery attempts made
    pub attempts: u32,
    /// Why the message was given up on
    pub reason: DeadLetterReason,
    /// When the message was first queued
    pub enqueued_at: DateTime<Utc>,
    /// When the message was dead-lettered
    pub dead_lettered_at: DateTime<Utc>,
}

impl<M> From<&DeadLetter<M>> for DeadLetterSummary {
    fn from(entry: &DeadLetter<M>) -> Self {
        Self {
            id: entry.id,
            attempts: entry.attempts,
            reason: entry.reason.clone(),
            enqueued_at: entry.enqueued_at,
            dead_lettered_at: entry.dead_lettered_at,
        }
    }
}

/// Dead letter log
#[derive(Debug)]
pub struct DeadLetterQueue<M> {
    entries: Mutex<VecDeque<DeadLetter<M>>>,
    max_size: usize,
}

impl<M> DeadLetterQueue<M> {
    /// Create an empty log holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    /// Record an entry, dropping the oldest one if the log is full.
    pub fn push(&self, entry: DeadLetter<M>) {
        metrics::counter!("retry_queue.dead_lettered", "reason" => entry.reason.as_str())
            .increment(1);
        tracing::warn!(
            message_id = %entry.id,
            attempts = entry.attempts,
            reason = entry.reason.as_str(),
            "Message dead-lettered"
        );

        if self.max_size == 0 {
            return;
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.max_size {
            entries.pop_front();
            tracing::debug!(max_size = self.max_size, "Dead letter log full, dropping oldest entry");
        }
        entries.push_back(entry);
    }

    /// Number of entries held
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent entries, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<DeadLetter<M>>
    where
        M: Clone,
    {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent entries without payloads, newest first.
    #[must_use]
    pub fn summaries(&self, limit: usize) -> Vec<DeadLetterSummary> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(limit)
            .map(DeadLetterSummary::from)
            .collect()
    }
}
