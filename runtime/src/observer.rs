//! Subscriber list for circuit state changes.
//!
//! Listeners run synchronously on the thread that performed the transition,
//! after the breaker lock has been released. A listener that panics is
//! logged and skipped; the remaining listeners still run and the breaker
//! state is untouched.

use crate::circuit_breaker::StateChangeEvent;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Callback invoked on every state transition.
pub type StateChangeListener = Arc<dyn Fn(&StateChangeEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, StateChangeListener)>>,
}

impl Listeners {
    pub(crate) fn subscribe(self: &Arc<Self>, listener: StateChangeListener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));

        Subscription {
            id,
            listeners: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn notify(&self, event: &StateChangeEvent) {
        // Snapshot so listeners may subscribe or unsubscribe while running.
        let snapshot: Vec<StateChangeListener> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                metrics::counter!("circuit_breaker.listener_panics", "breaker" => event.breaker.clone())
                    .increment(1);
                tracing::error!(
                    breaker = %event.breaker,
                    from = %event.previous_state,
                    to = %event.new_state,
                    "State change listener panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

/// Handle returned by `on_state_change`.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Remove the listener.
    ///
    /// Returns `false` if it was already removed or its owner is gone.
    #[allow(clippy::must_use_candidate)]
    pub fn unsubscribe(self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|listeners| listeners.remove(self.id))
    }
}
