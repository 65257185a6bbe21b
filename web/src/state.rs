//! Shared state for the admin, health and metrics routes.

use std::sync::Arc;
use turnstile_runtime::metrics::MetricsServer;
use turnstile_runtime::{CircuitBreakerRegistry, QueueMonitor, RateLimiters};

/// Admission-control components shared across all HTTP handlers.
///
/// Cheap to clone: every component sits behind an `Arc` and is shared with
/// the application code that performs the guarded calls.
///
/// # Examples
///
/// ```ignore
/// let registry = Arc::new(CircuitBreakerRegistry::with_defaults());
/// let limiters = Arc::new(RateLimiters::with_defaults());
///
/// let state = AdmissionState::new(registry, limiters)
///     .with_retry_queue(email_queue)
///     .with_metrics(Arc::new(metrics_server));
/// let app = turnstile_web::router(state);
/// ```
#[derive(Clone)]
pub struct AdmissionState {
    /// Circuit breakers
    pub registry: Arc<CircuitBreakerRegistry>,
    /// One limiter per protected surface
    pub rate_limiters: Arc<RateLimiters>,
    /// Email retry queue, if one is running
    pub retry_queue: Option<Arc<dyn QueueMonitor>>,
    /// Prometheus recorder, if metrics are enabled
    pub metrics: Option<Arc<MetricsServer>>,
}

impl AdmissionState {
    /// Create state without a retry queue or metrics.
    #[must_use]
    pub fn new(registry: Arc<CircuitBreakerRegistry>, rate_limiters: Arc<RateLimiters>) -> Self {
        Self {
            registry,
            rate_limiters,
            retry_queue: None,
            metrics: None,
        }
    }

    /// Expose a retry queue on the admin and health routes.
    #[must_use]
    pub fn with_retry_queue(mut self, queue: Arc<dyn QueueMonitor>) -> Self {
        self.retry_queue = Some(queue);
        self
    }

    /// Serve `/metrics` from this recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsServer>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl std::fmt::Debug for AdmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionState")
            .field("breakers", &self.registry.names().collect::<Vec<_>>())
            .field("retry_queue", &self.retry_queue.as_ref().map(|q| q.stats().name))
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}
