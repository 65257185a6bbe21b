//! Prometheus metrics for admission control.
//!
//! Components record through the `metrics` facade; this module installs the
//! Prometheus recorder and renders the text exposition served on `/metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use turnstile_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//!
//! let exposition = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder owner.
///
/// The exposition is served by the web crate's `/metrics` route rather than
/// a dedicated listener.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsServer")
            .field("recorder_installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsServer {
    /// Create a metrics server that has not installed a recorder yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::Install` if the recorder cannot be installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. by another test), this logs a
    /// warning and leaves the server without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                register_metrics();
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if no recorder was installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Circuit breakers
    describe_counter!(
        "circuit_breaker.state_change",
        "Circuit breaker transitions, labelled by breaker, from and to state"
    );
    describe_counter!(
        "circuit_breaker.rejected",
        "Calls rejected without reaching the dependency"
    );
    describe_counter!(
        "circuit_breaker.calls",
        "Guarded calls that reached the dependency, labelled by outcome"
    );
    describe_counter!(
        "circuit_breaker.listener_panics",
        "State change listeners that panicked"
    );

    // Rate limiters
    describe_counter!("rate_limiter.checks", "Requests counted by a rate limiter");
    describe_counter!("rate_limiter.rejected", "Requests rejected by a rate limiter");
    describe_gauge!("rate_limiter.buckets", "Caller buckets tracked by a rate limiter");

    // Retry queue
    describe_counter!("retry_queue.enqueued", "Messages parked in the retry queue");
    describe_counter!("retry_queue.sent", "Parked messages delivered");
    describe_counter!(
        "retry_queue.rejected",
        "Messages refused because the retry queue was full"
    );
    describe_counter!(
        "retry_queue.dead_lettered",
        "Messages given up on, labelled by reason"
    );
    describe_gauge!("retry_queue.size", "Messages currently parked");
}
