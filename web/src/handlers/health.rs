//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AdmissionState;
use axum::{Json, extract::State, http::StatusCode};
use turnstile_runtime::HealthReport;
use turnstile_runtime::health::{queue_check, registry_checks};

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the service is running.
/// This endpoint does NOT look at breakers or queues.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness derived from breaker and retry queue state.
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: Unhealthy (the database circuit is open)
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "degraded",
///   "checks": [
///     {"component": "circuit_breaker:database", "status": "healthy", "metadata": {"state": "CLOSED"}},
///     {"component": "circuit_breaker:email", "status": "degraded", "message": "circuit open, failing fast", ...}
///   ],
///   "timestamp": "2025-01-01T00:00:00Z"
/// }
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(State(state): State<AdmissionState>) -> (StatusCode, Json<HealthReport>) {
    let mut checks = registry_checks(&state.registry);
    if let Some(queue) = &state.retry_queue {
        checks.push(queue_check(&queue.stats()));
    }
    let report = HealthReport::new(checks, state.registry.clock().as_ref());

    let status = if report.is_unhealthy() {
        tracing::warn!(status = %report.status, "Readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(report))
}
