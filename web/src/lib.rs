//! Axum integration for Turnstile admission control.
//!
//! Admission control sits in front of the ticket-sales handlers:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  RateLimitLayer                         │  ← 429 + Retry-After per caller
//! ├─────────────────────────────────────────┤
//! │  Handlers                               │
//! │  - registry.execute(PAYMENT, ...)       │  ← 503 + Retry-After when open
//! │  - email queue.send_or_enqueue(...)     │  ← parked while email is open
//! ├─────────────────────────────────────────┤
//! │  Operator surface                       │
//! │  - /admin/*                             │  ← inspect, force open/close
//! │  - /health, /health/ready, /metrics     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use turnstile_web::{AdmissionState, AppError, router, middleware::rate_limit_layer};
//!
//! async fn create_order(
//!     State(state): State<AdmissionState>,
//!     Json(order): Json<NewOrder>,
//! ) -> Result<Json<Receipt>, AppError> {
//!     let receipt = state.registry.execute(PAYMENT, || gateway.charge(&order)).await?;
//!     Ok(Json(receipt))
//! }
//!
//! let orders = Router::new()
//!     .route("/api/orders", post(create_order))
//!     .layer(rate_limit_layer(Arc::clone(limiters.get(ProtectedSurface::OrderCreation))));
//!
//! let app = router(state.clone()).merge(orders.with_state(state));
//! ```

pub mod email;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

// Re-export key types for convenience
pub use email::{EmailMessage, LogEmailSender};
pub use error::AppError;
pub use extractors::{AuthenticatedUser, ClientIp};
pub use middleware::{RateLimitLayer, rate_limit_layer};
pub use state::AdmissionState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Router with the admin, health and metrics routes.
///
/// Every request gets an `x-request-id` (kept if the client sent one) and a
/// tracing span.
pub fn router(state: AdmissionState) -> Router {
    let request_id = axum::http::HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .route("/metrics", get(metrics))
        .merge(handlers::admin::routes())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

/// Prometheus text exposition.
///
/// 404 when the service runs without a metrics recorder.
#[allow(clippy::unused_async)]
async fn metrics(State(state): State<AdmissionState>) -> Response {
    match state.metrics.as_ref().and_then(|m| m.render()) {
        Some(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => AppError::new(
            StatusCode::NOT_FOUND,
            "Metrics are disabled".to_string(),
            "NOT_FOUND".to_string(),
        )
        .into_response(),
    }
}
