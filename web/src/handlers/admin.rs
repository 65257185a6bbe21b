//! Operator endpoints for inspecting and overriding admission state.
//!
//! ```text
//! GET  /admin/circuit-breakers
//! GET  /admin/circuit-breakers/history?limit=N
//! GET  /admin/circuit-breakers/:name
//! POST /admin/circuit-breakers/:name/open   {"reason": "..."}
//! POST /admin/circuit-breakers/:name/close  {"reason": "..."}
//! GET  /admin/rate-limits
//! GET  /admin/rate-limits/:surface/violations?limit=N
//! GET  /admin/retry-queue
//! ```
//!
//! These routes carry no authentication of their own; mount them behind
//! whatever guards the rest of the operator surface.

use crate::WebResult;
use crate::error::AppError;
use crate::state::AdmissionState;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use turnstile_runtime::{
    CircuitBreakerStats, DeadLetterSummary, ProtectedSurface, RateLimitViolation,
    RateLimiterStats, RetryQueueStats, StateChangeEvent,
};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_VIOLATION_LIMIT: usize = 100;
const DEAD_LETTER_PREVIEW: usize = 20;

/// Admin routes, to be nested or merged into the service router.
pub fn routes() -> Router<AdmissionState> {
    Router::new()
        .route("/admin/circuit-breakers", get(list_breakers))
        .route("/admin/circuit-breakers/history", get(breaker_history))
        .route("/admin/circuit-breakers/:name", get(get_breaker))
        .route("/admin/circuit-breakers/:name/open", post(open_breaker))
        .route("/admin/circuit-breakers/:name/close", post(close_breaker))
        .route("/admin/rate-limits", get(list_rate_limits))
        .route(
            "/admin/rate-limits/:surface/violations",
            get(rate_limit_violations),
        )
        .route("/admin/retry-queue", get(retry_queue))
}

/// `?limit=N` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    /// Maximum entries to return
    pub limit: Option<usize>,
}

/// Body of a force open/close request.
#[derive(Debug, Default, Deserialize)]
pub struct OverrideRequest {
    /// Why the operator is overriding the breaker
    #[serde(default)]
    pub reason: Option<String>,
}

impl OverrideRequest {
    fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("manual override")
    }
}

/// Retry queue snapshot with its most recent dead letters.
#[derive(Debug, Serialize)]
pub struct RetryQueueView {
    /// Queue counters
    pub stats: RetryQueueStats,
    /// Newest dead letters first, payloads omitted
    pub dead_letters: Vec<DeadLetterSummary>,
}

/// Stats for every breaker, keyed by name.
#[allow(clippy::unused_async)]
pub async fn list_breakers(
    State(state): State<AdmissionState>,
) -> Json<BTreeMap<String, CircuitBreakerStats>> {
    Json(state.registry.all_stats())
}

/// Recent transitions across all breakers, newest first.
#[allow(clippy::unused_async)]
pub async fn breaker_history(
    State(state): State<AdmissionState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<StateChangeEvent>> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(state.registry.state_change_history(limit))
}

/// Stats for one breaker.
///
/// # Errors
///
/// 404 if no breaker has that name.
#[allow(clippy::unused_async)]
pub async fn get_breaker(
    State(state): State<AdmissionState>,
    Path(name): Path<String>,
) -> WebResult<Json<CircuitBreakerStats>> {
    state
        .registry
        .stats(&name)
        .map(Json)
        .ok_or_else(|| AppError::not_found("circuit breaker", name))
}

/// Force a breaker open.
///
/// # Errors
///
/// 404 if no breaker has that name.
pub async fn open_breaker(
    State(state): State<AdmissionState>,
    Path(name): Path<String>,
    body: Option<Json<OverrideRequest>>,
) -> WebResult<Json<CircuitBreakerStats>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    state.registry.force_open(&name, request.reason())?;
    tracing::warn!(breaker = %name, reason = request.reason(), "Admin forced circuit open");
    get_breaker(State(state), Path(name)).await
}

/// Force a breaker closed.
///
/// # Errors
///
/// 404 if no breaker has that name.
pub async fn close_breaker(
    State(state): State<AdmissionState>,
    Path(name): Path<String>,
    body: Option<Json<OverrideRequest>>,
) -> WebResult<Json<CircuitBreakerStats>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    state.registry.force_close(&name, request.reason())?;
    tracing::warn!(breaker = %name, reason = request.reason(), "Admin forced circuit closed");
    get_breaker(State(state), Path(name)).await
}

/// Stats for every protected surface.
#[allow(clippy::unused_async)]
pub async fn list_rate_limits(State(state): State<AdmissionState>) -> Json<Vec<RateLimiterStats>> {
    Json(state.rate_limiters.all_stats())
}

/// Recent violations on one surface, newest first.
///
/// # Errors
///
/// 404 if the surface name is unknown.
#[allow(clippy::unused_async)]
pub async fn rate_limit_violations(
    State(state): State<AdmissionState>,
    Path(surface): Path<String>,
    Query(params): Query<LimitParams>,
) -> WebResult<Json<Vec<RateLimitViolation>>> {
    let surface: ProtectedSurface = surface
        .parse()
        .map_err(|_| AppError::not_found("rate limit surface", &surface))?;
    let limit = params.limit.unwrap_or(DEFAULT_VIOLATION_LIMIT);
    Ok(Json(state.rate_limiters.get(surface).violations(limit)))
}

/// Retry queue counters and recent dead letters.
///
/// # Errors
///
/// 404 if the service runs without a retry queue.
#[allow(clippy::unused_async)]
pub async fn retry_queue(
    State(state): State<AdmissionState>,
) -> WebResult<Json<RetryQueueView>> {
    let queue = state
        .retry_queue
        .as_ref()
        .ok_or_else(|| {
            AppError::new(
                StatusCode::NOT_FOUND,
                "No retry queue configured".to_string(),
                "NOT_FOUND".to_string(),
            )
        })?;

    Ok(Json(RetryQueueView {
        stats: queue.stats(),
        dead_letters: queue.dead_letter_summaries(DEAD_LETTER_PREVIEW),
    }))
}
