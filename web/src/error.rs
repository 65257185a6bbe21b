//! Error types for web handlers.
//!
//! `AppError` bridges admission errors and HTTP responses:
//!
//! | error | status |
//! |---|---|
//! | open circuit | 503 with `Retry-After` |
//! | rate limit exceeded | 429 with `Retry-After` |
//! | retry queue full | 503 |
//! | unknown breaker | 404 |

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use turnstile_runtime::{
    CircuitOpenError, GuardedSendError, QueueFullError, RateLimitExceededError, RegistryError,
    UnknownBreakerError,
};

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn charge(State(state): State<AdmissionState>) -> Result<Json<Receipt>, AppError> {
///     let receipt = state.registry.execute(PAYMENT, || gateway.charge(order)).await?;
///     Ok(Json(receipt))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// How long the client should wait before retrying
    retry_after: Option<Duration>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            retry_after: None,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach a `Retry-After` hint.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} {id} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 429 Too Many Requests error.
    #[must_use]
    pub fn too_many_requests(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            message.into(),
            "RATE_LIMITED".to_string(),
        )
        .with_retry_after(retry_after)
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// HTTP status this error maps to
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Retry hint, if any
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Whole seconds for a `Retry-After` header, rounded up and at least one.
#[must_use]
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    let rounded = if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
    rounded.max(1)
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
    /// Retry hint in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::warn!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            retry_after_ms: self
                .retry_after
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
        }
        response
    }
}

impl From<CircuitOpenError> for AppError {
    fn from(err: CircuitOpenError) -> Self {
        let error = Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{} is temporarily unavailable", err.breaker),
            "CIRCUIT_OPEN".to_string(),
        );
        match err.retry_after {
            Some(retry_after) => error.with_retry_after(retry_after),
            None => error,
        }
    }
}

impl From<RateLimitExceededError> for AppError {
    fn from(err: RateLimitExceededError) -> Self {
        Self::too_many_requests("Too many requests, slow down", err.retry_after)
    }
}

impl From<QueueFullError> for AppError {
    fn from(err: QueueFullError) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Retry queue full ({} messages)", err.capacity),
            "QUEUE_FULL".to_string(),
        )
    }
}

impl From<UnknownBreakerError> for AppError {
    fn from(err: UnknownBreakerError) -> Self {
        Self::not_found("circuit breaker", err.0)
    }
}

impl<E> From<RegistryError<E>> for AppError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: RegistryError<E>) -> Self {
        match err {
            RegistryError::Unknown(unknown) => unknown.into(),
            RegistryError::Open(open) => open.into(),
            RegistryError::Operation(source) => {
                Self::internal("Upstream dependency failed").with_source(source.into())
            }
        }
    }
}

impl<E> From<GuardedSendError<E>> for AppError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: GuardedSendError<E>) -> Self {
        match err {
            GuardedSendError::QueueFull(full) => full.into(),
            GuardedSendError::Delivery(source) => {
                Self::internal("Message delivery failed").with_source(source.into())
            }
        }
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
