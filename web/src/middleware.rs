//! Rate-limit middleware.
//!
//! Wraps a route (or a whole router) with one surface's [`RateLimiter`].
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::post};
//! use turnstile_runtime::ProtectedSurface;
//! use turnstile_web::middleware::rate_limit_layer;
//!
//! let limiter = Arc::clone(limiters.get(ProtectedSurface::OrderCreation));
//! let app = Router::new()
//!     .route("/api/orders", post(create_order))
//!     .layer(rate_limit_layer(limiter));
//! ```
//!
//! # Flow
//!
//! 1. **Key** the request by the authenticated user, else by client IP
//! 2. **Check** the limiter, recording endpoint and IP on a violation
//! 3. **Reject** with 429 and `Retry-After`, or **forward** and annotate the
//!    response with `X-RateLimit-Limit` / `X-RateLimit-Remaining`

use crate::error::AppError;
use crate::extractors::{caller_key, client_ip};
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use turnstile_runtime::{RateLimitDecision, RateLimiter, RequestMeta};

/// Header carrying the window's request limit.
pub const RATE_LIMIT_LIMIT_HEADER: &str = "X-RateLimit-Limit";

/// Header carrying the requests left in the current window.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "X-RateLimit-Remaining";

/// Create a layer enforcing `limiter` on every request.
#[must_use]
pub fn rate_limit_layer(limiter: Arc<RateLimiter>) -> RateLimitLayer {
    RateLimitLayer { limiter }
}

/// Layer for per-caller rate limiting.
#[derive(Clone, Debug)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

/// Middleware service for per-caller rate limiting.
#[derive(Clone, Debug)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request> for RateLimitMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let key = caller_key(req.headers(), req.extensions());
        let mut meta = RequestMeta::new().endpoint(req.uri().path());
        if let Some(ip) = client_ip(req.headers(), req.extensions()) {
            meta = meta.ip(ip.to_string());
        }

        let decision = self.limiter.check_with(&key, &meta);

        if let Some(retry_after) = decision.retry_after.filter(|_| !decision.allowed) {
            tracing::warn!(
                limiter = %self.limiter.name(),
                key = %key,
                endpoint = %req.uri().path(),
                count = decision.count,
                "Rate limit exceeded"
            );
            let mut response =
                AppError::too_many_requests("Too many requests, slow down", retry_after)
                    .into_response();
            annotate(response.headers_mut(), &decision);
            return Box::pin(async move { Ok(response) });
        }

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.await?;
            annotate(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

fn annotate(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(decision.remaining));
}
