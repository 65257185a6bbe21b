//! Caller identity for rate limiting.
//!
//! - `AuthenticatedUser`: request extension set by whatever authenticates the
//!   caller upstream of the rate-limit layer
//! - `ClientIp`: client address from proxy headers or the connection
//!
//! Rate-limit buckets are keyed by the user id when one is present, otherwise
//! by client IP.

use crate::error::AppError;
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{Extensions, HeaderMap, request::Parts},
};
use std::net::{IpAddr, SocketAddr};

/// Authenticated caller, inserted into request extensions by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Client IP address.
///
/// # Priority
///
/// 1. `X-Forwarded-For` (first IP in the list)
/// 2. `X-Real-IP`
/// 3. Connection address (requires `into_make_service_with_connect_info`)
///
/// Rejects with 400 if none of these yields an address.
///
/// # Example
///
/// ```ignore
/// async fn handler(client_ip: ClientIp) -> String {
///     format!("Client IP: {}", client_ip.0)
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        client_ip(&parts.headers, &parts.extensions)
            .map(Self)
            .ok_or_else(|| AppError::bad_request("Client address unavailable"))
    }
}

/// Resolve the client IP from proxy headers, then the connection address.
pub(crate) fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());

    forwarded
        .or_else(|| {
            headers
                .get("X-Real-IP")
                .and_then(|v| v.to_str().ok())
                .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
        })
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
}

/// Bucket key for a request: `user:{id}` if authenticated, else `ip:{addr}`.
pub(crate) fn caller_key(headers: &HeaderMap, extensions: &Extensions) -> String {
    if let Some(AuthenticatedUser(id)) = extensions.get::<AuthenticatedUser>() {
        return format!("user:{id}");
    }
    match client_ip(headers, extensions) {
        Some(ip) => format!("ip:{ip}"),
        None => "ip:unknown".to_string(),
    }
}
