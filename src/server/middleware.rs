//! HTTP middleware for formsync
//!
//! This module provides middleware layers for:
//! - Trigger protection (bearer token, then rate limit)
//! - Request/response logging
//! - OpenTelemetry tracing

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::router::AppState;
use crate::error::AuthError;

/// Identity used when the peer address is unavailable
const UNKNOWN_IDENTITY: &str = "unknown";

/// Caller identity for rate limiting: the peer IP address
fn caller_identity(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

/// Trigger guard middleware function
///
/// This middleware:
/// 1. Verifies the `Authorization: Bearer <token>` header
/// 2. Admits the caller through the sliding-window limiter
pub async fn trigger_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, TriggerRejection> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if let Err(error) = state.auth.authenticate(auth_header) {
        tracing::warn!(error = %error, "Trigger rejected");
        if let Some(metrics) = &state.metrics {
            metrics.record_rejection("forbidden");
        }
        return Err(TriggerRejection::from_error(error, None));
    }

    let identity = caller_identity(&request);
    let now = std::time::Instant::now();
    if !state.limiter.admit(&identity, now) {
        let retry_after = state.limiter.retry_after(&identity, now);
        tracing::warn!(
            identity = %identity,
            retry_after_secs = retry_after.as_secs(),
            "Trigger rate limited"
        );
        if let Some(metrics) = &state.metrics {
            metrics.record_rejection("rate_limited");
        }
        return Err(TriggerRejection::from_error(
            AuthError::RateLimited,
            Some(retry_after),
        ));
    }

    Ok(next.run(request).await)
}

/// Trigger rejection response
#[derive(Debug)]
pub struct TriggerRejection {
    status: StatusCode,
    message: String,
    retry_after: Option<u64>,
}

impl TriggerRejection {
    fn from_error(error: AuthError, retry_after: Option<Duration>) -> Self {
        match error {
            AuthError::MissingAuth => Self {
                status: StatusCode::FORBIDDEN,
                message: "Missing authorization header".to_string(),
                retry_after: None,
            },
            AuthError::InvalidToken => Self {
                status: StatusCode::FORBIDDEN,
                message: "Invalid token".to_string(),
                retry_after: None,
            },
            AuthError::RateLimited => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: "Too many requests. Please try again later.".to_string(),
                retry_after: Some(retry_after_secs(retry_after.unwrap_or_default())),
            },
        }
    }
}

/// Whole seconds to wait, rounded up and at least one
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for TriggerRejection {
    fn into_response(self) -> Response {
        let body = axum::Json(serde_json::json!({
            "error": self.message
        }));
        let mut response = (self.status, body).into_response();

        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

/// Logging middleware function
///
/// Logs request and response details including:
/// - Method and path
/// - Status code
/// - Response time
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        path = %uri.path(),
        status = %status.as_u16(),
        duration_ms = %elapsed.as_millis(),
        "Request completed"
    );

    response
}

/// Tracing middleware function
///
/// Creates a span covering the whole request lifecycle, including the
/// sync run of a trigger.
pub async fn tracing_middleware(request: Request, next: Next) -> Response {
    use tracing::Instrument;

    let method = request.method().clone();
    let uri = request.uri().clone();

    let span = tracing::info_span!(
        "http_request",
        http.method = %method,
        http.url = %uri,
        http.status_code = tracing::field::Empty,
    );

    async move {
        let response = next.run(request).await;

        tracing::Span::current().record("http.status_code", response.status().as_u16());

        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    // Test 1: Auth failures map to 403
    #[test]
    fn test_rejection_from_auth_errors() {
        let resp = TriggerRejection::from_error(AuthError::MissingAuth, None);
        assert_eq!(resp.status, StatusCode::FORBIDDEN);
        assert!(resp.retry_after.is_none());

        let resp = TriggerRejection::from_error(AuthError::InvalidToken, None);
        assert_eq!(resp.status, StatusCode::FORBIDDEN);
        assert!(resp.message.contains("Invalid token"));
    }

    // Test 2: Rate limiting maps to 429 with Retry-After
    #[tokio::test]
    async fn test_rate_limited_response() {
        let resp = TriggerRejection::from_error(
            AuthError::RateLimited,
            Some(Duration::from_millis(34_200)),
        );
        assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);

        let response = resp.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "35");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("Too many"));
    }

    // Test 3: Retry-After rounding
    #[test]
    fn test_retry_after_secs() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(35)), 35);
        assert_eq!(retry_after_secs(Duration::from_millis(35_001)), 36);
    }

    // Test 4: Caller identity comes from the peer address
    #[test]
    fn test_caller_identity() {
        let mut request = Request::new(axum::body::Body::empty());
        assert_eq!(caller_identity(&request), UNKNOWN_IDENTITY);

        let addr: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(caller_identity(&request), "10.1.2.3");
    }
}
