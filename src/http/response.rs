//! Response construction helpers.
//!
//! # Responsibilities
//! - Build JSON bodies for gateway rejections (400/403/429/500)
//! - Compute the `X-RateLimit-*` and `Retry-After` headers from a decision
//!   (escalated blocks keep their unblock time to themselves)
//!
//! # Design Decisions
//! - The 500 fallback is built without any fallible step so the gateway can
//!   always fail closed

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use serde::Serialize;

use crate::error::GatewayError;
use crate::security::rate_limit::SecurityDecision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const INTERNAL_ERROR_BODY: &str = r#"{"error":"Internal security error"}"#;

/// Serialize `body` as a JSON response with `status`.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<Body>, GatewayError> {
    let bytes = serde_json::to_vec(body)?;
    let response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))?;
    Ok(response)
}

/// Fixed 500 response used when the gateway itself fails.
pub fn internal_error_response() -> Response<Body> {
    let mut response = Response::new(Body::from(INTERNAL_ERROR_BODY));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Whole seconds until `reset_time`, rounded up and at least 1.
pub fn retry_after_secs(reset_time: u64, now: u64) -> u64 {
    reset_time.saturating_sub(now).div_ceil(1000).max(1)
}

/// Insert `X-RateLimit-Limit`, `-Remaining` and `-Reset` (epoch seconds).
pub fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &SecurityDecision, limit: u32) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_time.div_ceil(1000)));
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitedBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

/// 429 response for a denied decision.
///
/// Blocked and suspicious clients get neither `Retry-After` nor
/// `X-RateLimit-Reset`, only the limit and a zero remaining count.
pub fn rate_limited_response(
    decision: &SecurityDecision,
    limit: u32,
    now: u64,
) -> Result<Response<Body>, GatewayError> {
    let retry_after = (!decision.is_escalated()).then(|| retry_after_secs(decision.reset_time, now));
    let body = RateLimitedBody {
        error: decision.error.as_deref().unwrap_or("Too many requests"),
        retry_after,
    };
    let mut response = json_response(StatusCode::TOO_MANY_REQUESTS, &body)?;
    let headers = response.headers_mut();
    match retry_after {
        Some(secs) => {
            insert_rate_limit_headers(headers, decision, limit);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        None => {
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
        }
    }
    Ok(response)
}
