//! Crate-level error types.
//!
//! None of these reach a client as-is: the gateway maps every
//! `GatewayError` to a fail-closed 500.

/// Internal failure inside the security gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A route asked for a policy that was never configured.
    #[error("unknown rate limit policy '{0}'")]
    UnknownPolicy(String),

    #[error("failed to build response: {0}")]
    Response(#[from] axum::http::Error),

    #[error("failed to encode response body: {0}")]
    Encode(#[from] serde_json::Error),
}
