//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every built-in policy is present and well-formed
//! - Validate value ranges (windows > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ShieldConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{ShieldConfig, PLACEHOLDER_ADMIN_KEY, REQUIRED_POLICIES};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid {field} address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("missing required rate limit policy '{0}'")]
    MissingPolicy(&'static str),

    #[error("policy '{0}' must have a non-zero window")]
    ZeroWindow(String),

    #[error("policy '{0}' must allow at least one request")]
    ZeroMaxRequests(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("admin API is enabled with the placeholder api_key")]
    PlaceholderAdminKey,

    #[error("unknown log format '{0}' (expected 'pretty' or 'json')")]
    LogFormat(String),
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &ShieldConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_concurrent_requests == 0 {
        errors.push(ValidationError::Zero("listener.max_concurrent_requests"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }
    if !matches!(observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::LogFormat(observability.log_format.clone()));
    }

    if config.admin.enabled
        && (config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_ADMIN_KEY)
    {
        errors.push(ValidationError::PlaceholderAdminKey);
    }

    let security = &config.security;
    for name in REQUIRED_POLICIES {
        if !security.policies.contains_key(name) {
            errors.push(ValidationError::MissingPolicy(name));
        }
    }
    for (name, policy) in &security.policies {
        if policy.window_ms == 0 {
            errors.push(ValidationError::ZeroWindow(name.clone()));
        }
        if policy.max_requests == 0 {
            errors.push(ValidationError::ZeroMaxRequests(name.clone()));
        }
    }
    if security.audit_log_capacity == 0 {
        errors.push(ValidationError::Zero("security.audit_log_capacity"));
    }
    if security.sweep_interval_secs == 0 {
        errors.push(ValidationError::Zero("security.sweep_interval_secs"));
    }

    let abuse = &security.abuse;
    if abuse.enabled {
        if abuse.rapid_fire_multiplier == 0 {
            errors.push(ValidationError::Zero("security.abuse.rapid_fire_multiplier"));
        }
        if abuse.persistent_multiplier == 0 {
            errors.push(ValidationError::Zero("security.abuse.persistent_multiplier"));
        }
    }

    let csrf = &security.csrf;
    if csrf.token_bytes == 0 {
        errors.push(ValidationError::Zero("security.csrf.token_bytes"));
    }
    if csrf.header_name.is_empty() {
        errors.push(ValidationError::Empty("security.csrf.header_name"));
    }
    if csrf.cookie_name.is_empty() {
        errors.push(ValidationError::Empty("security.csrf.cookie_name"));
    }
    if csrf.session_cookie_name.is_empty() {
        errors.push(ValidationError::Empty("security.csrf.session_cookie_name"));
    }

    if security.validation.max_body_bytes == 0 {
        errors.push(ValidationError::Zero("security.validation.max_body_bytes"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
