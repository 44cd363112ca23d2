//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the shield.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the protected API server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShieldConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Request-protection settings consumed by the security gateway.
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum requests in flight at once, across all connections.
    pub max_concurrent_requests: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_concurrent_requests: 10_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Maximum time to wait for in-flight requests on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Placeholder admin key. Validation rejects it when the admin API is enabled.
pub const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_ADMIN_KEY.to_string(),
        }
    }
}

/// Request-protection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Derive client IPs from `x-forwarded-for` / `x-real-ip`.
    /// Disable when not running behind a trusted proxy.
    pub trust_proxy_headers: bool,

    /// Interval of the background sweeper task, in seconds.
    pub sweep_interval_secs: u64,

    /// Each limiter also sweeps itself every N checks (0 disables).
    pub sweep_every_calls: u64,

    /// Maximum audit entries retained per policy.
    pub audit_log_capacity: usize,

    /// Named rate limit policies.
    pub policies: BTreeMap<String, RateLimitPolicyConfig>,

    pub abuse: AbuseConfig,

    pub csrf: CsrfConfig,

    pub headers: HeaderPolicyConfig,

    pub validation: RequestValidationConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            trust_proxy_headers: true,
            sweep_interval_secs: 60,
            sweep_every_calls: 1_000,
            audit_log_capacity: 1_000,
            policies: default_policies(),
            abuse: AbuseConfig::default(),
            csrf: CsrfConfig::default(),
            headers: HeaderPolicyConfig::default(),
            validation: RequestValidationConfig::default(),
        }
    }
}

/// Policy names every deployment must define.
pub const REQUIRED_POLICIES: [&str; 4] = ["global", "api", "auth", "contact"];

/// One named fixed-window rate limit.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RateLimitPolicyConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests admitted per key within one window.
    pub max_requests: u32,

    /// User-facing message returned when the limit is exceeded.
    pub message: String,
}

impl RateLimitPolicyConfig {
    pub fn new(window_ms: u64, max_requests: u32, message: impl Into<String>) -> Self {
        Self {
            window_ms,
            max_requests,
            message: message.into(),
        }
    }
}

/// The four built-in policies.
pub fn default_policies() -> BTreeMap<String, RateLimitPolicyConfig> {
    const FIFTEEN_MINUTES: u64 = 15 * 60 * 1000;
    const ONE_HOUR: u64 = 60 * 60 * 1000;

    BTreeMap::from([
        (
            "global".to_string(),
            RateLimitPolicyConfig::new(
                FIFTEEN_MINUTES,
                100,
                "Too many requests from this IP, please try again later.",
            ),
        ),
        (
            "api".to_string(),
            RateLimitPolicyConfig::new(
                FIFTEEN_MINUTES,
                50,
                "Too many API requests, please try again later.",
            ),
        ),
        (
            "auth".to_string(),
            RateLimitPolicyConfig::new(
                FIFTEEN_MINUTES,
                5,
                "Too many authentication attempts, please try again later.",
            ),
        ),
        (
            "contact".to_string(),
            RateLimitPolicyConfig::new(
                ONE_HOUR,
                10,
                "Too many contact form submissions, please try again later.",
            ),
        ),
    ])
}

/// Thresholds for the built-in abuse rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AbuseConfig {
    /// Disable to rely on plain rate limiting only.
    pub enabled: bool,

    /// `rapid_fire` fires when a window's count exceeds `max_requests * multiplier`.
    pub rapid_fire_multiplier: u32,

    /// Block duration for `rapid_fire`, in milliseconds.
    pub rapid_fire_block_ms: u64,

    /// `persistent_limit_hitting` fires when the observed rate exceeds the
    /// policy rate by this factor.
    pub persistent_multiplier: u32,

    /// Block duration for `persistent_limit_hitting`, in milliseconds.
    pub persistent_block_ms: u64,

    /// Minimum elapsed window time before the rate rule is evaluated.
    pub persistent_min_elapsed_ms: u64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rapid_fire_multiplier: 5,
            rapid_fire_block_ms: 15 * 60 * 1000,
            persistent_multiplier: 3,
            persistent_block_ms: 10 * 60 * 1000,
            persistent_min_elapsed_ms: 1_000,
        }
    }
}

/// CSRF token settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Random bytes per token (before encoding).
    pub token_bytes: usize,

    /// Request header carrying the token.
    pub header_name: String,

    /// Cookie carrying the token.
    pub cookie_name: String,

    /// Cookie holding the session identifier the token is bound to.
    pub session_cookie_name: String,

    /// Token lifetime in seconds; 0 means tokens never expire.
    pub token_ttl_secs: u64,

    /// Add the `Secure` attribute to issued cookies.
    pub secure_cookies: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_bytes: 32,
            header_name: "x-csrf-token".to_string(),
            cookie_name: "csrf-token".to_string(),
            session_cookie_name: "session-id".to_string(),
            token_ttl_secs: 24 * 60 * 60,
            secure_cookies: true,
        }
    }
}

/// Security header toggles.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderPolicyConfig {
    /// Relax the CSP for local dev servers and drop HSTS.
    pub development: bool,
    pub content_security_policy: bool,
    pub strict_transport_security: bool,
    pub content_type_options: bool,
    pub frame_options: bool,
    pub xss_protection: bool,
    pub referrer_policy: bool,
    pub permissions_policy: bool,
}

impl Default for HeaderPolicyConfig {
    fn default() -> Self {
        Self {
            development: false,
            content_security_policy: true,
            strict_transport_security: true,
            content_type_options: true,
            frame_options: true,
            xss_protection: true,
            referrer_policy: true,
            permissions_policy: true,
        }
    }
}

/// Structural request checks run before rate limiting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestValidationConfig {
    /// Allowed origins. Entries starting with `.` match by host suffix.
    /// Empty disables the origin check.
    pub allowed_origins: Vec<String>,

    /// MIME types accepted on POST/PUT/PATCH.
    pub allowed_content_types: Vec<String>,

    /// Maximum declared `content-length`, in bytes.
    pub max_body_bytes: u64,

    pub check_user_agent: bool,

    /// Case-insensitive substrings rejected in the user agent.
    pub blocked_user_agents: Vec<String>,
}

impl Default for RequestValidationConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_content_types: vec![
                "application/json".to_string(),
                "application/x-www-form-urlencoded".to_string(),
                "multipart/form-data".to_string(),
            ],
            max_body_bytes: 1024 * 1024,
            check_user_agent: true,
            blocked_user_agents: [
                "sqlmap",
                "nikto",
                "nmap",
                "masscan",
                "zgrab",
                "scrapy",
                "python-requests",
                "go-http-client",
                "libwww-perl",
                "curl/",
                "wget/",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policies_match_documented_thresholds() {
        let policies = default_policies();
        assert_eq!(policies["global"].max_requests, 100);
        assert_eq!(policies["api"].max_requests, 50);
        assert_eq!(policies["auth"].max_requests, 5);
        assert_eq!(policies["contact"].max_requests, 10);
        assert_eq!(policies["contact"].window_ms, 3_600_000);
        assert_eq!(policies["auth"].window_ms, 900_000);
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: ShieldConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:3000"

            [security.headers]
            development = true
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:3000");
        assert_eq!(config.listener.max_concurrent_requests, 10_000);
        assert!(config.security.headers.development);
        assert!(config.security.headers.content_security_policy);
        assert_eq!(config.security.policies.len(), 4);
        assert_eq!(config.security.csrf.header_name, "x-csrf-token");
    }

    #[test]
    fn custom_policy_replaces_table() {
        let config: ShieldConfig = toml::from_str(
            r#"
            [security.policies.search]
            window_ms = 60000
            max_requests = 30
            message = "Slow down"
            "#,
        )
        .unwrap();

        assert_eq!(config.security.policies.len(), 1);
        assert_eq!(config.security.policies["search"].max_requests, 30);
    }
}
