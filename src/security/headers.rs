//! Security response headers.
//!
//! # Responsibilities
//! - Build the hardening header set from configuration flags
//! - Stamp it onto outgoing responses, replacing handler-set values
//!
//! # Design Decisions
//! - Stateless: the header set is computed once at construction
//! - Development mode relaxes the CSP for local dev servers and drops HSTS

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::config::HeaderPolicyConfig;

const CSP_PRODUCTION: &str = "default-src 'self'; \
script-src 'self'; \
style-src 'self' 'unsafe-inline'; \
img-src 'self' data: https:; \
font-src 'self' data:; \
connect-src 'self'; \
frame-ancestors 'none'; \
base-uri 'self'; \
form-action 'self'";

const CSP_DEVELOPMENT: &str = "default-src 'self'; \
script-src 'self' 'unsafe-inline' 'unsafe-eval'; \
style-src 'self' 'unsafe-inline'; \
img-src 'self' data: https: http://localhost:*; \
font-src 'self' data:; \
connect-src 'self' http://localhost:* ws://localhost:*; \
frame-ancestors 'none'; \
base-uri 'self'; \
form-action 'self'";

const HSTS: &str = "max-age=31536000; includeSubDomains; preload";
const PERMISSIONS: &str = "camera=(), microphone=(), geolocation=(), payment=()";

#[derive(Debug, Clone)]
pub struct SecurityHeaderPolicy {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaderPolicy {
    pub fn new(config: &HeaderPolicyConfig) -> Self {
        let mut headers = Vec::new();

        if config.content_security_policy {
            let csp = if config.development {
                CSP_DEVELOPMENT
            } else {
                CSP_PRODUCTION
            };
            headers.push((header::CONTENT_SECURITY_POLICY, HeaderValue::from_static(csp)));
        }
        if config.strict_transport_security && !config.development {
            headers.push((header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS)));
        }
        if config.content_type_options {
            headers.push((header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")));
        }
        if config.frame_options {
            headers.push((header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")));
        }
        if config.xss_protection {
            headers.push((header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")));
        }
        if config.referrer_policy {
            headers.push((
                header::REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ));
        }
        if config.permissions_policy {
            headers.push((
                HeaderName::from_static("permissions-policy"),
                HeaderValue::from_static(PERMISSIONS),
            ));
        }

        Self { headers }
    }

    /// The configured header set.
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// Insert every configured header into `target`.
    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
    }
}

impl Default for SecurityHeaderPolicy {
    fn default() -> Self {
        Self::new(&HeaderPolicyConfig::default())
    }
}
