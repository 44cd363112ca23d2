//! Security gateway façade.
//!
//! # Data Flow
//! ```text
//! protect_route(request, policy, require_csrf, session)
//!     → RequestValidator      (400 on any failure)
//!     → RateLimiter(policy)   (429 with X-RateLimit-* / Retry-After)
//!     → CsrfGuard             (403, only when required)
//!     → Proceed
//! ```
//!
//! # Design Decisions
//! - One gateway per process, built at startup and shared by `Arc`
//! - Every rejection carries the security headers
//! - Internal failures degrade to a 500, never to an allow
//! - Handlers build responses through `create_secure_response`

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::config::SecurityConfig;
use crate::error::GatewayError;
use crate::http::request::RequestView;
use crate::http::response::{internal_error_response, json_response, rate_limited_response};
use crate::observability::metrics;
use crate::security::csrf::CsrfGuard;
use crate::security::headers::SecurityHeaderPolicy;
use crate::security::rate_limit::{
    PolicyAuditLog, PolicyBlocks, RateLimitManager, RateLimiter, SecurityDecision,
};
use crate::security::validator::RequestValidator;

/// Result of running a route's protections.
#[derive(Debug)]
pub enum ProtectOutcome {
    /// All checks passed; the handler may run.
    Proceed {
        decision: SecurityDecision,
        /// The policy's request limit, for `X-RateLimit-Limit`.
        limit: u32,
    },
    /// A check failed; send `response` instead of running the handler.
    Reject {
        response: Response<Body>,
        error: String,
    },
}

impl ProtectOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProtectOutcome::Proceed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProtectOutcome::Proceed { .. } => None,
            ProtectOutcome::Reject { error, .. } => Some(error),
        }
    }
}

/// Options for [`SecurityGateway::create_secure_response`].
#[derive(Debug, Clone)]
pub struct SecureResponseOptions {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Issue a fresh CSRF token for `session_id` as a cookie.
    pub set_csrf_cookie: bool,
    pub session_id: Option<String>,
}

impl Default for SecureResponseOptions {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            set_csrf_cookie: false,
            session_id: None,
        }
    }
}

impl SecureResponseOptions {
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_csrf_cookie(mut self, session_id: impl Into<String>) -> Self {
        self.set_csrf_cookie = true;
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Serialize)]
struct ValidationBody<'a> {
    error: &'a str,
    details: Vec<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

const CSRF_ERROR: &str = "Invalid CSRF token";

#[derive(Debug)]
pub struct SecurityGateway {
    validator: RequestValidator,
    limiters: RateLimitManager,
    csrf: CsrfGuard,
    headers: SecurityHeaderPolicy,
    clock: Arc<dyn Clock>,
}

impl SecurityGateway {
    pub fn new(config: &SecurityConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        tracing::info!(
            policies = config.policies.len(),
            trust_proxy_headers = config.trust_proxy_headers,
            development = config.headers.development,
            "Security gateway initialized"
        );
        Self {
            validator: RequestValidator::new(config.validation.clone()),
            limiters: RateLimitManager::new(config, Arc::clone(&clock)),
            csrf: CsrfGuard::new(config.csrf.clone(), Arc::clone(&clock)),
            headers: SecurityHeaderPolicy::new(&config.headers),
            clock,
        }
    }

    /// Add or replace a limiter (e.g. one with a custom key generator).
    pub fn insert_limiter(&mut self, limiter: RateLimiter) {
        self.limiters.insert(limiter);
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    pub fn limiters(&self) -> &RateLimitManager {
        &self.limiters
    }

    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }

    pub fn header_policy(&self) -> &SecurityHeaderPolicy {
        &self.headers
    }

    /// Run validation, rate limiting and (optionally) CSRF for a route.
    pub fn protect_route(
        &self,
        request: &RequestView<'_>,
        policy: &str,
        require_csrf: bool,
        session_id: Option<&str>,
    ) -> ProtectOutcome {
        match self.try_protect(request, policy, require_csrf, session_id) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(policy = %policy, path = %request.path(), error = %e, "Security check failed internally");
                let mut response = internal_error_response();
                self.headers.apply(response.headers_mut());
                ProtectOutcome::Reject {
                    response,
                    error: e.to_string(),
                }
            }
        }
    }

    fn try_protect(
        &self,
        request: &RequestView<'_>,
        policy: &str,
        require_csrf: bool,
        session_id: Option<&str>,
    ) -> Result<ProtectOutcome, GatewayError> {
        let failures = self.validator.validate(request);
        if !failures.is_empty() {
            let details: Vec<String> = failures.iter().map(ToString::to_string).collect();
            for failure in &failures {
                metrics::record_validation_failure(failure.label());
            }
            tracing::warn!(policy = %policy, path = %request.path(), failures = ?details, "Request failed validation");
            let body = ValidationBody {
                error: "Invalid request",
                details,
            };
            return self.reject(json_response(StatusCode::BAD_REQUEST, &body)?, "Invalid request");
        }

        let limiter = self
            .limiters
            .get(policy)
            .ok_or_else(|| GatewayError::UnknownPolicy(policy.to_string()))?;
        let decision = limiter.check_limit(request);
        let limit = limiter.policy().max_requests;
        if !decision.allowed {
            let error = decision.error.clone().unwrap_or_default();
            let response = rate_limited_response(&decision, limit, self.clock.now_ms())?;
            return self.reject(response, error);
        }

        if require_csrf && !self.csrf_valid(request, session_id) {
            metrics::record_csrf_failure();
            tracing::warn!(policy = %policy, path = %request.path(), "CSRF validation failed");
            let response = json_response(StatusCode::FORBIDDEN, &ErrorBody { error: CSRF_ERROR })?;
            return self.reject(response, CSRF_ERROR);
        }

        Ok(ProtectOutcome::Proceed { decision, limit })
    }

    fn csrf_valid(&self, request: &RequestView<'_>, session_id: Option<&str>) -> bool {
        match (session_id, self.csrf.token_from_request(request)) {
            (Some(session), Some(token)) => self.csrf.validate_token(session, &token),
            _ => false,
        }
    }

    fn reject(
        &self,
        mut response: Response<Body>,
        error: impl Into<String>,
    ) -> Result<ProtectOutcome, GatewayError> {
        self.headers.apply(response.headers_mut());
        Ok(ProtectOutcome::Reject {
            response,
            error: error.into(),
        })
    }

    /// Build a handler response with the security headers applied and,
    /// when requested, a fresh CSRF cookie for the session.
    pub fn create_secure_response(
        &self,
        body: impl Into<Body>,
        options: SecureResponseOptions,
    ) -> Response<Body> {
        let mut response = Response::new(body.into());
        *response.status_mut() = options.status;

        let headers = response.headers_mut();
        headers.extend(options.headers);
        self.headers.apply(headers);

        if options.set_csrf_cookie {
            match options.session_id.as_deref() {
                Some(session_id) => self.attach_csrf_token(headers, session_id),
                None => tracing::warn!("CSRF cookie requested without a session"),
            }
        }
        response
    }

    /// [`create_secure_response`](Self::create_secure_response) with a JSON body.
    pub fn secure_json<T: Serialize>(&self, body: &T, mut options: SecureResponseOptions) -> Response<Body> {
        match serde_json::to_vec(body) {
            Ok(bytes) => {
                options
                    .headers
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
                self.create_secure_response(bytes, options)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode response body");
                let mut response = internal_error_response();
                self.headers.apply(response.headers_mut());
                response
            }
        }
    }

    fn attach_csrf_token(&self, headers: &mut HeaderMap, session_id: &str) {
        let token = self.csrf.generate_token(session_id);
        let cookie = HeaderValue::from_str(&self.csrf.create_cookie(&token));
        let echoed = HeaderValue::from_str(&token);
        let header_name = HeaderName::from_bytes(self.csrf.config().header_name.as_bytes());

        match (cookie, echoed, header_name) {
            (Ok(cookie), Ok(echoed), Ok(name)) => {
                headers.append(header::SET_COOKIE, cookie);
                headers.insert(name, echoed);
            }
            _ => tracing::error!(session_id = %session_id, "Failed to encode CSRF token headers"),
        }
    }

    /// Stamp the security headers onto an existing header map.
    pub fn apply_security_headers(&self, headers: &mut HeaderMap) {
        self.headers.apply(headers);
    }

    pub fn audit_logs(&self) -> Vec<PolicyAuditLog> {
        self.limiters.get_audit_logs()
    }

    pub fn blocked_ips(&self) -> Vec<PolicyBlocks> {
        self.limiters.blocked_ips()
    }

    pub fn unblock(&self, ip: &str) -> bool {
        let found = self.limiters.unblock(ip);
        if found {
            tracing::info!(ip = %ip, "Client unblocked");
        }
        found
    }

    /// Evict expired counters, blocks and CSRF tokens.
    pub fn sweep(&self) {
        let (entries, blocks) = self.limiters.sweep_all();
        let tokens = self.csrf.sweep();
        tracing::debug!(entries, blocks, tokens, "Security state swept");
    }
}
