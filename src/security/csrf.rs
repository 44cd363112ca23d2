//! Per-session anti-forgery tokens.
//!
//! One active token per session: generating a new token replaces the old
//! one. Tokens expire after the configured TTL and can be revoked
//! explicitly (e.g. on logout). Validation fails closed and compares in
//! constant time.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::clock::Clock;
use crate::config::CsrfConfig;
use crate::http::request::RequestView;

#[derive(Debug, Clone)]
struct IssuedToken {
    token: String,
    issued_at: u64,
}

#[derive(Debug)]
pub struct CsrfGuard {
    config: CsrfConfig,
    tokens: DashMap<String, IssuedToken>,
    clock: Arc<dyn Clock>,
}

impl CsrfGuard {
    pub fn new(config: CsrfConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            tokens: DashMap::new(),
            clock,
        }
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// Issue a fresh random token for `session_id`, replacing any previous one.
    pub fn generate_token(&self, session_id: &str) -> String {
        let mut bytes = vec![0u8; self.config.token_bytes.max(1)];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(&bytes);

        self.tokens.insert(
            session_id.to_string(),
            IssuedToken {
                token: token.clone(),
                issued_at: self.clock.now_ms(),
            },
        );
        tracing::debug!(session_id = %session_id, "Issued CSRF token");
        token
    }

    /// True iff `session_id` holds an unexpired token equal to `supplied`.
    pub fn validate_token(&self, session_id: &str, supplied: &str) -> bool {
        if supplied.is_empty() {
            return false;
        }
        let Some(issued) = self.tokens.get(session_id).map(|t| t.value().clone()) else {
            return false;
        };
        if self.is_expired(&issued, self.clock.now_ms()) {
            return false;
        }
        let expected = issued.token.as_bytes();
        let supplied = supplied.as_bytes();
        expected.len() == supplied.len() && bool::from(expected.ct_eq(supplied))
    }

    /// Token from the configured header, falling back to the cookie.
    pub fn token_from_request(&self, request: &RequestView<'_>) -> Option<String> {
        request
            .header(self.config.header_name.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| request.cookie(&self.config.cookie_name).filter(|t| !t.is_empty()))
            .map(str::to_string)
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn create_cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict",
            self.config.cookie_name, token
        );
        if self.config.token_ttl_secs > 0 {
            cookie.push_str(&format!("; Max-Age={}", self.config.token_ttl_secs));
        }
        if self.config.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value carrying the session identifier the token is bound to.
    pub fn create_session_cookie(&self, session_id: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict",
            self.config.session_cookie_name, session_id
        );
        if self.config.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Revoke the token bound to `session_id`. Returns whether one existed.
    pub fn invalidate(&self, session_id: &str) -> bool {
        self.tokens.remove(session_id).is_some()
    }

    /// Drop expired tokens. Returns the count removed.
    pub fn sweep(&self) -> usize {
        if self.config.token_ttl_secs == 0 {
            return 0;
        }
        let now = self.clock.now_ms();
        let before = self.tokens.len();
        self.tokens.retain(|_, issued| !self.is_expired(issued, now));
        before.saturating_sub(self.tokens.len())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn is_expired(&self, issued: &IssuedToken, now: u64) -> bool {
        let ttl_ms = self.config.token_ttl_secs.saturating_mul(1000);
        ttl_ms > 0 && now >= issued.issued_at.saturating_add(ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::body::Body;
    use axum::http::Request;

    fn guard() -> (CsrfGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (CsrfGuard::new(CsrfConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn generated_token_validates() {
        let (csrf, _) = guard();
        let token = csrf.generate_token("session-a");

        assert!(csrf.validate_token("session-a", &token));
        assert!(!csrf.validate_token("session-a", "garbage"));
        assert!(!csrf.validate_token("session-a", ""));
        assert!(!csrf.validate_token("unknown", &token));
    }

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let (csrf, _) = guard();
        let a = csrf.generate_token("s1");
        let b = csrf.generate_token("s2");
        assert_ne!(a, b);
        // 32 bytes, unpadded base64.
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn regeneration_replaces_previous_token() {
        let (csrf, _) = guard();
        let first = csrf.generate_token("s");
        let second = csrf.generate_token("s");

        assert!(!csrf.validate_token("s", &first));
        assert!(csrf.validate_token("s", &second));
        assert_eq!(csrf.len(), 1);
    }

    #[test]
    fn tokens_expire_and_are_swept() {
        let (csrf, clock) = guard();
        let token = csrf.generate_token("s");

        clock.advance(24 * 60 * 60 * 1000 - 1);
        assert!(csrf.validate_token("s", &token));
        clock.advance(1);
        assert!(!csrf.validate_token("s", &token));
        assert_eq!(csrf.sweep(), 1);
        assert!(csrf.is_empty());
    }

    #[test]
    fn invalidate_revokes() {
        let (csrf, _) = guard();
        let token = csrf.generate_token("s");
        assert!(csrf.invalidate("s"));
        assert!(!csrf.validate_token("s", &token));
    }

    #[test]
    fn token_read_from_header_then_cookie() {
        let (csrf, _) = guard();

        let req = Request::builder()
            .header("x-csrf-token", "from-header")
            .header("cookie", "csrf-token=from-cookie")
            .body(Body::empty())
            .unwrap();
        assert_eq!(csrf.token_from_request(&RequestView::from(&req)).as_deref(), Some("from-header"));

        let req = Request::builder()
            .header("cookie", "session-id=x; csrf-token=from-cookie")
            .body(Body::empty())
            .unwrap();
        assert_eq!(csrf.token_from_request(&RequestView::from(&req)).as_deref(), Some("from-cookie"));

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(csrf.token_from_request(&RequestView::from(&req)), None);
    }

    #[test]
    fn cookie_attributes() {
        let (csrf, _) = guard();
        let cookie = csrf.create_cookie("abc");
        assert_eq!(
            cookie,
            "csrf-token=abc; Path=/; HttpOnly; SameSite=Strict; Max-Age=86400; Secure"
        );

        let config = CsrfConfig {
            secure_cookies: false,
            token_ttl_secs: 0,
            ..CsrfConfig::default()
        };
        let csrf = CsrfGuard::new(config, Arc::new(ManualClock::new(0)));
        assert_eq!(csrf.create_cookie("abc"), "csrf-token=abc; Path=/; HttpOnly; SameSite=Strict");
        assert_eq!(
            csrf.create_session_cookie("s-1"),
            "session-id=s-1; Path=/; HttpOnly; SameSite=Strict"
        );
    }
}
