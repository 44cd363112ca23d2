//! Structural request checks run before rate limiting.
//!
//! # Responsibilities
//! - Origin / referer allow-listing
//! - User-agent denylist (a cheap filter, not bot defense)
//! - Content-type allow-listing for body-carrying methods
//! - Declared body size limit
//!
//! # Design Decisions
//! - Every check is an independent pure function
//! - `RequestValidator::validate` reports all failures, not just the first
//! - Checks look only at headers; bodies are never buffered here

use axum::http::{header, Method};
use url::Url;

use crate::config::RequestValidationConfig;
use crate::http::request::RequestView;

/// A structural check that rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("Invalid origin")]
    Origin,
    #[error("Invalid user agent")]
    UserAgent,
    #[error("Invalid content type")]
    ContentType,
    #[error("Request too large")]
    RequestSize,
}

impl ValidationFailure {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ValidationFailure::Origin => "origin",
            ValidationFailure::UserAgent => "user_agent",
            ValidationFailure::ContentType => "content_type",
            ValidationFailure::RequestSize => "request_size",
        }
    }
}

/// Origin (`scheme://host[:port]`) and host of a URL-ish header value.
fn parse_origin(value: &str) -> Option<(String, String)> {
    let url = Url::parse(value).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    Some((url.origin().ascii_serialization(), host))
}

/// Origin or referer must match `allowed` exactly, or by host suffix for
/// entries starting with `.`. Requests without either header, or whose
/// origin host equals the `host` header, pass.
pub fn validate_origin(request: &RequestView<'_>, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }

    let Some(raw) = request
        .header(header::ORIGIN)
        .or_else(|| request.header(header::REFERER))
    else {
        return true;
    };

    let Some((origin, host)) = parse_origin(raw) else {
        return false;
    };

    let same_host = request
        .header(header::HOST)
        .map(|h| h.split(':').next().unwrap_or(h).eq_ignore_ascii_case(&host))
        .unwrap_or(false);
    if same_host {
        return true;
    }

    allowed.iter().any(|entry| {
        if let Some(suffix) = entry.strip_prefix('.') {
            let suffix = suffix.to_ascii_lowercase();
            host == suffix || host.ends_with(&format!(".{suffix}"))
        } else {
            entry.trim_end_matches('/').eq_ignore_ascii_case(&origin)
        }
    })
}

/// Rejects blank user agents and any containing a denylisted pattern.
pub fn validate_user_agent(request: &RequestView<'_>, blocked_patterns: &[String]) -> bool {
    let Some(agent) = request.user_agent().map(str::trim).filter(|ua| !ua.is_empty()) else {
        return false;
    };
    let agent = agent.to_ascii_lowercase();
    !blocked_patterns
        .iter()
        .any(|pattern| !pattern.is_empty() && agent.contains(&pattern.to_ascii_lowercase()))
}

/// For POST, PUT and PATCH the MIME essence must be in `allowed`.
pub fn validate_content_type(request: &RequestView<'_>, allowed: &[String]) -> bool {
    let method = request.method;
    if method != Method::POST && method != Method::PUT && method != Method::PATCH {
        return true;
    }
    let Some(content_type) = request.header(header::CONTENT_TYPE) else {
        return false;
    };
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    allowed.iter().any(|mime| mime.eq_ignore_ascii_case(essence))
}

/// A declared `content-length` must parse and not exceed `max_bytes`.
pub fn validate_request_size(request: &RequestView<'_>, max_bytes: u64) -> bool {
    match request.content_length() {
        None => true,
        Some(Ok(len)) => len <= max_bytes,
        Some(Err(())) => false,
    }
}

#[derive(Debug, Clone)]
pub struct RequestValidator {
    config: RequestValidationConfig,
}

impl RequestValidator {
    pub fn new(config: RequestValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RequestValidationConfig {
        &self.config
    }

    /// Run every enabled check and return the failures.
    pub fn validate(&self, request: &RequestView<'_>) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        if !validate_origin(request, &self.config.allowed_origins) {
            failures.push(ValidationFailure::Origin);
        }
        if self.config.check_user_agent
            && !validate_user_agent(request, &self.config.blocked_user_agents)
        {
            failures.push(ValidationFailure::UserAgent);
        }
        if !validate_content_type(request, &self.config.allowed_content_types) {
            failures.push(ValidationFailure::ContentType);
        }
        if !validate_request_size(request, self.config.max_body_bytes) {
            failures.push(ValidationFailure::RequestSize);
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn request(method: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/api/contact");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn allowed() -> Vec<String> {
        vec!["https://www.example.com".into(), ".example.org".into()]
    }

    #[test]
    fn origin_exact_and_suffix_matches() {
        let ok = |origin: &str| {
            let req = request("POST", &[("origin", origin)]);
            validate_origin(&RequestView::from(&req), &allowed())
        };

        assert!(ok("https://www.example.com"));
        assert!(ok("https://app.example.org"));
        assert!(ok("https://example.org"));
        assert!(!ok("https://evil.com"));
        assert!(!ok("https://notexample.org"));
        assert!(!ok("http://www.example.com"));
        assert!(!ok("not a url"));
    }

    #[test]
    fn origin_falls_back_to_referer_and_exempts_same_host() {
        let req = request("POST", &[("referer", "https://www.example.com/pricing?plan=pro")]);
        assert!(validate_origin(&RequestView::from(&req), &allowed()));

        let req = request("POST", &[("origin", "https://api.internal:8443"), ("host", "api.internal:8443")]);
        assert!(validate_origin(&RequestView::from(&req), &allowed()));

        let req = request("POST", &[]);
        assert!(validate_origin(&RequestView::from(&req), &allowed()));

        let req = request("POST", &[("origin", "https://evil.com")]);
        assert!(validate_origin(&RequestView::from(&req), &[]));
    }

    #[test]
    fn user_agent_denylist() {
        let patterns = RequestValidationConfig::default().blocked_user_agents;
        let ok = |headers: &[(&str, &str)]| {
            let req = request("GET", headers);
            validate_user_agent(&RequestView::from(&req), &patterns)
        };

        assert!(ok(&[("user-agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0)")]));
        assert!(!ok(&[]));
        assert!(!ok(&[("user-agent", "   ")]));
        assert!(!ok(&[("user-agent", "sqlmap/1.7")]));
        assert!(!ok(&[("user-agent", "Python-Requests/2.31")]));
    }

    #[test]
    fn content_type_only_checked_on_body_methods() {
        let allowed = RequestValidationConfig::default().allowed_content_types;
        let ok = |method: &str, headers: &[(&str, &str)]| {
            let req = request(method, headers);
            validate_content_type(&RequestView::from(&req), &allowed)
        };

        assert!(ok("GET", &[]));
        assert!(ok("POST", &[("content-type", "application/json; charset=utf-8")]));
        assert!(ok("PUT", &[("content-type", "Multipart/Form-Data; boundary=x")]));
        assert!(!ok("POST", &[("content-type", "text/plain")]));
        assert!(!ok("PATCH", &[]));
    }

    #[test]
    fn request_size_limit() {
        let ok = |len: Option<&str>| {
            let headers: Vec<(&str, &str)> = len.map(|l| ("content-length", l)).into_iter().collect();
            let req = request("POST", &headers);
            validate_request_size(&RequestView::from(&req), 1024)
        };

        assert!(ok(None));
        assert!(ok(Some("1024")));
        assert!(!ok(Some("1025")));
        assert!(!ok(Some("-1")));
    }

    #[test]
    fn validator_collects_all_failures() {
        let validator = RequestValidator::new(RequestValidationConfig {
            allowed_origins: allowed(),
            ..RequestValidationConfig::default()
        });
        let req = request(
            "POST",
            &[
                ("origin", "https://evil.com"),
                ("content-type", "text/xml"),
                ("content-length", "999999999"),
            ],
        );

        let failures = validator.validate(&RequestView::from(&req));
        assert_eq!(
            failures,
            vec![
                ValidationFailure::Origin,
                ValidationFailure::UserAgent,
                ValidationFailure::ContentType,
                ValidationFailure::RequestSize,
            ]
        );
        assert_eq!(failures[0].to_string(), "Invalid origin");
    }
}
