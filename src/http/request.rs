//! Request inspection helpers.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for tracing
//! - Expose a borrowed view over the parts of a request the security
//!   layer reads (method, URI, headers, peer address)
//! - Derive the client IP used to key rate limits and blocks
//!
//! # Design Decisions
//! - The view borrows from either a full `Request` or its `Parts`, so the
//!   gateway never needs to own or buffer the body
//! - Forwarded headers are trusted only when configured to be

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Client IP used when nothing identifies the caller.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Generates UUID v4 request IDs for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Borrowed view of the request fields the security layer consumes.
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    /// Socket peer address, when the server was started with connect info.
    pub peer: Option<IpAddr>,
}

impl<'a> RequestView<'a> {
    pub fn new(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: Option<IpAddr>) -> Self {
        self.peer = peer;
        self
    }

    pub fn path(&self) -> &'a str {
        self.uri.path()
    }

    /// First value of a header, if it is valid visible ASCII.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn user_agent(&self) -> Option<&'a str> {
        self.header(header::USER_AGENT)
    }

    /// Value of a cookie across all `Cookie` headers.
    pub fn cookie(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim())
    }

    /// Declared body size. `Some(Err(()))` when the header is present but malformed.
    pub fn content_length(&self) -> Option<Result<u64, ()>> {
        self.headers
            .get(header::CONTENT_LENGTH)
            .map(|v| v.to_str().ok().and_then(|s| s.trim().parse().ok()).ok_or(()))
    }
}

impl<'a, B> From<&'a Request<B>> for RequestView<'a> {
    fn from(request: &'a Request<B>) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        RequestView::new(request.method(), request.uri(), request.headers()).with_peer(peer)
    }
}

impl<'a> From<&'a Parts> for RequestView<'a> {
    fn from(parts: &'a Parts) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        RequestView::new(&parts.method, &parts.uri, &parts.headers).with_peer(peer)
    }
}

/// Derive the client IP for a request.
///
/// With `trust_proxy_headers`, the first hop of `x-forwarded-for` wins,
/// then `x-real-ip`. Otherwise only the socket peer is used. Falls back to
/// [`UNKNOWN_CLIENT`].
pub fn client_ip(request: &RequestView<'_>, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        let forwarded = request
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        if let Some(ip) = request.header("x-real-ip").map(str::trim).filter(|v| !v.is_empty()) {
            return ip.to_string();
        }
    }

    request
        .peer
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("http://example.com/api/contact?x=1");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let req = request(&[
            ("x-forwarded-for", "1.2.3.4, 10.0.0.1"),
            ("x-real-ip", "5.6.7.8"),
        ]);
        assert_eq!(client_ip(&RequestView::from(&req), true), "1.2.3.4");
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_unknown() {
        let req = request(&[("x-real-ip", "5.6.7.8")]);
        assert_eq!(client_ip(&RequestView::from(&req), true), "5.6.7.8");

        let req = request(&[]);
        assert_eq!(client_ip(&RequestView::from(&req), true), UNKNOWN_CLIENT);
    }

    #[test]
    fn untrusted_proxy_headers_use_peer() {
        let mut req = request(&[("x-forwarded-for", "1.2.3.4")]);
        req.extensions_mut()
            .insert(ConnectInfo("9.9.9.9:4000".parse::<SocketAddr>().unwrap()));
        assert_eq!(client_ip(&RequestView::from(&req), false), "9.9.9.9");
    }

    #[test]
    fn cookie_lookup_spans_pairs() {
        let req = request(&[("cookie", "a=1; session-id=abc ; csrf-token=xyz")]);
        let view = RequestView::from(&req);
        assert_eq!(view.cookie("session-id"), Some("abc"));
        assert_eq!(view.cookie("csrf-token"), Some("xyz"));
        assert_eq!(view.cookie("missing"), None);
        assert_eq!(view.path(), "/api/contact");
    }

    #[test]
    fn content_length_parsing() {
        let req = request(&[("content-length", "42")]);
        assert_eq!(RequestView::from(&req).content_length(), Some(Ok(42)));

        let req = request(&[("content-length", "lots")]);
        assert_eq!(RequestView::from(&req).content_length(), Some(Err(())));

        let req = request(&[]);
        assert_eq!(RequestView::from(&req).content_length(), None);
    }
}
