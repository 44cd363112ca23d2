//! Request protection for HTTP APIs.
//!
//! Validation, per-policy rate limiting with abuse escalation, CSRF and
//! security headers, composed behind [`security::SecurityGateway`] and
//! served by an Axum [`HttpServer`].

pub mod admin;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ShieldConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::SecurityGateway;
