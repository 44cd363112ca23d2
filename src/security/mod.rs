//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → validator.rs (origin, user agent, content type, size)
//!     → rate_limit.rs (block list, per-key window, abuse rules)
//!         → store.rs / blocklist.rs / abuse.rs / audit.rs
//!     → csrf.rs (session-bound token, when the route requires it)
//!     → handler
//!     → headers.rs (hardening headers on every response)
//! ```
//!
//! `gateway.rs` composes these into the single entry point used by the
//! HTTP middleware.
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in client input
//! - State is in-memory and per-process

pub mod abuse;
pub mod audit;
pub mod blocklist;
pub mod csrf;
pub mod gateway;
pub mod headers;
pub mod rate_limit;
pub mod store;
pub mod validator;

pub use gateway::{ProtectOutcome, SecureResponseOptions, SecurityGateway};
pub use rate_limit::{RateLimitManager, RateLimitPolicy, RateLimiter, SecurityDecision};
