//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout, body limit)
//!     → middleware/protect.rs (security gateway for the route's policy)
//!         → request.rs (borrowed request view, client IP)
//!         → response.rs (400/403/429/500 bodies and rate limit headers)
//!     → handlers.rs (acknowledge, secure response)
//!     → Send to client
//! ```

pub mod handlers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestView, X_REQUEST_ID};
pub use server::HttpServer;
