//! Per-route middleware.

pub mod protect;

pub use protect::{protect, protected, ProtectState, RouteProtection};
