//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ShieldConfig (validated, immutable)
//!     → SecurityGateway / HttpServer built once at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; limiter state lives for the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AbuseConfig, AdminConfig, CsrfConfig, HeaderPolicyConfig, ListenerConfig,
    ObservabilityConfig, RateLimitPolicyConfig, RequestValidationConfig, SecurityConfig,
    ShieldConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
