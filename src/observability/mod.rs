//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway, limiters, middleware produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and histograms via the metrics facade)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all log events via the trace span
//! - Metrics are cheap no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
