//! Metrics collection and exposition.
//!
//! # Metrics
//! - `shield_decisions_total` (counter): rate limit decisions by policy, outcome
//! - `shield_blocks_total` (counter): abuse escalations by policy, rule
//! - `shield_validation_failures_total` (counter): structural rejections by reason
//! - `shield_csrf_failures_total` (counter): CSRF rejections
//! - `shield_request_duration_seconds` (histogram): protected request latency
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until
//!   `init_metrics` installs the Prometheus exporter

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a rate limit decision. `outcome` is "allowed", "limited" or "blocked".
pub fn record_decision(policy: &str, outcome: &'static str) {
    metrics::counter!(
        "shield_decisions_total",
        "policy" => policy.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_block(policy: &str, rule: &str) {
    metrics::counter!(
        "shield_blocks_total",
        "policy" => policy.to_string(),
        "rule" => rule.to_string()
    )
    .increment(1);
}

pub fn record_validation_failure(reason: &'static str) {
    metrics::counter!("shield_validation_failures_total", "reason" => reason).increment(1);
}

pub fn record_csrf_failure() {
    metrics::counter!("shield_csrf_failures_total").increment(1);
}

pub fn record_request(method: &str, status: u16, policy: &str, start: Instant) {
    metrics::histogram!(
        "shield_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "policy" => policy.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}
