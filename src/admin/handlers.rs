use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::security::rate_limit::{PolicyAuditLog, PolicyBlocks};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    pub name: String,
    pub window_ms: u64,
    pub max_requests: u32,
    pub tracked_keys: usize,
    pub blocked_clients: usize,
    pub audit_entries: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub policies: Vec<PolicyStatus>,
    pub csrf_sessions: usize,
}

#[derive(Serialize)]
pub struct UnblockResult {
    pub ip: String,
    pub unblocked: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let limiters = state.gateway.limiters();
    let policies = limiters
        .policy_names()
        .filter_map(|name| limiters.get(name))
        .map(|limiter| {
            let policy = limiter.policy();
            PolicyStatus {
                name: policy.name.clone(),
                window_ms: policy.window_ms,
                max_requests: policy.max_requests,
                tracked_keys: limiter.store().len(),
                blocked_clients: limiter.blocklist().len(),
                audit_entries: limiter.audit_log().len(),
            }
        })
        .collect();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        policies,
        csrf_sessions: state.gateway.csrf().len(),
    })
}

pub async fn get_audit_logs(State(state): State<AdminState>) -> Json<Vec<PolicyAuditLog>> {
    Json(state.gateway.audit_logs())
}

pub async fn get_blocked(State(state): State<AdminState>) -> Json<Vec<PolicyBlocks>> {
    Json(state.gateway.blocked_ips())
}

pub async fn unblock_ip(
    State(state): State<AdminState>,
    Path(ip): Path<String>,
) -> (StatusCode, Json<UnblockResult>) {
    let unblocked = state.gateway.unblock(&ip);
    let status = if unblocked {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(UnblockResult { ip, unblocked }))
}
