//! Admin API for inspecting and managing limiter state.
//!
//! Mounted only when `admin.enabled` is set. Every route requires
//! `Authorization: Bearer <admin.api_key>`, and the `global` limiter runs
//! ahead of the key check so guessing is rate limited.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue},
    middleware,
    routing::{delete, get},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::http::middleware::{protect, ProtectState, RouteProtection};
use crate::security::SecurityGateway;
use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Debug, Clone)]
pub struct AdminState {
    pub gateway: Arc<SecurityGateway>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/audit-logs", get(get_audit_logs))
        .route("/admin/blocked", get(get_blocked))
        .route("/admin/blocked/{ip}", delete(unblock_ip))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(middleware::from_fn_with_state(
            ProtectState {
                gateway: Arc::clone(&state.gateway),
                route: RouteProtection::new("global"),
            },
            protect,
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
