//! Route protection middleware.
//!
//! Runs the security gateway in front of a handler. Rejections are
//! returned as-is; on success the handler runs with the
//! [`SecurityDecision`] in its request extensions and the response gets
//! the security and rate limit headers.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::MethodRouter,
};

use crate::http::request::RequestView;
use crate::http::response::insert_rate_limit_headers;
use crate::observability::metrics;
use crate::security::{ProtectOutcome, SecurityDecision, SecurityGateway};

/// Which protections a route gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteProtection {
    pub policy: &'static str,
    pub require_csrf: bool,
}

impl RouteProtection {
    pub const fn new(policy: &'static str) -> Self {
        Self {
            policy,
            require_csrf: false,
        }
    }

    pub const fn with_csrf(self) -> Self {
        Self {
            require_csrf: true,
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProtectState {
    pub gateway: Arc<SecurityGateway>,
    pub route: RouteProtection,
}

pub async fn protect(State(state): State<ProtectState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let ProtectState { gateway, route } = state;

    let outcome = {
        let view = RequestView::from(&request);
        let session = view.cookie(&gateway.csrf().config().session_cookie_name);
        gateway.protect_route(&view, route.policy, route.require_csrf, session)
    };

    let response = match outcome {
        ProtectOutcome::Reject { response, error } => {
            tracing::debug!(policy = route.policy, status = %response.status(), error = %error, "Request rejected");
            response
        }
        ProtectOutcome::Proceed { decision, limit } => {
            let mut request = request;
            request.extensions_mut().insert::<SecurityDecision>(decision.clone());

            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            gateway.apply_security_headers(headers);
            insert_rate_limit_headers(headers, &decision, limit);
            response
        }
    };

    metrics::record_request(&method, response.status().as_u16(), route.policy, start);
    response
}

/// Wrap a method router with [`protect`].
pub fn protected<S>(
    route: MethodRouter<S>,
    gateway: &Arc<SecurityGateway>,
    protection: RouteProtection,
) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    let state = ProtectState {
        gateway: Arc::clone(gateway),
        route: protection,
    };
    route.layer(middleware::from_fn_with_state(state, protect))
}
