//! Demo API handlers.
//!
//! The handlers only acknowledge and log; the point of the server is the
//! protection in front of them. Every response goes through the gateway
//! so the security headers are always present.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use serde::Serialize;
use uuid::Uuid;

use crate::http::request::RequestView;
use crate::security::{SecureResponseOptions, SecurityDecision, SecurityGateway};

/// State shared by the API handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub gateway: Arc<SecurityGateway>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CsrfTokenBody {
    csrf_token: String,
}

#[derive(Serialize)]
struct Ack {
    success: bool,
    message: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

pub async fn health(State(state): State<AppState>) -> Response {
    let body = Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    };
    state.gateway.secure_json(&body, SecureResponseOptions::default())
}

/// Issue a CSRF token, starting a session first if the client has none.
pub async fn csrf_token(State(state): State<AppState>, request: Request) -> Response {
    let csrf = state.gateway.csrf();
    let existing = RequestView::from(&request)
        .cookie(&csrf.config().session_cookie_name)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let mut options = SecureResponseOptions::default();
    let session_id = match existing {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            append_cookie(&mut options.headers, &csrf.create_session_cookie(&id));
            tracing::debug!(session_id = %id, "Started session");
            id
        }
    };

    let token = csrf.generate_token(&session_id);
    append_cookie(&mut options.headers, &csrf.create_cookie(&token));
    state
        .gateway
        .secure_json(&CsrfTokenBody { csrf_token: token }, options)
}

pub async fn contact(
    State(state): State<AppState>,
    Extension(decision): Extension<SecurityDecision>,
    body: Bytes,
) -> Response {
    tracing::info!(bytes = body.len(), remaining = decision.remaining, "Contact form received");
    acknowledge(&state, "Thanks, we will be in touch.")
}

pub async fn request_demo(
    State(state): State<AppState>,
    Extension(decision): Extension<SecurityDecision>,
    body: Bytes,
) -> Response {
    tracing::info!(bytes = body.len(), remaining = decision.remaining, "Demo request received");
    acknowledge(&state, "Demo request received.")
}

pub async fn newsletter(State(state): State<AppState>, body: Bytes) -> Response {
    tracing::info!(bytes = body.len(), "Newsletter signup received");
    acknowledge(&state, "Subscribed.")
}

/// Records the attempt and rotates the session's CSRF token.
pub async fn login(State(state): State<AppState>, request: Request) -> Response {
    let csrf = state.gateway.csrf();
    let session_id = RequestView::from(&request)
        .cookie(&csrf.config().session_cookie_name)
        .map(str::to_string);

    let mut options = SecureResponseOptions::default();
    if let Some(session_id) = session_id {
        options = options.with_csrf_cookie(session_id);
    }
    tracing::info!("Login attempt recorded");
    state.gateway.secure_json(
        &Ack {
            success: true,
            message: "Login attempt recorded.",
        },
        options,
    )
}

pub async fn not_found(State(state): State<AppState>) -> Response {
    state.gateway.secure_json(
        &ErrorBody { error: "Not found" },
        SecureResponseOptions::status(StatusCode::NOT_FOUND),
    )
}

fn acknowledge(state: &AppState, message: &'static str) -> Response {
    state.gateway.secure_json(
        &Ack {
            success: true,
            message,
        },
        SecureResponseOptions::default(),
    )
}

fn append_cookie(headers: &mut HeaderMap, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            headers.append(header::SET_COOKIE, value);
        }
        Err(e) => tracing::error!(error = %e, "Invalid cookie value"),
    }
}
