//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the protected API routes
//! - Mount the admin API when enabled
//! - Wire up middleware (request ID, tracing, timeout, body limit, backpressure)
//! - Run the periodic sweeper alongside the server
//! - Serve until the shutdown signal

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{any, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::ShieldConfig;
use crate::http::handlers::{self, AppState};
use crate::http::middleware::{protected, RouteProtection};
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::security::SecurityGateway;

const HEALTH: RouteProtection = RouteProtection::new("global");
const CSRF_TOKEN: RouteProtection = RouteProtection::new("api");
const CONTACT: RouteProtection = RouteProtection::new("contact").with_csrf();
const NEWSLETTER: RouteProtection = RouteProtection::new("api").with_csrf();
const LOGIN: RouteProtection = RouteProtection::new("auth").with_csrf();
const NOT_FOUND: RouteProtection = RouteProtection::new("global");

/// HTTP server for the protected API.
pub struct HttpServer {
    router: Router,
    config: ShieldConfig,
    gateway: Arc<SecurityGateway>,
}

impl HttpServer {
    pub fn new(config: ShieldConfig) -> Self {
        let gateway = Arc::new(SecurityGateway::new(&config.security));
        Self::with_gateway(config, gateway)
    }

    /// Build around an existing gateway (e.g. one with a manual clock or
    /// custom key generators).
    pub fn with_gateway(config: ShieldConfig, gateway: Arc<SecurityGateway>) -> Self {
        let router = Self::build_router(&config, &gateway);
        Self {
            router,
            config,
            gateway,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ShieldConfig, gateway: &Arc<SecurityGateway>) -> Router {
        let state = AppState {
            gateway: Arc::clone(gateway),
        };

        let mut router = Router::new()
            .route("/api/health", protected(get(handlers::health), gateway, HEALTH))
            .route("/api/csrf-token", protected(get(handlers::csrf_token), gateway, CSRF_TOKEN))
            .route("/api/contact", protected(post(handlers::contact), gateway, CONTACT))
            .route("/api/request-demo", protected(post(handlers::request_demo), gateway, CONTACT))
            .route("/api/newsletter", protected(post(handlers::newsletter), gateway, NEWSLETTER))
            .route("/api/auth/login", protected(post(handlers::login), gateway, LOGIN))
            .fallback(protected(any(handlers::not_found), gateway, NOT_FOUND))
            .with_state(state);

        if config.admin.enabled {
            router = router.merge(setup_admin_router(AdminState {
                gateway: Arc::clone(gateway),
                api_key: Arc::from(config.admin.api_key.as_str()),
            }));
            tracing::info!("Admin API enabled");
        }

        let body_limit = usize::try_from(config.security.validation.max_body_bytes).unwrap_or(usize::MAX);
        router
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(ConcurrencyLimitLayer::new(config.listener.max_concurrent_requests))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sweeper = tokio::spawn(run_sweeper(
            Arc::clone(&self.gateway),
            Duration::from_secs(self.config.security.sweep_interval_secs.max(1)),
            shutdown.resubscribe(),
        ));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await;

        sweeper.abort();
        served?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    pub fn gateway(&self) -> Arc<SecurityGateway> {
        Arc::clone(&self.gateway)
    }
}

/// Periodically evict expired limiter, block and CSRF state.
async fn run_sweeper(
    gateway: Arc<SecurityGateway>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => gateway.sweep(),
            _ = shutdown.recv() => {
                tracing::debug!("Sweeper stopped");
                return;
            }
        }
    }
}
