//! route-shield server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ request id → trace → timeout → body limit
//!                                                      │
//!                                                      ▼
//!                           ┌──────────────────── protect (per route) ─────┐
//!                           │  validator → rate limiter → csrf             │
//!                           │               │                              │
//!                           │     store / blocklist / abuse / audit        │
//!                           └──────────────────────┬───────────────────────┘
//!                                                  │
//!     Client Response                              ▼
//!     ◀────────────── security headers ◀──── handler
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use route_shield::config::{load_config, validate_config, ConfigError, ShieldConfig};
use route_shield::lifecycle::signals::wait_for_signal;
use route_shield::observability::{logging, metrics};
use route_shield::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "route-shield")]
#[command(about = "HTTP API server with request protection", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ShieldConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "route-shield starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        policies = ?config.security.policies.keys().collect::<Vec<_>>(),
        admin = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);
    let shutdown = Arc::new(Shutdown::new());
    let server = HttpServer::new(config);
    let mut handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        result = &mut handle => {
            result??;
            return Ok(());
        }
        _ = wait_for_signal() => shutdown.trigger(),
    }

    match tokio::time::timeout(grace, handle).await {
        Ok(result) => result??,
        Err(_) => tracing::warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed, exiting"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
