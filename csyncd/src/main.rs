//! Code Sync - Relay
//!
//! Accepts persistent connections from editors and remote sidecars, pairs
//! them by `(app_id, deployment_id)` and relays push traffic between them.

#![forbid(unsafe_code)]

mod config;
mod http_api;
mod registry;
mod router;
mod ws;

use anyhow::{Context, Result};
use clap::Parser;
use csync_common::util::redact_secret;
use csync_common::{LogConfig, init_logging};
use tokio::net::TcpListener;
use tracing::{info, warn};

use config::{RelayArgs, RelayConfig};
use http_api::{HttpState, create_router};
use router::RelayRouter;

#[derive(Parser)]
#[command(name = "csyncd")]
#[command(author, version, about = "Code Sync relay - routes pushes from editors to sidecars")]
struct Cli {
    #[command(flatten)]
    relay: RelayArgs,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info")
        .with_stderr()
        .with_file_prefix("csyncd");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let config = RelayConfig::from_args(cli.relay)?;
    info!(
        listen = %config.listen,
        api_key = %redact_secret(&config.api_key),
        response_timeout_secs = config.response_timeout.as_secs(),
        keepalive_secs = config.keepalive.as_secs(),
        "Starting Code Sync relay"
    );

    let router = RelayRouter::new(config.response_timeout, config.keepalive);
    let app = create_router(HttpState::new(router.clone(), &config));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("Listening on {}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            router.shutdown();
        })
        .await
        .context("relay server failed")?;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
        _ = term.recv() => info!("Received SIGTERM, shutting down"),
    }
}
