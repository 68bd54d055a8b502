//! Code Sync - Sidecar
//!
//! Runs next to a remote application container, keeps one connection to the
//! relay and applies each pushed batch to the shared volume before asking the
//! launcher to restart the application.

mod config;
mod database;
mod engine;
mod env_file;
mod provision;
mod runtime;

use anyhow::{Context, Result};
use clap::Parser;
use csync_common::errors::Categorized;
use csync_common::util::redact_secret;
use csync_common::{ControlLayout, KillCommandSignaler, LogConfig, Rsync, init_logging};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use config::SidecarConfig;
use database::{HttpStateProvider, refresh_database_env};
use engine::Engine;
use runtime::{RuntimeOptions, SidecarRuntime};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "csync-sidecar")]
#[command(
    author,
    version,
    about = "Code Sync sidecar - applies pushed batches to a shared volume",
    long_about = "Code Sync sidecar - applies pushed batches to a shared volume.\n\n\
                  Configured through CSYNC_APP_ID, CSYNC_DEPLOYMENT_ID, CSYNC_RELAY_URL, \
                  CSYNC_API_KEY and CSYNC_FILES_DIR."
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info")
        .with_stderr()
        .with_file_prefix("csync-sidecar");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let config = SidecarConfig::from_env()?;
    let sidecar_url = config.sidecar_url()?;
    info!(
        app_id = config.route.app_id(),
        deployment_id = config.route.deployment_id(),
        relay = %sidecar_url,
        files_dir = %config.files_dir.display(),
        api_key = %redact_secret(&config.api_key),
        "Starting Code Sync sidecar"
    );

    let layout = ControlLayout::new(&config.files_dir);
    layout
        .ensure()
        .with_context(|| {
            format!(
                "failed to create control directories in {}",
                config.files_dir.display()
            )
        })?;

    if config.skip_provisioning {
        info!("Skipping provisioning");
    } else {
        provision::provision(&layout, &config.provision_source, &config.provision_files)?;
    }

    let provider = Arc::new(HttpStateProvider::new(
        config.state_api_url.clone(),
        config.api_key.clone(),
    )?);
    if let Err(e) =
        refresh_database_env(provider.as_ref(), config.route.deployment_id(), &layout).await
    {
        warn!(
            error = %e,
            category = %e.category(),
            "Failed to write database environment; starting without it"
        );
    }

    let engine = Engine::new(
        layout,
        config.route.deployment_id(),
        Rsync::new(config.rsync_path.clone(), config.sync_timeout),
        Arc::new(KillCommandSignaler),
        provider,
    );
    let (runtime, handle) = SidecarRuntime::new(
        RuntimeOptions {
            url: sidecar_url,
            api_key: config.api_key.clone(),
            backoff: config.reconnect_backoff,
            idle_timeout: config.idle_timeout,
            dial_timeout: DIAL_TIMEOUT,
        },
        Arc::new(engine),
    );
    let runtime_task = tokio::spawn(runtime.run());

    shutdown_signal().await;
    handle.stop().await;
    runtime_task.await.context("sidecar runtime panicked")?;

    info!(last_error = ?handle.last_error(), "Sidecar stopped");
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
