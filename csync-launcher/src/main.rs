//! Code Sync - Launcher
//!
//! Entrypoint wrapper for the application container. Promotes synced files
//! from the shared volume into the application root, runs the application in
//! its own process group and restarts it on SIGHUP or when it dies.

#![forbid(unsafe_code)]

mod config;
mod supervisor;

use anyhow::{Context, Result};
use clap::Parser;
use csync_common::{KillCommandSignaler, LogConfig, Rsync, init_logging};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, info};

use config::{LauncherArgs, LauncherConfig};
use supervisor::{Supervisor, SupervisorEvent, SupervisorOptions};

#[derive(Parser)]
#[command(name = "csync-launcher")]
#[command(
    author,
    version,
    about = "Code Sync launcher - supervises the application and restarts it on new code"
)]
struct Cli {
    #[command(flatten)]
    launcher: LauncherArgs,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let config = LauncherConfig::from_args(cli.launcher)?;
    info!(
        files_dir = %config.layout.root().display(),
        app_root = %config.app_root.display(),
        rsync = %config.rsync_path.display(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Starting Code Sync launcher"
    );

    // Handlers go in before launcher.pid is published so an early SIGHUP
    // is not fatal.
    let (events_tx, events_rx) = mpsc::channel(8);
    forward_signals(events_tx)?;

    let supervisor = Supervisor::new(
        config.layout,
        Rsync::new(config.rsync_path, config.sync_timeout),
        Arc::new(KillCommandSignaler),
        SupervisorOptions {
            app_root: config.app_root,
            command: config.command,
            poll_interval: config.poll_interval,
            stop_grace: config.stop_grace,
        },
    );
    supervisor.run(events_rx).await;

    info!("Launcher exited");
    Ok(())
}

fn forward_signals(tx: mpsc::Sender<SupervisorEvent>) -> Result<()> {
    let mut hup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = hup.recv() => SupervisorEvent::Restart,
                _ = term.recv() => SupervisorEvent::Terminate,
                _ = int.recv() => SupervisorEvent::Terminate,
            };
            debug!(?event, "received signal");
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}
