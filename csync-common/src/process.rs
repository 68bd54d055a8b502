//! Process records and signal delivery.
//!
//! The sidecar and launcher only share the control directory, so signalling
//! is "read a pid file, send a signal" treated as one fallible operation.

use crate::control::ControlLayout;
use crate::errors::{Categorized, ErrorCategory};
use crate::util::atomic_write;
use futures::future::BoxFuture;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Existence probe, delivers nothing.
    Probe,
    Hup,
    Term,
    Kill,
}

impl Signal {
    fn as_arg(self) -> &'static str {
        match self {
            Self::Probe => "-0",
            Self::Hup => "-HUP",
            Self::Term => "-TERM",
            Self::Kill => "-KILL",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Probe => "0",
            Self::Hup => "SIGHUP",
            Self::Term => "SIGTERM",
            Self::Kill => "SIGKILL",
        };
        f.write_str(name)
    }
}

/// Who receives a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    Process(u32),
    Group(u32),
}

impl std::fmt::Display for SignalTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process(pid) => write!(f, "pid {pid}"),
            Self::Group(pgid) => write!(f, "process group {pgid}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("pid file {0} does not exist")]
    PidFileMissing(PathBuf),

    #[error("pid file {path} has invalid content {content:?}")]
    PidFileInvalid { path: PathBuf, content: String },

    #[error("no such process: {0}")]
    ProcessMissing(SignalTarget),

    #[error("permission denied signalling {0}")]
    PermissionDenied(SignalTarget),

    #[error("failed to signal {target}: {message}")]
    Other {
        target: SignalTarget,
        message: String,
    },
}

impl Categorized for SignalError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Application
    }
}

/// Delivers signals. Implemented by [`KillCommandSignaler`] and by test fakes.
pub trait ProcessSignaler: Send + Sync {
    fn send(&self, target: SignalTarget, signal: Signal) -> BoxFuture<'_, Result<(), SignalError>>;

    /// Whether `target` exists. A permission error still proves existence.
    fn is_alive(&self, target: SignalTarget) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            matches!(
                self.send(target, Signal::Probe).await,
                Ok(()) | Err(SignalError::PermissionDenied(_))
            )
        })
    }
}

/// Signals through the `kill` command, run as a tokio child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct KillCommandSignaler;

impl KillCommandSignaler {
    async fn kill(target: SignalTarget, signal: Signal) -> Result<(), SignalError> {
        let mut cmd = Command::new("kill");
        cmd.arg(signal.as_arg());
        match target {
            SignalTarget::Process(pid) => cmd.arg(pid.to_string()),
            SignalTarget::Group(pgid) => cmd.arg("--").arg(format!("-{pgid}")),
        };

        let output = cmd.output().await.map_err(|e| SignalError::Other {
            target,
            message: format!("failed to run kill: {e}"),
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lower = stderr.to_lowercase();
        if lower.contains("no such process") {
            Err(SignalError::ProcessMissing(target))
        } else if lower.contains("not permitted") || lower.contains("permission denied") {
            Err(SignalError::PermissionDenied(target))
        } else {
            Err(SignalError::Other {
                target,
                message: stderr.trim().to_string(),
            })
        }
    }
}

impl ProcessSignaler for KillCommandSignaler {
    fn send(&self, target: SignalTarget, signal: Signal) -> BoxFuture<'_, Result<(), SignalError>> {
        Box::pin(Self::kill(target, signal))
    }
}

/// Read a single pid from `path`.
pub fn read_pid_file(path: &Path) -> Result<u32, SignalError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SignalError::PidFileMissing(path.to_path_buf()));
        }
        Err(e) => {
            return Err(SignalError::PidFileInvalid {
                path: path.to_path_buf(),
                content: e.to_string(),
            });
        }
    };
    match content.trim().parse::<u32>() {
        Ok(pid) if pid > 1 => Ok(pid),
        _ => Err(SignalError::PidFileInvalid {
            path: path.to_path_buf(),
            content: content.trim().to_string(),
        }),
    }
}

/// Ask the launcher to promote files and restart its application.
pub async fn signal_launcher(
    layout: &ControlLayout,
    signaler: &dyn ProcessSignaler,
) -> Result<u32, SignalError> {
    let pid = read_pid_file(&layout.launcher_pid_file())?;
    signaler.send(SignalTarget::Process(pid), Signal::Hup).await?;
    debug!(pid, "sent SIGHUP to launcher");
    Ok(pid)
}

/// Durable checkpoint of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub pgid: u32,
}

impl ProcessRecord {
    /// Read the record. Missing or corrupt files mean "nothing running".
    pub fn load(layout: &ControlLayout) -> Option<Self> {
        let pid = read_pid_file(&layout.pid_file()).ok()?;
        let pgid = read_pid_file(&layout.pgid_file()).ok()?;
        Some(Self { pid, pgid })
    }

    pub fn store(&self, layout: &ControlLayout) -> io::Result<()> {
        atomic_write(&layout.pid_file(), self.pid.to_string().as_bytes())?;
        atomic_write(&layout.pgid_file(), self.pgid.to_string().as_bytes())
    }

    pub fn clear(layout: &ControlLayout) {
        for path in [layout.pid_file(), layout.pgid_file()] {
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "failed to remove process record");
            }
        }
    }

    pub fn group(&self) -> SignalTarget {
        SignalTarget::Group(self.pgid)
    }
}

/// SIGTERM the group, wait up to `grace`, then SIGKILL.
///
/// Returns once the group is gone or has been sent SIGKILL.
pub async fn terminate_group(signaler: &dyn ProcessSignaler, pgid: u32, grace: Duration) {
    let target = SignalTarget::Group(pgid);
    match signaler.send(target, Signal::Term).await {
        Ok(()) => {}
        Err(SignalError::ProcessMissing(_)) => return,
        Err(e) => warn!(pgid, error = %e, "SIGTERM failed"),
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !signaler.is_alive(target).await {
            debug!(pgid, "process group exited after SIGTERM");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    warn!(pgid, grace_secs = grace.as_secs(), "process group ignored SIGTERM, sending SIGKILL");
    match signaler.send(target, Signal::Kill).await {
        Ok(()) | Err(SignalError::ProcessMissing(_)) => {}
        Err(e) => warn!(pgid, error = %e, "SIGKILL failed"),
    }
}
