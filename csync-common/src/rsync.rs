//! Driver for the external file-sync utility (rsync).
//!
//! Two operations are used:
//! - applying a pre-computed batch onto the shared volume
//!   (`rsync --archive --read-batch=<file> <dir>/`)
//! - promoting the shared volume into the application root as a one-way
//!   mirror that deletes extraneous files and skips the control directories

use crate::errors::{Categorized, ErrorCategory};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest slice of utility output kept in an error message.
const MAX_OUTPUT_CHARS: usize = 2048;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rsync timed out after {0:?}")]
    TimedOut(Duration),

    #[error("rsync exited with {status}: {output}")]
    Failed { status: String, output: String },
}

impl Categorized for SyncError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Application
    }
}

#[derive(Debug, Clone)]
pub struct Rsync {
    program: PathBuf,
    timeout: Duration,
}

impl Default for Rsync {
    fn default() -> Self {
        Self::new("rsync", DEFAULT_SYNC_TIMEOUT)
    }
}

fn with_trailing_slash(dir: &Path) -> OsString {
    let mut s = dir.as_os_str().to_os_string();
    if !s.to_string_lossy().ends_with('/') {
        s.push("/");
    }
    s
}

fn truncate_output(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.chars().count() <= MAX_OUTPUT_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed
        .chars()
        .rev()
        .take(MAX_OUTPUT_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

impl Rsync {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Apply the batch stored at `batch` onto `target_dir`.
    pub async fn apply_batch(&self, batch: &Path, target_dir: &Path) -> Result<(), SyncError> {
        let mut read_batch = OsString::from("--read-batch=");
        read_batch.push(batch.as_os_str());
        self.run(vec![
            OsString::from("--archive"),
            read_batch,
            with_trailing_slash(target_dir),
        ])
        .await
    }

    /// Mirror `source` into `dest`, deleting extraneous files and skipping
    /// the named top-level entries on both sides.
    pub async fn mirror(
        &self,
        source: &Path,
        dest: &Path,
        excludes: &[&str],
    ) -> Result<(), SyncError> {
        let mut args = vec![OsString::from("--archive"), OsString::from("--delete")];
        for name in excludes {
            args.push(OsString::from(format!("--exclude=/{name}")));
        }
        args.push(with_trailing_slash(source));
        args.push(with_trailing_slash(dest));
        self.run(args).await
    }

    async fn run(&self, args: Vec<OsString>) -> Result<(), SyncError> {
        debug!(program = %self.program.display(), ?args, "running rsync");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => return Err(SyncError::TimedOut(self.timeout)),
            Ok(Err(source)) => {
                return Err(SyncError::Spawn {
                    program: self.program.display().to_string(),
                    source,
                });
            }
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stderr).into_owned();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stdout);
        }

        Err(SyncError::Failed {
            status: output.status.to_string(),
            output: truncate_output(&combined),
        })
    }
}
