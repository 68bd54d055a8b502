//! Layout of the control directories beneath the shared volume.
//!
//! ```text
//! <files_dir>/
//!   .sidecar/    sidecar-owned: batch temp files, .env, database.env
//!   .launcher/   launcher-owned: launcher.pid, push_id, pid, pgid, last_exit_status
//! ```

use crate::util::atomic_write;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SIDECAR_DIR: &str = ".sidecar";
pub const LAUNCHER_DIR: &str = ".launcher";

/// Control subdirectories never promoted into the application root.
pub const CONTROL_DIRS: [&str; 2] = [SIDECAR_DIR, LAUNCHER_DIR];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLayout {
    root: PathBuf,
}

impl ControlLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The shared volume itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sidecar_dir(&self) -> PathBuf {
        self.root.join(SIDECAR_DIR)
    }

    pub fn launcher_dir(&self) -> PathBuf {
        self.root.join(LAUNCHER_DIR)
    }

    /// User-pushed environment, fully rewritten on every push that carries one.
    pub fn env_file(&self) -> PathBuf {
        self.sidecar_dir().join(".env")
    }

    /// Database-derived fragment, sourced before [`Self::env_file`].
    pub fn database_env_file(&self) -> PathBuf {
        self.sidecar_dir().join("database.env")
    }

    /// Fresh temporary path for an incoming batch.
    pub fn batch_temp_file(&self) -> PathBuf {
        self.sidecar_dir()
            .join(format!("sync_batch_{}.bin", Uuid::new_v4().simple()))
    }

    pub fn launcher_pid_file(&self) -> PathBuf {
        self.launcher_dir().join("launcher.pid")
    }

    pub fn push_id_file(&self) -> PathBuf {
        self.launcher_dir().join("push_id")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.launcher_dir().join("pid")
    }

    pub fn pgid_file(&self) -> PathBuf {
        self.launcher_dir().join("pgid")
    }

    pub fn last_exit_status_file(&self) -> PathBuf {
        self.launcher_dir().join("last_exit_status")
    }

    /// True once both control directories exist.
    pub fn is_ready(&self) -> bool {
        self.sidecar_dir().is_dir() && self.launcher_dir().is_dir()
    }

    /// Create both control directories, world-writable so the sidecar and
    /// launcher can run as different users.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [self.sidecar_dir(), self.launcher_dir()] {
            fs::create_dir_all(&dir)?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o777))?;
        }
        Ok(())
    }

    pub fn write_push_id(&self, push_id: &str) -> io::Result<()> {
        atomic_write(&self.push_id_file(), push_id.as_bytes())
    }

    /// Current push id, if one has been recorded.
    pub fn read_push_id(&self) -> Option<String> {
        fs::read_to_string(self.push_id_file())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
