//! Test support shared by every crate in the workspace.

mod log;

pub use log::{TestGuard, init_global_test_logging};

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Compact stderr logging for a single test run. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Write an executable `/bin/sh` script named `name` into `dir`.
///
/// Used to stand in for rsync and other external tools.
pub fn write_fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!("#!/bin/sh\n{body}\n");
    if let Err(e) = std::fs::write(&path, script) {
        panic!("failed to write fake tool {}: {e}", path.display());
    }
    if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)) {
        panic!("failed to chmod fake tool {}: {e}", path.display());
    }
    path
}
