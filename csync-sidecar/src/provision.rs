//! One-time provisioning of helper binaries onto the shared volume.
//!
//! The application container has neither rsync nor the launcher; the sidecar
//! image carries both and copies them into `.sidecar/` at startup.

use anyhow::{Context, Result};
use csync_common::ControlLayout;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, info};

/// Copy each of `files` from `source` into the sidecar control directory.
///
/// Returns the number of bytes copied. Any missing file is an error.
pub fn provision(layout: &ControlLayout, source: &Path, files: &[String]) -> Result<u64> {
    let dest_dir = layout.sidecar_dir();
    fs::create_dir_all(&dest_dir)
        .with_context(|| format!("failed to create {}", dest_dir.display()))?;

    let mut total = 0;
    for name in files {
        let src = source.join(name);
        let dst = dest_dir.join(name);
        // Copy then rename: the launcher may be executing the current file.
        let tmp = dest_dir.join(format!(".{name}.provision"));

        let bytes = fs::copy(&src, &tmp)
            .with_context(|| format!("failed to copy {} to {}", src.display(), tmp.display()))?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o777))
            .with_context(|| format!("failed to chmod {}", tmp.display()))?;
        fs::rename(&tmp, &dst)
            .with_context(|| format!("failed to install {}", dst.display()))?;

        debug!(file = %name, bytes, "provisioned");
        total += bytes;
    }

    info!(
        count = files.len(),
        bytes = total,
        dir = %dest_dir.display(),
        "provisioned helper binaries"
    );
    Ok(total)
}
