//! Shared utilities.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A fully written temporary file waiting to replace its target.
///
/// Dropping it without calling [`StagedWrite::commit`] removes the temporary
/// file and leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    temp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Atomically move the staged content into place.
    pub fn commit(mut self) -> io::Result<()> {
        fs::rename(&self.temp_path, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Write `content` to a hidden temporary file next to `path` and fsync it.
pub fn stage_write(path: &Path, content: &[u8]) -> io::Result<StagedWrite> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));

    let staged = StagedWrite {
        temp_path,
        target: path.to_path_buf(),
        committed: false,
    };

    let mut file = fs::File::create(&staged.temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;

    Ok(staged)
}

/// Writes content to a file atomically using a temporary file.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    stage_write(path, content)?.commit()
}

/// Keep a short prefix of a secret for log correlation.
pub fn redact_secret(secret: &str) -> String {
    const VISIBLE: usize = 4;
    if secret.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = secret.chars().take(VISIBLE).collect();
    if secret.chars().count() <= VISIBLE * 2 {
        "***".to_string()
    } else {
        format!("{prefix}***")
    }
}

/// Compare two secrets without short-circuiting on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
