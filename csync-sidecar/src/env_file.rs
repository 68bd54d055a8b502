//! Shell-sourceable environment files.
//!
//! Both the pushed Environment File and the database fragment are rendered
//! as `export NAME=<value>` lines, sorted by name, with values quoted so that
//! sourcing the file yields the same bytes.

use csync_common::errors::{Categorized, ErrorCategory};
use csync_common::util::atomic_write;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvFileError {
    #[error("invalid environment variable name {0:?}")]
    InvalidName(String),

    #[error("environment variable {0} contains a NUL byte")]
    NulByte(String),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Categorized for EnvFileError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Application
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render assignments sorted by name.
pub fn render<'a, I>(vars: I) -> Result<String, EnvFileError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut vars: Vec<(&str, &str)> = vars.into_iter().collect();
    vars.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = String::new();
    for (name, value) in vars {
        if !is_valid_name(name) {
            return Err(EnvFileError::InvalidName(name.to_string()));
        }
        if value.contains('\0') {
            return Err(EnvFileError::NulByte(name.to_string()));
        }
        out.push_str("export ");
        out.push_str(name);
        out.push('=');
        out.push_str(&shell_escape::unix::escape(Cow::Borrowed(value)));
        out.push('\n');
    }
    Ok(out)
}

/// Replace the file at `path` with exactly `vars`.
pub fn write<'a, I>(path: &Path, vars: I) -> Result<usize, EnvFileError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let vars: Vec<(&str, &str)> = vars.into_iter().collect();
    let count = vars.len();
    let content = render(vars)?;
    atomic_write(path, content.as_bytes()).map_err(|source| EnvFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(count)
}
