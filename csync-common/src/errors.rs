//! Error categories shared across the relay, sidecar and launcher.
//!
//! Each concrete error enum maps itself onto one of these so that log lines
//! carry a uniform `category=` field and callers can decide how to recover.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Dial/read/write failures, unexpected close, idle timeout.
    /// Recovered by reconnecting.
    Transport,
    /// No sidecar for a key, or no pending push for a response.
    Routing,
    /// File-sync, signal delivery or environment write failures.
    /// Reported to the push caller.
    Application,
    /// Promotion or spawn failures inside the launcher. Retried.
    Supervisor,
    /// Bad or missing configuration. Fatal at startup.
    Config,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Routing => "routing",
            Self::Application => "application",
            Self::Supervisor => "supervisor",
            Self::Config => "config",
        }
    }

    /// Whether the failure is handled locally rather than surfaced to a caller.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Transport | Self::Supervisor)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every error enum in the workspace.
pub trait Categorized {
    fn category(&self) -> ErrorCategory;
}

impl Categorized for crate::codec::CodecError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Transport
    }
}

impl Categorized for crate::config::EnvError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Config
    }
}
