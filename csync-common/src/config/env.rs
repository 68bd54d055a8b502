//! Typed readers for `CSYNC_*` variables.
//!
//! Each getter returns a [`Sourced`] value and never fails on its own; bad
//! input is recorded and the default substituted, so [`EnvParser::finish`]
//! can report every problem in one message.

use super::source::Sourced;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Missing required variable {var}")]
    Missing { var: String },

    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },

    #[error("{} configuration error(s): {}", .0.len(), semicolon_list(.0))]
    Multiple(Vec<EnvError>),
}

fn semicolon_list(errors: &[EnvError]) -> String {
    let parts: Vec<String> = errors.iter().map(ToString::to_string).collect();
    parts.join("; ")
}

const PREFIX: &str = "CSYNC_";
const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// What the environment holds for one variable.
enum Raw {
    Unset,
    Empty,
    Set(String),
}

/// Collects configuration problems while reading variables.
#[derive(Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var_name(&self, name: &str) -> String {
        format!("{PREFIX}{name}")
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// `Ok` when nothing was recorded; a lone error is returned as is.
    pub fn finish(mut self) -> Result<(), EnvError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.swap_remove(0)),
            _ => Err(EnvError::Multiple(self.errors)),
        }
    }

    fn read(&self, name: &str) -> (String, Raw) {
        let var = self.var_name(name);
        let raw = match std::env::var(&var) {
            Ok(v) if v.trim().is_empty() => Raw::Empty,
            Ok(v) => Raw::Set(v),
            Err(_) => Raw::Unset,
        };
        (var, raw)
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match self.read(name) {
            (var, Raw::Set(v)) => Sourced::from_env(v, var),
            (var, Raw::Empty) => Sourced::from_env(String::new(), var),
            (_, Raw::Unset) => Sourced::default_value(default.to_string()),
        }
    }

    /// Unset and blank both count as missing.
    pub fn require_string(&mut self, name: &str) -> Sourced<String> {
        match self.read(name) {
            (var, Raw::Set(v)) => Sourced::from_env(v, var),
            (var, _) => {
                self.errors.push(EnvError::Missing { var });
                Sourced::default_value(String::new())
            }
        }
    }

    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match self.read(name) {
            (var, Raw::Set(v)) => Sourced::from_env(Some(v), var),
            (var, Raw::Empty) => Sourced::from_env(None, var),
            (_, Raw::Unset) => Sourced::default_value(None),
        }
    }

    /// A blank value falls back to `default`.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        match self.read(name) {
            (var, Raw::Set(v)) => Sourced::from_env(PathBuf::from(v), var),
            _ => Sourced::default_value(PathBuf::from(default)),
        }
    }

    /// `1/true/yes/on` and `0/false/no/off` in any case; blank is false.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        match self.read(name) {
            (_, Raw::Unset) => Sourced::default_value(default),
            (var, Raw::Empty) => Sourced::from_env(false, var),
            (var, Raw::Set(v)) => match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Sourced::from_env(true, var),
                "0" | "false" | "no" | "off" => Sourced::from_env(false, var),
                _ => {
                    self.errors.push(EnvError::InvalidValue {
                        var,
                        expected: "a boolean (1/0, true/false, yes/no, on/off)",
                        value: v,
                    });
                    Sourced::default_value(default)
                }
            },
        }
    }

    /// An integer in `min..=max`.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let (var, v) = match self.read(name) {
            (var, Raw::Set(v)) => (var, v),
            _ => return Sourced::default_value(default),
        };
        match v.trim().parse::<u64>() {
            Ok(n) if (min..=max).contains(&n) => Sourced::from_env(n, var),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: n,
                    min,
                    max,
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "a non-negative integer",
                    value: v,
                });
                Sourced::default_value(default)
            }
        }
    }

    /// A tracing level name, lowercased.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let (var, v) = match self.read(name) {
            (var, Raw::Set(v)) => (var, v),
            _ => return Sourced::default_value(default.to_string()),
        };
        let level = v.trim().to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Sourced::from_env(level, var)
        } else {
            self.errors.push(EnvError::InvalidLogLevel { var, value: v });
            Sourced::default_value(default.to_string())
        }
    }

    /// Comma-separated, blank items dropped. Set-but-blank is an empty list.
    pub fn get_string_list(&mut self, name: &str, default: &[&str]) -> Sourced<Vec<String>> {
        match self.read(name) {
            (_, Raw::Unset) => {
                Sourced::default_value(default.iter().map(|s| s.to_string()).collect())
            }
            (var, Raw::Empty) => Sourced::from_env(Vec::new(), var),
            (var, Raw::Set(v)) => Sourced::from_env(
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
                var,
            ),
        }
    }
}
