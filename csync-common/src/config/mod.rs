//! `CSYNC_*` configuration shared by the binaries.
//!
//! Values are read with [`EnvParser`] and carry their origin as [`Sourced`],
//! so startup logs can say which variable set what.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

/// Serializes tests in this crate that touch the process environment.
#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
