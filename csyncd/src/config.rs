//! Relay configuration.

use anyhow::{Result, bail};
use clap::Args;
use std::net::SocketAddr;
use std::time::Duration;

/// Relay settings, each mirrored by a `CSYNC_*` environment variable.
#[derive(Debug, Clone, Args)]
pub struct RelayArgs {
    /// Address to listen on
    #[arg(long, env = "CSYNC_RELAY_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Pre-shared key every editor and sidecar must present
    #[arg(long, env = "CSYNC_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Seconds to wait for a sidecar's terminal response
    #[arg(long, env = "CSYNC_RESPONSE_TIMEOUT_SECS", default_value_t = 45)]
    pub response_timeout_secs: u64,

    /// Seconds between keep-alive pings on every connection
    #[arg(long, env = "CSYNC_KEEPALIVE_SECS", default_value_t = 30)]
    pub keepalive_secs: u64,

    /// Seconds a header-less connection has to send AUTH_REQUEST
    #[arg(long, env = "CSYNC_AUTH_TIMEOUT_SECS", default_value_t = 10)]
    pub auth_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub api_key: String,
    pub response_timeout: Duration,
    pub keepalive: Duration,
    pub auth_timeout: Duration,
}

impl RelayConfig {
    pub fn from_args(args: RelayArgs) -> Result<Self> {
        if args.api_key.trim().is_empty() {
            bail!("CSYNC_API_KEY must not be empty");
        }
        for (name, value) in [
            ("response timeout", args.response_timeout_secs),
            ("keep-alive interval", args.keepalive_secs),
            ("auth timeout", args.auth_timeout_secs),
        ] {
            if !(1..=3600).contains(&value) {
                bail!("{name} must be between 1 and 3600 seconds, got {value}");
            }
        }

        Ok(Self {
            listen: args.listen,
            api_key: args.api_key,
            response_timeout: Duration::from_secs(args.response_timeout_secs),
            keepalive: Duration::from_secs(args.keepalive_secs),
            auth_timeout: Duration::from_secs(args.auth_timeout_secs),
        })
    }

    /// Settings for in-process tests: short timeouts, loopback address.
    #[cfg(test)]
    pub fn for_tests(api_key: &str) -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            api_key: api_key.to_string(),
            response_timeout: Duration::from_secs(5),
            keepalive: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(2),
        }
    }
}
