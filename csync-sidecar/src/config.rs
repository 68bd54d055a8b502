//! Sidecar configuration, read from `CSYNC_*` environment variables.

use anyhow::{Context, Result, bail};
use csync_common::{EnvParser, RouteKey};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub route: RouteKey,
    pub relay_url: Url,
    pub api_key: String,
    pub files_dir: PathBuf,
    pub skip_provisioning: bool,
    pub provision_source: PathBuf,
    pub provision_files: Vec<String>,
    pub rsync_path: PathBuf,
    pub reconnect_backoff: Duration,
    pub idle_timeout: Duration,
    pub sync_timeout: Duration,
    pub state_api_url: Url,
}

impl SidecarConfig {
    pub fn from_env() -> Result<Self> {
        let mut env = EnvParser::new();

        let app_id = env.require_string("APP_ID").into_inner();
        let deployment_id = env.require_string("DEPLOYMENT_ID").into_inner();
        let relay_url = env.require_string("RELAY_URL").into_inner();
        let api_key = env.require_string("API_KEY").into_inner();
        let files_dir = env.get_path("FILES_DIR", "/app-files").into_inner();
        let skip_provisioning = env.get_bool("SKIP_PROVISIONING", false).into_inner();
        let provision_source = env.get_path("PROVISION_SOURCE", "/app/bin").into_inner();
        let provision_files = env
            .get_string_list("PROVISION_FILES", &["rsync", "csync-launcher"])
            .into_inner();
        let rsync_path = env.get_path("RSYNC_PATH", "rsync").into_inner();
        let backoff = env.get_u64_range("RECONNECT_BACKOFF_SECS", 5, 1, 300).into_inner();
        let idle = env.get_u64_range("IDLE_TIMEOUT_SECS", 90, 5, 3600).into_inner();
        let sync = env.get_u64_range("SYNC_TIMEOUT_SECS", 60, 1, 3600).into_inner();
        let state_api_url = env.get_optional_string("STATE_API_URL").into_inner();

        env.finish().context("invalid sidecar configuration")?;

        let route = RouteKey::new(app_id, deployment_id)?;
        let relay_url = Url::parse(&relay_url)
            .with_context(|| format!("invalid CSYNC_RELAY_URL {relay_url:?}"))?;
        if !matches!(relay_url.scheme(), "http" | "https" | "ws" | "wss") {
            bail!("CSYNC_RELAY_URL must use http, https, ws or wss, got {}", relay_url.scheme());
        }
        let state_api_url = match state_api_url {
            Some(raw) => {
                Url::parse(&raw).with_context(|| format!("invalid CSYNC_STATE_API_URL {raw:?}"))?
            }
            None => http_base(&relay_url),
        };

        Ok(Self {
            route,
            relay_url,
            api_key,
            files_dir,
            skip_provisioning,
            provision_source,
            provision_files,
            rsync_path,
            reconnect_backoff: Duration::from_secs(backoff),
            idle_timeout: Duration::from_secs(idle),
            sync_timeout: Duration::from_secs(sync),
            state_api_url,
        })
    }

    /// WebSocket URL of this sidecar's relay endpoint.
    pub fn sidecar_url(&self) -> Result<Url> {
        let scheme = match self.relay_url.scheme() {
            "http" | "ws" => "ws",
            _ => "wss",
        };
        let base = self.relay_url.as_str().trim_end_matches('/');
        let rest = base
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(base);
        let url = format!("{scheme}://{rest}{}", self.route.sidecar_path());
        Url::parse(&url).with_context(|| format!("invalid sidecar URL {url:?}"))
    }
}

/// The relay address with a plain HTTP scheme.
fn http_base(relay: &Url) -> Url {
    let mut url = relay.clone();
    let scheme = match relay.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    }
    .to_string();
    // Switching between special schemes always succeeds.
    let _ = url.set_scheme(&scheme);
    url
}
