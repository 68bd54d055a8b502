//! Launcher configuration: flags mirrored by `CSYNC_*` environment variables.

use anyhow::{Context, Result, bail};
use clap::Args;
use csync_common::ControlLayout;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Args)]
pub struct LauncherArgs {
    /// Shared volume the sidecar writes into
    #[arg(long, env = "CSYNC_FILES_DIR", default_value = "/app-files")]
    pub files_dir: PathBuf,

    /// Directory the application runs from [default: current directory]
    #[arg(long, env = "CSYNC_APP_ROOT")]
    pub app_root: Option<PathBuf>,

    /// rsync binary [default: the copy provisioned into <FILES_DIR>/.sidecar]
    #[arg(long, env = "CSYNC_RSYNC_PATH")]
    pub rsync_path: Option<PathBuf>,

    /// Milliseconds between liveness checks
    #[arg(long, env = "CSYNC_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Seconds between SIGTERM and SIGKILL when stopping the application
    #[arg(long, env = "CSYNC_STOP_GRACE_SECS", default_value_t = 5)]
    pub stop_grace_secs: u64,

    /// Seconds a file promotion may take
    #[arg(long, env = "CSYNC_SYNC_TIMEOUT_SECS", default_value_t = 60)]
    pub sync_timeout_secs: u64,

    /// Application command and arguments
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub layout: ControlLayout,
    pub app_root: PathBuf,
    pub rsync_path: PathBuf,
    pub poll_interval: Duration,
    pub stop_grace: Duration,
    pub sync_timeout: Duration,
    pub command: Vec<String>,
}

impl LauncherConfig {
    pub fn from_args(args: LauncherArgs) -> Result<Self> {
        if !(10..=60_000).contains(&args.poll_interval_ms) {
            bail!(
                "poll interval must be between 10 and 60000 ms, got {}",
                args.poll_interval_ms
            );
        }
        if !(1..=300).contains(&args.stop_grace_secs) {
            bail!("stop grace must be between 1 and 300 seconds, got {}", args.stop_grace_secs);
        }
        if !(1..=3600).contains(&args.sync_timeout_secs) {
            bail!(
                "sync timeout must be between 1 and 3600 seconds, got {}",
                args.sync_timeout_secs
            );
        }
        if args.command.first().is_none_or(|c| c.trim().is_empty()) {
            bail!("no application command given after --");
        }

        let layout = ControlLayout::new(&args.files_dir);
        let app_root = match args.app_root {
            Some(root) => root,
            None => std::env::current_dir().context("failed to determine current directory")?,
        };
        if app_root == args.files_dir {
            bail!("application root and files directory must differ");
        }
        let rsync_path = args
            .rsync_path
            .unwrap_or_else(|| layout.sidecar_dir().join("rsync"));

        Ok(Self {
            layout,
            app_root,
            rsync_path,
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            stop_grace: Duration::from_secs(args.stop_grace_secs),
            sync_timeout: Duration::from_secs(args.sync_timeout_secs),
            command: args.command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use csync_common::test_guard;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: LauncherArgs,
    }

    fn parse(argv: &[&str]) -> Result<LauncherConfig> {
        let argv = std::iter::once("csync-launcher").chain(argv.iter().copied());
        let cli = TestCli::try_parse_from(argv)?;
        LauncherConfig::from_args(cli.args)
    }

    #[test]
    fn test_command_after_separator() {
        let _guard = test_guard!();
        let config = parse(&[
            "--files-dir",
            "/vol",
            "--app-root",
            "/srv/app",
            "--",
            "python",
            "-m",
            "app",
        ])
        .unwrap();

        assert_eq!(config.command, vec!["python", "-m", "app"]);
        assert_eq!(config.layout.root(), std::path::Path::new("/vol"));
        assert_eq!(config.app_root, PathBuf::from("/srv/app"));
        assert_eq!(config.rsync_path, PathBuf::from("/vol/.sidecar/rsync"));
        assert_eq!(config.stop_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_command_required() {
        let _guard = test_guard!();
        assert!(parse(&["--files-dir", "/vol", "--app-root", "/srv/app"]).is_err());
    }

    #[test]
    fn test_rejects_same_root() {
        let _guard = test_guard!();
        let err = parse(&["--files-dir", "/vol", "--app-root", "/vol", "--", "app"]).unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_rejects_tiny_poll_interval() {
        let _guard = test_guard!();
        let err = parse(&[
            "--files-dir",
            "/vol",
            "--app-root",
            "/srv/app",
            "--poll-interval-ms",
            "1",
            "--",
            "app",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("poll interval"));
    }

    #[test]
    fn test_explicit_rsync_path() {
        let _guard = test_guard!();
        let config = parse(&[
            "--files-dir",
            "/vol",
            "--app-root",
            "/srv/app",
            "--rsync-path",
            "/usr/bin/rsync",
            "--",
            "app",
        ])
        .unwrap();
        assert_eq!(config.rsync_path, PathBuf::from("/usr/bin/rsync"));
    }
}
