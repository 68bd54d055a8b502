//! Process supervisor.
//!
//! Owns the application's process group. One task handles both the liveness
//! poll and restart/terminate requests, so every restart goes through the
//! same "promote, stop previous, spawn" sequence and two instances never
//! overlap. The pid/pgid files are only a checkpoint for crash recovery.

use csync_common::control::CONTROL_DIRS;
use csync_common::errors::{Categorized, ErrorCategory};
use csync_common::process::{SignalTarget, terminate_group};
use csync_common::util::atomic_write;
use csync_common::{ControlLayout, ProcessRecord, ProcessSignaler, Rsync, Signal, SyncError};
use serde::Serialize;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Sources the database fragment, then the pushed environment, then execs
/// the application so it keeps the shell's pid.
const CHILD_SCRIPT: &str = r#"[ -f "$CSYNC_DATABASE_ENV" ] && . "$CSYNC_DATABASE_ENV"
[ -f "$CSYNC_ENV_FILE" ] && . "$CSYNC_ENV_FILE"
exec "$@""#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    WaitingForControlDir,
    Starting,
    Running { pid: u32, pgid: u32 },
    Restarting,
    Stopped,
}

/// Requests delivered to the supervisor, normally translated from signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// SIGHUP: promote files and restart.
    Restart,
    /// SIGTERM/SIGINT: stop the application and exit.
    Terminate,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to promote files: {0}")]
    Promote(#[from] SyncError),

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("spawned application exited before its pid was read")]
    NoPid,

    #[error("failed to record process: {0}")]
    Record(#[source] io::Error),
}

impl Categorized for StartError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Supervisor
    }
}

/// Contents of `.launcher/last_exit_status`.
#[derive(Debug, Serialize)]
struct ExitRecord {
    pid: u32,
    exit_code: Option<i32>,
    signal: Option<i32>,
    exited_at: String,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub app_root: PathBuf,
    pub command: Vec<String>,
    pub poll_interval: Duration,
    pub stop_grace: Duration,
}

pub struct Supervisor {
    layout: ControlLayout,
    rsync: Rsync,
    signaler: Arc<dyn ProcessSignaler>,
    options: SupervisorOptions,
    child: Option<Child>,
    /// A restart whose promotion failed while the old instance kept running.
    restart_pending: bool,
    starts: u64,
    state_tx: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(
        layout: ControlLayout,
        rsync: Rsync,
        signaler: Arc<dyn ProcessSignaler>,
        options: SupervisorOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::WaitingForControlDir);
        Self {
            layout,
            rsync,
            signaler,
            options,
            child: None,
            restart_pending: false,
            starts: 0,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: SupervisorState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "supervisor state changed");
        }
    }

    /// Supervise until a terminate event arrives or `events` closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<SupervisorEvent>) {
        info!(
            files_dir = %self.layout.root().display(),
            app_root = %self.options.app_root.display(),
            command = ?self.options.command,
            "waiting for control directory"
        );

        let mut ticker = interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SupervisorEvent::Restart) => self.on_restart().await,
                    Some(SupervisorEvent::Terminate) | None => break,
                },
                _ = ticker.tick() => self.on_tick().await,
            }
        }

        self.shutdown().await;
    }

    async fn on_tick(&mut self) {
        match self.state() {
            SupervisorState::WaitingForControlDir => {
                if self.layout.is_ready() && self.claim_control_dir().await {
                    self.set_state(SupervisorState::Starting);
                    self.start().await;
                }
            }
            SupervisorState::Starting | SupervisorState::Restarting => self.start().await,
            SupervisorState::Running { pid, pgid } => {
                if !self.is_alive(pid, pgid).await {
                    warn!(pid, pgid, "application exited unexpectedly, restarting");
                    self.set_state(SupervisorState::Restarting);
                    self.start().await;
                } else if self.restart_pending {
                    self.start().await;
                }
            }
            SupervisorState::Stopped => {}
        }
    }

    async fn on_restart(&mut self) {
        match self.state() {
            SupervisorState::WaitingForControlDir => {
                debug!("restart requested before control directory exists, ignoring");
            }
            SupervisorState::Stopped => {}
            _ => {
                info!(push_id = ?self.layout.read_push_id(), "restart requested");
                self.start().await;
            }
        }
    }

    /// Publish our pid and clear out any application a previous launcher
    /// left running.
    async fn claim_control_dir(&mut self) -> bool {
        let pid = std::process::id();
        if let Err(e) = atomic_write(&self.layout.launcher_pid_file(), pid.to_string().as_bytes()) {
            warn!(error = %e, "failed to write launcher pid, will retry");
            return false;
        }
        info!(pid, "control directory ready");

        if let Some(stale) = ProcessRecord::load(&self.layout) {
            if self.signaler.is_alive(stale.group()).await {
                warn!(
                    pid = stale.pid,
                    pgid = stale.pgid,
                    "terminating application left by a previous launcher"
                );
                terminate_group(self.signaler.as_ref(), stale.pgid, self.options.stop_grace).await;
            }
            ProcessRecord::clear(&self.layout);
        }
        true
    }

    /// Reap the child if it exited, then probe its group.
    async fn is_alive(&mut self, pid: u32, pgid: u32) -> bool {
        let reaped = match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => Some(status),
                Ok(None) => return true,
                Err(e) => {
                    warn!(pid, error = %e, "failed to poll application");
                    None
                }
            },
            None => None,
        };
        if let Some(status) = reaped {
            self.child = None;
            self.record_exit(pid, status);
        }
        self.signaler.is_alive(SignalTarget::Group(pgid)).await
    }

    /// Promote files, then replace the current instance.
    ///
    /// A failed promotion leaves a running instance untouched and retries on
    /// the next tick; with nothing running the state becomes `Restarting`.
    async fn start(&mut self) {
        let promoted = self
            .rsync
            .mirror(self.layout.root(), &self.options.app_root, &CONTROL_DIRS)
            .await
            .map_err(StartError::from);
        if let Err(e) = promoted {
            if let SupervisorState::Running { pid, .. } = self.state() {
                warn!(
                    pid,
                    error = %e,
                    category = %e.category(),
                    "promotion failed, keeping current instance"
                );
                self.restart_pending = true;
            } else {
                warn!(
                    error = %e,
                    category = %e.category(),
                    "failed to start application, will retry"
                );
                self.set_state(SupervisorState::Restarting);
            }
            return;
        }
        self.restart_pending = false;

        self.stop_current().await;
        self.set_state(SupervisorState::Restarting);
        if let Err(e) = self.spawn().await {
            warn!(
                error = %e,
                category = %e.category(),
                "failed to start application, will retry"
            );
        }
    }

    async fn spawn(&mut self) -> Result<(), StartError> {
        let push_id = self.layout.read_push_id();
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(CHILD_SCRIPT)
            .arg("csync-app")
            .args(&self.options.command)
            .current_dir(&self.options.app_root)
            .env("CSYNC_DATABASE_ENV", self.layout.database_env_file())
            .env("CSYNC_ENV_FILE", self.layout.env_file())
            .stdin(Stdio::null())
            .process_group(0);
        match &push_id {
            Some(id) => cmd.env("CSYNC_PUSH_ID", id),
            None => cmd.env_remove("CSYNC_PUSH_ID"),
        };

        let child = cmd.spawn().map_err(|source| StartError::Spawn {
            command: self.options.command.join(" "),
            source,
        })?;
        let pid = child.id().ok_or(StartError::NoPid)?;
        self.child = Some(child);

        let record = ProcessRecord { pid, pgid: pid };
        record.store(&self.layout).map_err(StartError::Record)?;

        self.starts += 1;
        self.set_state(SupervisorState::Running { pid, pgid: pid });
        info!(pid, push_id = ?push_id, starts = self.starts, "application started");
        Ok(())
    }

    /// Terminate the current instance, reap it, then clear out anything
    /// left in its process group.
    async fn stop_current(&mut self) {
        let grace = self.options.stop_grace;
        let pgid = match self.state() {
            SupervisorState::Running { pgid, .. } => Some(pgid),
            _ => self.child.as_ref().and_then(Child::id),
        };
        // Before claim_control_dir the record belongs to a previous launcher.
        let owned = pgid.is_some() || self.child.is_some() || self.starts > 0;

        if let Some(mut child) = self.child.take() {
            let pid = child.id().or(pgid).unwrap_or_default();
            let group = SignalTarget::Group(pgid.unwrap_or(pid));
            if let Err(e) = self.signaler.send(group, Signal::Term).await {
                debug!(pid, error = %e, "SIGTERM failed");
            }

            let status = match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => Some(status),
                Err(_) => {
                    warn!(
                        pid,
                        grace_secs = grace.as_secs(),
                        "application ignored SIGTERM, sending SIGKILL"
                    );
                    if let Err(e) = self.signaler.send(group, Signal::Kill).await {
                        debug!(pid, error = %e, "SIGKILL failed");
                    }
                    tokio::time::timeout(grace, child.wait()).await.ok()
                }
            };
            match status {
                Some(Ok(status)) => self.record_exit(pid, status),
                Some(Err(e)) => warn!(pid, error = %e, "failed to wait for application"),
                None => warn!(pid, "application still running after SIGKILL"),
            }
        }

        if let Some(pgid) = pgid
            && self.signaler.is_alive(SignalTarget::Group(pgid)).await
        {
            terminate_group(self.signaler.as_ref(), pgid, grace).await;
        }
        if owned {
            ProcessRecord::clear(&self.layout);
        }
    }

    fn record_exit(&self, pid: u32, status: ExitStatus) {
        let record = ExitRecord {
            pid,
            exit_code: status.code(),
            signal: status.signal(),
            exited_at: chrono::Utc::now().to_rfc3339(),
        };
        info!(pid, exit_code = ?record.exit_code, signal = ?record.signal, "application exited");

        let written = serde_json::to_vec(&record)
            .map_err(io::Error::other)
            .and_then(|json| atomic_write(&self.layout.last_exit_status_file(), &json));
        if let Err(e) = written {
            warn!(error = %e, "failed to record exit status");
        }
    }

    async fn shutdown(&mut self) {
        info!("stopping application");
        self.stop_current().await;

        let launcher_pid = self.layout.launcher_pid_file();
        if std::fs::read_to_string(&launcher_pid)
            .is_ok_and(|content| content.trim() == std::process::id().to_string())
            && let Err(e) = std::fs::remove_file(&launcher_pid)
        {
            warn!(error = %e, "failed to remove launcher pid file");
        }
        self.set_state(SupervisorState::Stopped);
        info!(starts = self.starts, "launcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csync_common::testing::{init_test_logging, write_fake_tool};
    use csync_common::KillCommandSignaler;
    use std::os::unix::process::CommandExt;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(10);

    struct Fixture {
        tmp: TempDir,
        layout: ControlLayout,
        app_root: PathBuf,
        rsync_log: PathBuf,
        app_log: PathBuf,
        fail_flag: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let layout = ControlLayout::new(tmp.path().join("volume"));
            std::fs::create_dir_all(layout.root()).unwrap();
            let app_root = tmp.path().join("app");
            std::fs::create_dir_all(&app_root).unwrap();
            let rsync_log = tmp.path().join("rsync.log");
            let app_log = tmp.path().join("app.log");
            let fail_flag = tmp.path().join("rsync.fail");
            write_fake_tool(
                tmp.path(),
                "rsync",
                &format!(
                    "echo \"$@\" >> '{log}'\n[ -f '{flag}' ] && {{ echo 'rsync: unreachable' >&2; exit 23; }}\nexit 0",
                    log = rsync_log.display(),
                    flag = fail_flag.display()
                ),
            );
            Self {
                tmp,
                layout,
                app_root,
                rsync_log,
                app_log,
                fail_flag,
            }
        }

        /// An application that logs `pid push_id FOO BAR` and sleeps.
        fn sleeper(&self) -> Vec<String> {
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!(
                    "echo \"$$ ${{CSYNC_PUSH_ID:-none}} ${{FOO:-unset}} ${{BAR:-unset}}\" >> '{}'; exec sleep 30",
                    self.app_log.display()
                ),
            ]
        }

        fn supervisor(&self, command: Vec<String>) -> Supervisor {
            Supervisor::new(
                self.layout.clone(),
                Rsync::new(self.tmp.path().join("rsync"), Duration::from_secs(5)),
                Arc::new(KillCommandSignaler),
                SupervisorOptions {
                    app_root: self.app_root.clone(),
                    command,
                    poll_interval: Duration::from_millis(50),
                    stop_grace: Duration::from_secs(1),
                },
            )
        }

        fn app_lines(&self) -> Vec<String> {
            std::fs::read_to_string(&self.app_log)
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn last_exit(&self) -> serde_json::Value {
            let raw = std::fs::read(self.layout.last_exit_status_file()).unwrap();
            serde_json::from_slice(&raw).unwrap()
        }

        fn mirror_count(&self) -> usize {
            std::fs::read_to_string(&self.rsync_log)
                .unwrap_or_default()
                .lines()
                .filter(|l| l.contains("--delete"))
                .count()
        }
    }

    struct Running {
        events: mpsc::Sender<SupervisorEvent>,
        state: watch::Receiver<SupervisorState>,
        task: JoinHandle<()>,
    }

    fn launch(supervisor: Supervisor) -> Running {
        let (events, rx) = mpsc::channel(8);
        let state = supervisor.subscribe();
        let task = tokio::spawn(supervisor.run(rx));
        Running { events, state, task }
    }

    async fn wait_running(state: &mut watch::Receiver<SupervisorState>, not: Option<u32>) -> u32 {
        let is_new_instance = |s: &SupervisorState| {
            matches!(s, SupervisorState::Running { pid, .. } if Some(*pid) != not)
        };
        let result = tokio::time::timeout(WAIT, state.wait_for(is_new_instance))
        .await
        .expect("supervisor never reached Running")
        .unwrap();
        match *result {
            SupervisorState::Running { pid, .. } => pid,
            _ => unreachable!(),
        }
    }

    async fn wait_for_file(path: &Path) {
        for _ in 0..200 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{} never appeared", path.display());
    }

    async fn group_alive(pgid: u32) -> bool {
        KillCommandSignaler.is_alive(SignalTarget::Group(pgid)).await
    }

    async fn stop(running: Running) {
        running.events.send(SupervisorEvent::Terminate).await.unwrap();
        tokio::time::timeout(WAIT, running.task)
            .await
            .expect("supervisor did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_waits_for_control_dir_then_starts() {
        init_test_logging();
        let fx = Fixture::new();
        let mut running = launch(fx.supervisor(fx.sleeper()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*running.state.borrow(), SupervisorState::WaitingForControlDir);
        assert!(!fx.layout.launcher_pid_file().exists());

        fx.layout.ensure().unwrap();
        let pid = wait_running(&mut running.state, None).await;

        assert_eq!(
            std::fs::read_to_string(fx.layout.launcher_pid_file()).unwrap(),
            std::process::id().to_string()
        );
        assert_eq!(
            ProcessRecord::load(&fx.layout),
            Some(ProcessRecord { pid, pgid: pid })
        );
        let rsync_log = std::fs::read_to_string(&fx.rsync_log).unwrap();
        assert!(rsync_log.contains("--exclude=/.sidecar"));
        assert!(rsync_log.contains("--exclude=/.launcher"));

        stop(running).await;
        assert!(!group_alive(pid).await);
    }

    #[tokio::test]
    async fn test_environment_and_push_id_exposed() {
        let fx = Fixture::new();
        fx.layout.ensure().unwrap();
        std::fs::write(fx.layout.database_env_file(), "export BAR=db\nexport FOO=db\n").unwrap();
        std::fs::write(fx.layout.env_file(), "export FOO='from user'\n").unwrap();
        fx.layout.write_push_id("p7").unwrap();

        let mut running = launch(fx.supervisor(fx.sleeper()));
        let pid = wait_running(&mut running.state, None).await;
        wait_for_file(&fx.app_log).await;

        assert_eq!(fx.app_lines(), vec![format!("{pid} p7 from user db")]);
        stop(running).await;
    }

    #[tokio::test]
    async fn test_restart_event_replaces_instance() {
        init_test_logging();
        let fx = Fixture::new();
        fx.layout.ensure().unwrap();
        let mut running = launch(fx.supervisor(fx.sleeper()));
        let first = wait_running(&mut running.state, None).await;

        fx.layout.write_push_id("p2").unwrap();
        running.events.send(SupervisorEvent::Restart).await.unwrap();
        let second = wait_running(&mut running.state, Some(first)).await;

        assert_ne!(first, second);
        assert!(!group_alive(first).await);
        assert!(group_alive(second).await);
        assert_eq!(fx.mirror_count(), 2);
        assert_eq!(
            ProcessRecord::load(&fx.layout),
            Some(ProcessRecord { pid: second, pgid: second })
        );
        let exit = fx.last_exit();
        assert_eq!(exit["pid"], first);
        assert_eq!(exit["signal"], 15);

        stop(running).await;
    }

    #[tokio::test]
    async fn test_crash_triggers_restart() {
        let fx = Fixture::new();
        fx.layout.ensure().unwrap();
        let mut running = launch(fx.supervisor(fx.sleeper()));
        let first = wait_running(&mut running.state, None).await;

        KillCommandSignaler
            .send(SignalTarget::Process(first), Signal::Kill)
            .await
            .unwrap();
        let second = wait_running(&mut running.state, Some(first)).await;

        assert_ne!(first, second);
        let exit = fx.last_exit();
        assert_eq!(exit["signal"], 9);
        assert!(exit["exit_code"].is_null());

        stop(running).await;
    }

    #[tokio::test]
    async fn test_exit_code_recorded_and_retried() {
        let fx = Fixture::new();
        fx.layout.ensure().unwrap();
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let running = launch(fx.supervisor(command));

        wait_for_file(&fx.layout.last_exit_status_file()).await;
        let exit = fx.last_exit();
        assert_eq!(exit["exit_code"], 3);

        stop(running).await;
        assert!(fx.mirror_count() >= 1);
    }

    #[tokio::test]
    async fn test_terminate_stops_group_and_clears_record() {
        let fx = Fixture::new();
        fx.layout.ensure().unwrap();
        let mut running = launch(fx.supervisor(fx.sleeper()));
        let pid = wait_running(&mut running.state, None).await;
        let state = running.state.clone();

        stop(running).await;

        assert!(!group_alive(pid).await);
        assert_eq!(*state.borrow(), SupervisorState::Stopped);
        assert!(ProcessRecord::load(&fx.layout).is_none());
        assert!(!fx.layout.launcher_pid_file().exists());
    }

    #[tokio::test]
    async fn test_promotion_failure_is_retried() {
        init_test_logging();
        let fx = Fixture::new();
        fx.layout.ensure().unwrap();
        std::fs::write(&fx.fail_flag, "").unwrap();
        let mut running = launch(fx.supervisor(fx.sleeper()));

        tokio::time::timeout(
            WAIT,
            running.state.wait_for(|s| *s == SupervisorState::Restarting),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!fx.app_log.exists());

        std::fs::remove_file(&fx.fail_flag).unwrap();
        wait_running(&mut running.state, None).await;
        assert!(fx.mirror_count() >= 2);

        stop(running).await;
    }

    #[tokio::test]
    async fn test_failed_promotion_keeps_running_instance() {
        init_test_logging();
        let fx = Fixture::new();
        fx.layout.ensure().unwrap();
        let mut running = launch(fx.supervisor(fx.sleeper()));
        let first = wait_running(&mut running.state, None).await;

        std::fs::write(&fx.fail_flag, "").unwrap();
        running.events.send(SupervisorEvent::Restart).await.unwrap();
        for _ in 0..200 {
            if fx.mirror_count() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(fx.mirror_count() >= 3, "restart was not retried");
        assert_eq!(
            *running.state.borrow(),
            SupervisorState::Running { pid: first, pgid: first }
        );
        assert!(group_alive(first).await);
        assert!(!fx.layout.last_exit_status_file().exists());

        std::fs::remove_file(&fx.fail_flag).unwrap();
        let second = wait_running(&mut running.state, Some(first)).await;
        assert!(!group_alive(first).await);
        assert!(group_alive(second).await);

        stop(running).await;
    }

    #[tokio::test]
    async fn test_terminate_while_waiting_keeps_previous_record() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.layout.launcher_dir()).unwrap();
        assert!(!fx.layout.is_ready());
        let previous = ProcessRecord { pid: 4_000_001, pgid: 4_000_001 };
        previous.store(&fx.layout).unwrap();

        let running = launch(fx.supervisor(fx.sleeper()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        stop(running).await;

        assert_eq!(ProcessRecord::load(&fx.layout), Some(previous));
        assert_eq!(fx.mirror_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_group_terminated_before_start() {
        let fx = Fixture::new();
        fx.layout.ensure().unwrap();

        let mut stale = std::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let stale_pid = stale.id();
        ProcessRecord { pid: stale_pid, pgid: stale_pid }
            .store(&fx.layout)
            .unwrap();

        let mut running = launch(fx.supervisor(fx.sleeper()));
        let pid = wait_running(&mut running.state, None).await;

        assert_ne!(pid, stale_pid);
        let status = stale.wait().unwrap();
        assert_eq!(status.signal(), Some(15));

        stop(running).await;
    }

    #[tokio::test]
    async fn test_restart_ignored_while_waiting() {
        let fx = Fixture::new();
        let running = launch(fx.supervisor(fx.sleeper()));

        running.events.send(SupervisorEvent::Restart).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*running.state.borrow(), SupervisorState::WaitingForControlDir);
        assert_eq!(fx.mirror_count(), 0);

        stop(running).await;
    }
}
