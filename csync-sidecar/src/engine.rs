//! Batch application engine.
//!
//! Turns one [`PushRequest`] into file, environment and process changes and
//! exactly one [`PushResponse`]. Steps run in a fixed order; each declares
//! whether its failure fails the push.

use crate::database::{DatabaseStateProvider, ProviderError, refresh_database_env};
use crate::env_file::{self, EnvFileError};
use csync_common::codec::{PushRequest, PushResponse};
use csync_common::errors::{Categorized, ErrorCategory};
use csync_common::process::signal_launcher;
use csync_common::{ControlLayout, ProcessSignaler, Rsync, SignalError, SyncError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    DatabaseRefresh,
    ApplyBatch,
    WriteEnvironment,
    RecordPushId,
    SignalLauncher,
}

impl Step {
    /// Whether a failure of this step fails the push.
    pub fn fatal(self) -> bool {
        !matches!(self, Self::DatabaseRefresh)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DatabaseRefresh => "database_refresh",
            Self::ApplyBatch => "apply_batch",
            Self::WriteEnvironment => "write_environment",
            Self::RecordPushId => "record_push_id",
            Self::SignalLauncher => "signal_launcher",
        }
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("database refresh failed: {0}")]
    Database(#[from] ProviderError),

    #[error("failed to stage batch file {}: {source}", path.display())]
    StageBatch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to apply batch: {0}")]
    Sync(#[from] SyncError),

    #[error("failed to write environment file: {0}")]
    Environment(#[from] EnvFileError),

    #[error("failed to record push id: {0}")]
    PushId(#[source] io::Error),

    #[error("files updated but launcher was not signalled: {0}")]
    Signal(#[from] SignalError),
}

impl Categorized for StepError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Database(e) => e.category(),
            _ => ErrorCategory::Application,
        }
    }
}

/// Batch file in the control directory, removed when dropped.
struct StagedBatch {
    path: PathBuf,
}

impl StagedBatch {
    async fn write(path: PathBuf, batch: &[u8]) -> Result<Self, StepError> {
        match tokio::fs::write(&path, batch).await {
            Ok(()) => Ok(Self { path }),
            Err(source) => {
                let _ = std::fs::remove_file(&path);
                Err(StepError::StageBatch { path, source })
            }
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedBatch {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove batch file");
        }
    }
}

pub struct Engine {
    layout: ControlLayout,
    deployment_id: String,
    rsync: Rsync,
    signaler: Arc<dyn ProcessSignaler>,
    provider: Arc<dyn DatabaseStateProvider>,
}

impl Engine {
    pub fn new(
        layout: ControlLayout,
        deployment_id: impl Into<String>,
        rsync: Rsync,
        signaler: Arc<dyn ProcessSignaler>,
        provider: Arc<dyn DatabaseStateProvider>,
    ) -> Self {
        Self {
            layout,
            deployment_id: deployment_id.into(),
            rsync,
            signaler,
            provider,
        }
    }

    /// Apply `request` and produce its single outcome.
    pub async fn apply(&self, request: &PushRequest) -> PushResponse {
        let started = Instant::now();
        match self.run(request).await {
            Ok(()) => {
                info!(
                    push_id = %request.push_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "push applied"
                );
                PushResponse::completed(&request.push_id)
            }
            Err((step, e)) => {
                warn!(
                    push_id = %request.push_id,
                    step = step.as_str(),
                    category = %e.category(),
                    error = %e,
                    "push failed"
                );
                PushResponse::failed(&request.push_id, e.to_string())
            }
        }
    }

    /// Apply a step's result under its failure policy.
    ///
    /// `Ok(true)` means the step changed state.
    fn check(
        step: Step,
        push_id: &str,
        result: Result<(), StepError>,
    ) -> Result<bool, (Step, StepError)> {
        match result {
            Ok(()) => Ok(true),
            Err(e) if step.fatal() => Err((step, e)),
            Err(e) => {
                warn!(
                    push_id,
                    step = step.as_str(),
                    error = %e,
                    "non-fatal step failed, continuing"
                );
                Ok(false)
            }
        }
    }

    async fn run(&self, request: &PushRequest) -> Result<(), (Step, StepError)> {
        let push_id = request.push_id.as_str();
        if request.is_noop() {
            debug!(push_id, "empty push, nothing to apply");
            return Ok(());
        }

        let mut changed = false;

        if !request.database_branch_updates.is_empty() {
            for update in &request.database_branch_updates {
                info!(
                    push_id,
                    database = %update.database_name,
                    from = %update.previous_branch_id,
                    to = %update.new_branch_id,
                    created = update.branch_created,
                    "database branch changed"
                );
            }
            let provider = self.provider.as_ref();
            let result = refresh_database_env(provider, &self.deployment_id, &self.layout)
                .await
                .map(|_| ())
                .map_err(StepError::from);
            changed |= Self::check(Step::DatabaseRefresh, push_id, result)?;
        }

        if !request.batch_file.is_empty() {
            let result = self.apply_batch(&request.batch_file).await;
            changed |= Self::check(Step::ApplyBatch, push_id, result)?;
        }

        if let Some(environment) = &request.environment {
            let result = env_file::write(
                &self.layout.env_file(),
                environment
                    .variables
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            )
            .map(|count| debug!(push_id, count, "environment file rewritten"))
            .map_err(StepError::from);
            changed |= Self::check(Step::WriteEnvironment, push_id, result)?;
        }

        if !changed {
            info!(push_id, "no state changed, launcher not signalled");
            return Ok(());
        }

        let result = self.layout.write_push_id(push_id).map_err(StepError::PushId);
        Self::check(Step::RecordPushId, push_id, result)?;

        let result = signal_launcher(&self.layout, self.signaler.as_ref())
            .await
            .map(|pid| debug!(push_id, pid, "launcher signalled"))
            .map_err(StepError::from);
        Self::check(Step::SignalLauncher, push_id, result)?;

        Ok(())
    }

    async fn apply_batch(&self, batch: &[u8]) -> Result<(), StepError> {
        let staged = StagedBatch::write(self.layout.batch_temp_file(), batch).await?;
        debug!(path = %staged.path().display(), bytes = batch.len(), "batch staged");
        self.rsync.apply_batch(staged.path(), self.layout.root()).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::tests::FakeProvider;
    use csync_common::codec::{DatabaseBranchUpdate, EnvironmentSet, PushStatus};
    use csync_common::process::SignalTarget;
    use csync_common::testing::{init_test_logging, write_fake_tool};
    use csync_common::Signal;
    use futures::future::BoxFuture;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tracing::info;

    /// Records signals instead of delivering them.
    #[derive(Default)]
    pub(crate) struct RecordingSignaler {
        pub sent: Mutex<Vec<(SignalTarget, Signal)>>,
        pub fail: bool,
    }

    impl RecordingSignaler {
        pub(crate) fn sent(&self) -> Vec<(SignalTarget, Signal)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ProcessSignaler for RecordingSignaler {
        fn send(
            &self,
            target: SignalTarget,
            signal: Signal,
        ) -> BoxFuture<'_, Result<(), SignalError>> {
            let result = if self.fail {
                Err(SignalError::ProcessMissing(target))
            } else {
                self.sent.lock().unwrap().push((target, signal));
                Ok(())
            };
            Box::pin(std::future::ready(result))
        }
    }

    pub(crate) struct Fixture {
        pub tmp: TempDir,
        pub layout: ControlLayout,
        pub rsync_log: PathBuf,
        pub signaler: Arc<RecordingSignaler>,
        pub provider: Arc<FakeProvider>,
    }

    impl Fixture {
        /// Control dirs, a launcher pid of 4242 and a fake rsync that logs
        /// its arguments and exits with `exit_code`.
        pub(crate) fn new(exit_code: i32) -> Self {
            let tmp = TempDir::new().unwrap();
            let volume = tmp.path().join("volume");
            std::fs::create_dir_all(&volume).unwrap();
            let layout = ControlLayout::new(&volume);
            layout.ensure().unwrap();
            std::fs::write(layout.launcher_pid_file(), "4242").unwrap();

            let rsync_log = tmp.path().join("rsync.log");
            Self::write_rsync(&tmp, &rsync_log, exit_code);
            Self {
                tmp,
                layout,
                rsync_log,
                signaler: Arc::new(RecordingSignaler::default()),
                provider: Arc::new(FakeProvider::ok(&[("DATABASE_URL", "postgres://h/db")])),
            }
        }

        fn write_rsync(tmp: &TempDir, log: &Path, exit_code: i32) -> PathBuf {
            write_fake_tool(
                tmp.path(),
                "rsync",
                &format!(
                    "for a in \"$@\"; do case \"$a\" in --read-batch=*) f=\"${{a#--read-batch=}}\"; [ -f \"$f\" ] && echo \"batch $(wc -c < \"$f\" | tr -d ' ')\" >> '{log}';; esac; done\n\
                     echo \"args $*\" >> '{log}'\n\
                     echo 'rsync: some error' >&2\n\
                     exit {exit_code}",
                    log = log.display()
                ),
            )
        }

        pub(crate) fn rsync(&self) -> Rsync {
            Rsync::new(self.tmp.path().join("rsync"), Duration::from_secs(5))
        }

        pub(crate) fn engine(&self) -> Engine {
            Engine::new(
                self.layout.clone(),
                "dep-1",
                self.rsync(),
                self.signaler.clone(),
                self.provider.clone(),
            )
        }

        pub(crate) fn rsync_log(&self) -> String {
            std::fs::read_to_string(&self.rsync_log).unwrap_or_default()
        }

        fn sidecar_entries(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.layout.sidecar_dir())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            names
        }
    }

    fn env(pairs: &[(&str, &str)]) -> EnvironmentSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_full_push_scenario() {
        init_test_logging();
        info!("TEST START: test_full_push_scenario");
        let fx = Fixture::new(0);
        let request = PushRequest::new("p1")
            .with_batch(vec![0xAB; 32])
            .with_environment(env(&[("FOO", "bar baz")]));

        let response = fx.engine().apply(&request).await;

        assert_eq!(response.push_id, "p1");
        assert_eq!(response.status(), PushStatus::Completed);
        assert!(response.error_message.is_empty());

        let log = fx.rsync_log();
        assert!(log.contains("batch 32"), "rsync log: {log}");
        assert!(log.contains(&format!("{}/", fx.layout.root().display())));
        assert_eq!(
            std::fs::read_to_string(fx.layout.env_file()).unwrap(),
            "export FOO='bar baz'\n"
        );
        assert_eq!(fx.layout.read_push_id().as_deref(), Some("p1"));
        assert_eq!(
            fx.signaler.sent(),
            vec![(SignalTarget::Process(4242), Signal::Hup)]
        );
        // Staged batch was cleaned up.
        assert!(!fx.sidecar_entries().iter().any(|n| n.starts_with("sync_batch_")));
        info!("TEST PASS: test_full_push_scenario");
    }

    #[tokio::test]
    async fn test_empty_push_is_noop() {
        let fx = Fixture::new(0);
        let before = fx.sidecar_entries();

        let response = fx.engine().apply(&PushRequest::new("noop")).await;

        assert_eq!(response.status(), PushStatus::Completed);
        assert!(fx.rsync_log().is_empty());
        assert!(fx.signaler.sent().is_empty());
        assert!(fx.layout.read_push_id().is_none());
        assert_eq!(fx.sidecar_entries(), before);
    }

    #[tokio::test]
    async fn test_sync_failure_fails_push_without_signal() {
        init_test_logging();
        let fx = Fixture::new(23);
        let request = PushRequest::new("p2")
            .with_batch(vec![1; 8])
            .with_environment(env(&[("A", "1")]));

        let response = fx.engine().apply(&request).await;

        assert_eq!(response.status(), PushStatus::Failed);
        assert!(response.error_message.contains("rsync exited"));
        assert!(response.error_message.contains("some error"));
        assert!(fx.signaler.sent().is_empty());
        assert!(!fx.layout.env_file().exists());
        assert!(fx.layout.read_push_id().is_none());
        assert!(!fx.sidecar_entries().iter().any(|n| n.starts_with("sync_batch_")));
    }

    #[tokio::test]
    async fn test_environment_only_push_replaces_and_signals() {
        let fx = Fixture::new(0);
        let engine = fx.engine();

        engine
            .apply(&PushRequest::new("e1").with_environment(env(&[("A", "1")])))
            .await;
        let response = engine
            .apply(&PushRequest::new("e2").with_environment(env(&[("B", "2")])))
            .await;

        assert_eq!(response.status(), PushStatus::Completed);
        assert_eq!(
            std::fs::read_to_string(fx.layout.env_file()).unwrap(),
            "export B=2\n"
        );
        assert!(fx.rsync_log().is_empty());
        assert_eq!(fx.signaler.sent().len(), 2);
        assert_eq!(fx.layout.read_push_id().as_deref(), Some("e2"));
    }

    #[tokio::test]
    async fn test_empty_environment_map_clears_file() {
        let fx = Fixture::new(0);
        let engine = fx.engine();
        engine
            .apply(&PushRequest::new("e1").with_environment(env(&[("A", "1")])))
            .await;

        let response = engine
            .apply(&PushRequest::new("e2").with_environment(env(&[])))
            .await;

        assert_eq!(response.status(), PushStatus::Completed);
        assert_eq!(std::fs::read_to_string(fx.layout.env_file()).unwrap(), "");
    }

    #[tokio::test]
    async fn test_invalid_env_name_fails_push() {
        let fx = Fixture::new(0);
        let response = fx
            .engine()
            .apply(&PushRequest::new("bad").with_environment(env(&[("NOT-VALID", "x")])))
            .await;

        assert_eq!(response.status(), PushStatus::Failed);
        assert!(response.error_message.contains("NOT-VALID"));
        assert!(fx.signaler.sent().is_empty());
    }

    #[tokio::test]
    async fn test_signal_failure_fails_push_after_files_updated() {
        let mut fx = Fixture::new(0);
        fx.signaler = Arc::new(RecordingSignaler {
            fail: true,
            ..Default::default()
        });

        let response = fx
            .engine()
            .apply(&PushRequest::new("p3").with_batch(vec![1; 4]))
            .await;

        assert_eq!(response.status(), PushStatus::Failed);
        assert!(response.error_message.contains("launcher was not signalled"));
        assert_eq!(fx.layout.read_push_id().as_deref(), Some("p3"));
    }

    #[tokio::test]
    async fn test_missing_launcher_pid_fails_push() {
        let fx = Fixture::new(0);
        std::fs::remove_file(fx.layout.launcher_pid_file()).unwrap();

        let response = fx
            .engine()
            .apply(&PushRequest::new("p4").with_batch(vec![1; 4]))
            .await;

        assert_eq!(response.status(), PushStatus::Failed);
        assert!(response.error_message.contains("launcher.pid"));
    }

    fn branch_update() -> DatabaseBranchUpdate {
        DatabaseBranchUpdate {
            database_name: "main".to_string(),
            previous_branch_id: "br-old".to_string(),
            new_branch_id: "br-new".to_string(),
            branch_created: true,
            parent_branch_id: "br-old".to_string(),
        }
    }

    #[tokio::test]
    async fn test_database_refresh_writes_fragment_and_signals() {
        let fx = Fixture::new(0);
        let response = fx
            .engine()
            .apply(&PushRequest::new("db1").with_database_updates(vec![branch_update()]))
            .await;

        assert_eq!(response.status(), PushStatus::Completed);
        assert_eq!(fx.provider.call_count(), 1);
        assert!(
            std::fs::read_to_string(fx.layout.database_env_file())
                .unwrap()
                .contains("DATABASE_URL")
        );
        assert_eq!(fx.signaler.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_database_refresh_failure_is_not_fatal() {
        init_test_logging();
        let mut fx = Fixture::new(0);
        fx.provider = Arc::new(FakeProvider::failing("connection refused"));

        let request = PushRequest::new("db2")
            .with_database_updates(vec![branch_update()])
            .with_batch(vec![1; 4]);
        let response = fx.engine().apply(&request).await;

        assert_eq!(response.status(), PushStatus::Completed);
        assert!(fx.rsync_log().contains("batch 4"));
        assert_eq!(fx.signaler.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_database_refresh_alone_does_not_signal() {
        let mut fx = Fixture::new(0);
        fx.provider = Arc::new(FakeProvider::failing("timeout"));

        let response = fx
            .engine()
            .apply(&PushRequest::new("db3").with_database_updates(vec![branch_update()]))
            .await;

        assert_eq!(response.status(), PushStatus::Completed);
        assert!(fx.signaler.sent().is_empty());
        assert!(fx.layout.read_push_id().is_none());
    }

    #[test]
    fn test_step_policy() {
        assert!(!Step::DatabaseRefresh.fatal());
        for step in [
            Step::ApplyBatch,
            Step::WriteEnvironment,
            Step::RecordPushId,
            Step::SignalLauncher,
        ] {
            assert!(step.fatal(), "{} should be fatal", step.as_str());
        }
    }
}
