//! Per-test outcome records and the shared JSON trace used on CI.
//!
//! With `CSYNC_TEST_LOGGING=1` (or `CI` set) every [`TestGuard`] appends a
//! start line and an outcome line to `<target>/test-logs/<test>.jsonl`, and
//! all tracing output of the run lands in `<target>/test-logs/trace.jsonl`.

use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;
use tracing_subscriber::prelude::*;

const CRATES: [&str; 4] = ["csync_common", "csyncd", "csync_sidecar", "csync_launcher"];

static TRACE_INIT: Once = Once::new();

/// Install a global subscriber that mirrors every event as JSON into the
/// trace file and as compact lines into the test writer.
///
/// `CSYNC_TEST_LOG_LEVEL` picks the level for workspace crates (`info`).
/// `CSYNC_TEST_LOG_FILE` overrides the trace file location.
pub fn init_global_test_logging() {
    TRACE_INIT.call_once(|| {
        let level = std::env::var("CSYNC_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".into());
        let directives = CRATES.map(|c| format!("{c}={level}")).join(",");
        let filter = tracing_subscriber::EnvFilter::try_new(directives)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let trace = trace_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_file(true)
                .with_line_number(true)
        });

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(trace)
            .with(tracing_subscriber::fmt::layer().with_test_writer().compact());
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn trace_file() -> Option<File> {
    let path = match std::env::var_os("CSYNC_TEST_LOG_FILE") {
        Some(path) => PathBuf::from(path),
        None => log_dir().join("trace.jsonl"),
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    File::create(path).ok()
}

fn log_dir() -> PathBuf {
    let target = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .or_else(|| {
            let cwd = std::env::current_dir().ok()?;
            cwd.ancestors()
                .map(|dir| dir.join("target"))
                .find(|dir| dir.is_dir())
        })
        .unwrap_or_else(|| PathBuf::from("target"));
    target.join("test-logs")
}

#[derive(Debug, Serialize)]
struct Record<'a> {
    at: String,
    test: &'a str,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

struct Recording {
    test: String,
    started: Instant,
    file: Option<File>,
}

impl Recording {
    fn open(test: &str) -> Self {
        let dir = log_dir();
        let file = std::fs::create_dir_all(&dir).ok().and_then(|()| {
            let name = test.replace("::", "_").replace(['/', '\\'], "_");
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(format!("{name}.jsonl")))
                .ok()
        });
        Self {
            test: test.to_string(),
            started: Instant::now(),
            file,
        }
    }

    fn write(&mut self, event: &str, note: Option<&str>) {
        let elapsed_ms = Some(self.started.elapsed().as_millis() as u64);
        tracing::info!(test = %self.test, elapsed_ms, "{event}");
        let record = Record {
            at: chrono::Utc::now().to_rfc3339(),
            test: &self.test,
            event,
            elapsed_ms,
            note,
        };
        if let (Some(file), Ok(line)) = (self.file.as_mut(), serde_json::to_string(&record)) {
            let _ = writeln!(file, "{line}");
        }
    }
}

/// Records `start` on creation and `pass` or `fail` on drop.
///
/// A no-op unless `CSYNC_TEST_LOGGING` is `1`/`true`, or `CI` is set and
/// `CSYNC_TEST_LOGGING` is not `0`/`false`.
pub struct TestGuard {
    recording: Option<Recording>,
}

impl TestGuard {
    pub fn new(test: &str) -> Self {
        let recording = Self::enabled().then(|| {
            init_global_test_logging();
            let mut recording = Recording::open(test);
            recording.write("start", None);
            recording
        });
        Self { recording }
    }

    fn enabled() -> bool {
        match std::env::var("CSYNC_TEST_LOGGING").as_deref() {
            Ok("1" | "true") => true,
            Ok("0" | "false") => false,
            _ => std::env::var_os("CI").is_some(),
        }
    }

    /// Append a free-form checkpoint to this test's record.
    pub fn note(&mut self, note: &str) {
        if let Some(recording) = self.recording.as_mut() {
            recording.write("note", Some(note));
        }
    }
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        if let Some(mut recording) = self.recording.take() {
            if std::thread::panicking() {
                recording.write("fail", Some("panicked"));
            } else {
                recording.write("pass", None);
            }
        }
    }
}

/// Create a [`TestGuard`] named after the enclosing function.
///
/// Only meaningful in synchronous tests; inside an `async fn` the name
/// resolves to the generated closure.
#[macro_export]
macro_rules! test_guard {
    () => {{
        fn _here() {}
        fn _name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let path = _name_of(_here);
        let path = path.strip_suffix("::_here").unwrap_or(path);
        $crate::testing::TestGuard::new(path.rsplit("::").next().unwrap_or(path))
    }};
}
