//! Shared building blocks for the Code Sync relay, sidecar and launcher.
//!
//! - [`codec`]: wire envelope and typed payloads
//! - [`transport`]: framed, authenticated bidirectional connection
//! - [`route`]: `(app_id, deployment_id)` addressing
//! - [`control`]: shared-volume control directory layout
//! - [`rsync`]: file-sync utility driver
//! - [`process`]: process records and signal delivery

pub mod codec;
pub mod config;
pub mod control;
pub mod errors;
pub mod logging;
pub mod process;
pub mod route;
pub mod rsync;
pub mod testing;
pub mod transport;
pub mod util;

pub use codec::{
    CodecError, DatabaseBranchUpdate, Envelope, EnvironmentSet, MessageKind, Payload,
    PushRequest, PushResponse, PushStatus,
};
pub use config::{ConfigSource, EnvError, EnvParser, Sourced};
pub use control::ControlLayout;
pub use errors::ErrorCategory;
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use process::{KillCommandSignaler, ProcessRecord, ProcessSignaler, Signal, SignalError};
pub use route::{RouteKey, RouteKeyError};
pub use rsync::{Rsync, SyncError};
pub use transport::{Connection, Frame, Inbound, TransportError};

/// HTTP header carrying the pre-shared key on connection upgrade
/// (`X-Api-Key`; lowercase so it can be used as a static header name).
pub const API_KEY_HEADER: &str = "x-api-key";

/// Crate version shared by every binary in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
