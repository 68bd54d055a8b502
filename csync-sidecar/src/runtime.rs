//! Sidecar connection state machine.
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected` until stopped,
//! then `Stopping -> Stopped`. One connection at a time; frames on it are
//! handled strictly in order, so at most one push is applied at once.

use crate::engine::Engine;
use csync_common::codec::{Envelope, Payload};
use csync_common::errors::Categorized;
use csync_common::transport::{CloseReason, Connection, Inbound, TransportError, connect};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Disconnected,
    Connecting,
    Connected,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Full WebSocket URL of this sidecar's relay endpoint.
    pub url: Url,
    pub api_key: String,
    pub backoff: Duration,
    pub idle_timeout: Duration,
    pub dial_timeout: Duration,
}

struct Shared {
    stop_tx: watch::Sender<bool>,
    state_tx: watch::Sender<RuntimeState>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn set_state(&self, state: RuntimeState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "sidecar state changed");
        }
    }

    fn record_error(&self, error: String) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

/// Controls a running [`SidecarRuntime`] from any task.
#[derive(Clone)]
pub struct RuntimeHandle {
    shared: Arc<Shared>,
}

impl RuntimeHandle {
    pub fn state(&self) -> RuntimeState {
        *self.shared.state_tx.borrow()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Request shutdown and wait until the run loop has stopped.
    ///
    /// Idempotent. A live connection is closed with a normal closure.
    pub async fn stop(&self) {
        if !self.shared.stop_tx.send_replace(true) {
            info!("stopping sidecar runtime");
        }
        let mut state = self.shared.state_tx.subscribe();
        let _ = state.wait_for(|s| *s == RuntimeState::Stopped).await;
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Stopped,
    Lost(String),
}

/// One authenticated connection to the relay.
struct Session {
    conn: Connection,
    connected_at: Instant,
    pushes: u64,
}

pub struct SidecarRuntime {
    options: RuntimeOptions,
    engine: Arc<Engine>,
    shared: Arc<Shared>,
}

async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

impl SidecarRuntime {
    pub fn new(options: RuntimeOptions, engine: Arc<Engine>) -> (Self, RuntimeHandle) {
        let (stop_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(RuntimeState::Disconnected);
        let shared = Arc::new(Shared {
            stop_tx,
            state_tx,
            last_error: Mutex::new(None),
        });
        let handle = RuntimeHandle {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                options,
                engine,
                shared,
            },
            handle,
        )
    }

    /// Connect, serve, reconnect. Returns once stopped.
    pub async fn run(self) {
        let mut stop_rx = self.shared.stop_tx.subscribe();

        loop {
            if *stop_rx.borrow() {
                break;
            }

            self.shared.set_state(RuntimeState::Connecting);
            let dial = connect(&self.options.url, &self.options.api_key, self.options.dial_timeout);
            let dialed = tokio::select! {
                dialed = dial => dialed,
                _ = stop_requested(&mut stop_rx) => break,
            };

            match dialed {
                Ok(conn) => {
                    self.shared.set_state(RuntimeState::Connected);
                    info!(url = %self.options.url, "connected to relay");
                    let session = Session {
                        conn,
                        connected_at: Instant::now(),
                        pushes: 0,
                    };
                    match self.serve(session, &mut stop_rx).await {
                        SessionEnd::Stopped => break,
                        SessionEnd::Lost(reason) => {
                            warn!(reason = %reason, "connection to relay lost");
                            self.shared.record_error(reason);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        url = %self.options.url,
                        error = %e,
                        category = %e.category(),
                        "failed to connect to relay"
                    );
                    self.shared.record_error(e.to_string());
                }
            }

            self.shared.set_state(RuntimeState::Disconnected);
            info!(
                backoff_ms = self.options.backoff.as_millis() as u64,
                "reconnecting after backoff"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.options.backoff) => {}
                _ = stop_requested(&mut stop_rx) => break,
            }
        }

        self.shared.set_state(RuntimeState::Stopping);
        self.shared.set_state(RuntimeState::Stopped);
        info!("sidecar runtime stopped");
    }

    async fn serve(&self, mut session: Session, stop_rx: &mut watch::Receiver<bool>) -> SessionEnd {
        let end = loop {
            let inbound = tokio::select! {
                inbound = session.conn.recv(Some(self.options.idle_timeout)) => inbound,
                _ = stop_requested(stop_rx) => {
                    self.shared.set_state(RuntimeState::Stopping);
                    if let Err(e) = session.conn.close(CloseReason::normal()).await {
                        debug!(error = %e, "close handshake failed");
                    }
                    break SessionEnd::Stopped;
                }
            };

            match inbound {
                Ok(Inbound::Envelope(envelope)) => {
                    if let Err(e) = self.handle(&mut session, envelope).await {
                        break SessionEnd::Lost(e.to_string());
                    }
                }
                Ok(Inbound::Invalid(e)) => {
                    warn!(error = %e, "discarding malformed frame from relay");
                }
                Ok(Inbound::Ping(_)) => {}
                Ok(Inbound::Closed(reason)) => {
                    let reason = match reason {
                        Some(r) => format!("relay closed connection ({} {})", r.code, r.reason),
                        None => "relay closed connection".to_string(),
                    };
                    break SessionEnd::Lost(reason);
                }
                Err(e) => break SessionEnd::Lost(e.to_string()),
            }
        };

        debug!(
            pushes = session.pushes,
            connected_secs = session.connected_at.elapsed().as_secs(),
            "session ended"
        );
        end
    }

    async fn handle(
        &self,
        session: &mut Session,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        let kind = envelope.kind();
        match envelope.payload {
            Some(Payload::PushRequest(request)) => {
                info!(
                    push_id = %request.push_id,
                    batch_bytes = request.batch_file.len(),
                    has_environment = request.environment.is_some(),
                    database_updates = request.database_branch_updates.len(),
                    description = %request.change_description,
                    "received push"
                );
                let response = self.engine.apply(&request).await;
                session.pushes += 1;
                session.conn.send(&Envelope::push_response(response)).await
            }
            Some(Payload::VerificationProgressResponse(ack)) => {
                debug!(
                    push_id = %ack.push_id,
                    acknowledged = ack.acknowledged,
                    "verification acknowledged"
                );
                Ok(())
            }
            _ => {
                warn!(kind = %kind, "unexpected message from relay, ignoring");
                Ok(())
            }
        }
    }
}
