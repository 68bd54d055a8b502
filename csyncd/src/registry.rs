//! Live sidecar connections and in-flight pushes.
//!
//! All mutation goes through one mutex. Nothing awaits while holding it:
//! callers get back channel handles and do their sends after the guard drops.

use csync_common::RouteKey;
use csync_common::codec::Envelope;
use csync_common::errors::{Categorized, ErrorCategory};
use csync_common::transport::CloseReason;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub type ConnId = u64;

/// Work for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Envelope(Envelope),
    Close(CloseReason),
}

pub type OutboundTx = mpsc::UnboundedSender<Outbound>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("sidecar unreachable: no sidecar connected for {0}")]
    Unreachable(RouteKey),

    #[error("push {0} is already in flight")]
    Duplicate(String),
}

impl Categorized for RouteError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Routing
    }
}

struct SidecarEntry {
    conn_id: ConnId,
    tx: OutboundTx,
}

/// Tracking for one forwarded push.
pub struct PendingPush {
    pub key: RouteKey,
    pub editor_conn: ConnId,
    pub editor_tx: OutboundTx,
    pub sidecar_conn: ConnId,
    pub started_at: Instant,
    ticket: u64,
    timer: Option<AbortHandle>,
}

impl PendingPush {
    /// Stop the response timer, if one was attached.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Result of registering a sidecar.
pub struct Registration {
    /// Writer of the connection that was superseded.
    pub replaced: Option<OutboundTx>,
    /// Pushes that were waiting on the superseded connection.
    pub orphaned: Vec<(String, PendingPush)>,
}

#[derive(Default)]
struct State {
    sidecars: HashMap<RouteKey, SidecarEntry>,
    pending: HashMap<String, PendingPush>,
}

impl State {
    fn take_pending_where(
        &mut self,
        pred: impl Fn(&PendingPush) -> bool,
    ) -> Vec<(String, PendingPush)> {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| pred(p))
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|mut p| {
                p.cancel_timer();
                (id, p)
            }))
            .collect()
    }
}

#[derive(Default)]
pub struct Registry {
    state: Mutex<State>,
    next_conn_id: AtomicU64,
    next_ticket: AtomicU64,
}

/// Registry counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub sidecars: usize,
    pub pending_pushes: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Make `conn_id` the sidecar for `key`, superseding any previous one.
    pub fn register_sidecar(&self, key: RouteKey, conn_id: ConnId, tx: OutboundTx) -> Registration {
        let mut state = self.lock();
        let replaced = state.sidecars.insert(key, SidecarEntry { conn_id, tx });
        match replaced {
            Some(old) => {
                let old_conn = old.conn_id;
                let orphaned = state.take_pending_where(|p| p.sidecar_conn == old_conn);
                Registration {
                    replaced: Some(old.tx),
                    orphaned,
                }
            }
            None => Registration {
                replaced: None,
                orphaned: Vec::new(),
            },
        }
    }

    /// Remove the sidecar for `key` if it is still `conn_id`.
    ///
    /// Returns the pushes that were waiting on it, or `None` when a newer
    /// connection already took over the key.
    pub fn unregister_sidecar(
        &self,
        key: &RouteKey,
        conn_id: ConnId,
    ) -> Option<Vec<(String, PendingPush)>> {
        let mut state = self.lock();
        match state.sidecars.get(key) {
            Some(entry) if entry.conn_id == conn_id => {
                state.sidecars.remove(key);
                Some(state.take_pending_where(|p| p.sidecar_conn == conn_id))
            }
            _ => None,
        }
    }

    pub fn is_registered(&self, key: &RouteKey) -> bool {
        self.lock().sidecars.contains_key(key)
    }

    pub fn sidecar_tx(&self, key: &RouteKey) -> Option<OutboundTx> {
        self.lock().sidecars.get(key).map(|entry| entry.tx.clone())
    }

    /// Start tracking a push and hand back the sidecar to forward it to.
    pub fn begin_push(
        &self,
        key: &RouteKey,
        push_id: &str,
        editor_conn: ConnId,
        editor_tx: OutboundTx,
    ) -> Result<(u64, OutboundTx), RouteError> {
        let mut state = self.lock();
        let (sidecar_conn, sidecar_tx) = match state.sidecars.get(key) {
            Some(entry) => (entry.conn_id, entry.tx.clone()),
            None => return Err(RouteError::Unreachable(key.clone())),
        };
        if state.pending.contains_key(push_id) {
            return Err(RouteError::Duplicate(push_id.to_string()));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        state.pending.insert(
            push_id.to_string(),
            PendingPush {
                key: key.clone(),
                editor_conn,
                editor_tx,
                sidecar_conn,
                started_at: Instant::now(),
                ticket,
                timer: None,
            },
        );
        Ok((ticket, sidecar_tx))
    }

    /// Attach the timeout task to a push that is still pending.
    ///
    /// If the push already finished, the timer is aborted right away.
    pub fn attach_timer(&self, push_id: &str, ticket: u64, timer: AbortHandle) {
        let mut state = self.lock();
        match state.pending.get_mut(push_id) {
            Some(pending) if pending.ticket == ticket => pending.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Release tracking for a terminal response from `sidecar_conn`.
    pub fn complete_push(&self, push_id: &str, sidecar_conn: ConnId) -> Option<PendingPush> {
        let mut state = self.lock();
        match state.pending.get(push_id) {
            Some(pending) if pending.sidecar_conn == sidecar_conn => {
                state.pending.remove(push_id).map(|mut p| {
                    p.cancel_timer();
                    p
                })
            }
            _ => None,
        }
    }

    /// Editor for a non-terminal frame; tracking is kept.
    pub fn editor_for(&self, push_id: &str, sidecar_conn: ConnId) -> Option<OutboundTx> {
        self.lock()
            .pending
            .get(push_id)
            .filter(|p| p.sidecar_conn == sidecar_conn)
            .map(|p| p.editor_tx.clone())
    }

    /// Release tracking for a push whose ticket matches, whatever its state.
    ///
    /// Used by the timeout and by failed forwards.
    pub fn abandon_push(&self, push_id: &str, ticket: u64) -> Option<PendingPush> {
        let mut state = self.lock();
        match state.pending.get(push_id) {
            Some(pending) if pending.ticket == ticket => state.pending.remove(push_id),
            _ => None,
        }
    }

    /// Forget every push the editor connection was waiting on.
    pub fn editor_disconnected(&self, editor_conn: ConnId) -> usize {
        self.lock()
            .take_pending_where(|p| p.editor_conn == editor_conn)
            .len()
    }

    /// Empty the registry for shutdown.
    pub fn drain(&self) -> (Vec<OutboundTx>, Vec<(String, PendingPush)>) {
        let mut state = self.lock();
        let sidecars = state.sidecars.drain().map(|(_, entry)| entry.tx).collect();
        let pending = state.take_pending_where(|_| true);
        (sidecars, pending)
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.lock();
        RegistryStats {
            sidecars: state.sidecars.len(),
            pending_pushes: state.pending.len(),
        }
    }
}
