//! Pairs editor and sidecar connections by route key and relays messages.
//!
//! Every connection gets a reader loop (the `serve_*` future) and a writer
//! task fed by an unbounded channel, so routing never awaits a slow peer
//! while the registry lock is held.

use crate::registry::{
    ConnId, Outbound, OutboundTx, PendingPush, Registry, RegistryStats, RouteError,
};
use csync_common::RouteKey;
use csync_common::codec::{Envelope, MessageKind, Payload, PushResponse};
use csync_common::errors::Categorized;
use csync_common::transport::{
    CLOSE_GOING_AWAY, CloseReason, Connection, ConnectionReader, ConnectionWriter, Inbound,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const SIDECAR_GONE: &str = "sidecar disconnected before responding";

#[derive(Clone)]
pub struct RelayRouter {
    registry: Arc<Registry>,
    response_timeout: Duration,
    keepalive: Duration,
}

fn failed(push_id: &str, error: impl Into<String>) -> Outbound {
    Outbound::Envelope(Envelope::push_response(PushResponse::failed(push_id, error)))
}

async fn write_loop(
    mut writer: ConnectionWriter,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    keepalive: Duration,
) {
    let mut ticker = tokio::time::interval(keepalive);
    ticker.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Outbound::Envelope(envelope)) => {
                    if let Err(e) = writer.send(&envelope).await {
                        debug!(error = %e, "write failed, stopping writer");
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    let _ = writer.close(reason).await;
                    break;
                }
                None => {
                    let _ = writer.close(CloseReason::normal()).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if writer.ping().await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Reader side of a served connection.
struct Served {
    conn_id: ConnId,
    tx: OutboundTx,
    reader: ConnectionReader,
    writer_task: JoinHandle<()>,
    writer_done: bool,
}

impl Served {
    /// Next inbound frame, or `None` once the peer or our writer is gone.
    async fn next(&mut self) -> Option<Inbound> {
        if self.writer_done {
            return None;
        }
        tokio::select! {
            inbound = self.reader.recv(None) => match inbound {
                Ok(Inbound::Closed(_)) => None,
                Ok(other) => Some(other),
                Err(e) => {
                    debug!(
                        conn_id = self.conn_id,
                        error = %e,
                        category = %e.category(),
                        "read failed"
                    );
                    None
                }
            },
            _ = &mut self.writer_task => {
                self.writer_done = true;
                None
            }
        }
    }

    async fn finish(self) {
        drop(self.tx);
        if !self.writer_done {
            let _ = self.writer_task.await;
        }
    }
}

impl RelayRouter {
    pub fn new(response_timeout: Duration, keepalive: Duration) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            response_timeout,
            keepalive,
        }
    }

    pub fn is_registered(&self, key: &RouteKey) -> bool {
        self.registry.is_registered(key)
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    fn spawn_served(&self, conn: Connection) -> Served {
        let conn_id = self.registry.next_conn_id();
        let (writer, reader) = conn.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(writer, rx, self.keepalive));
        Served {
            conn_id,
            tx,
            reader,
            writer_task,
            writer_done: false,
        }
    }

    fn fail_orphans(orphans: Vec<(String, PendingPush)>, reason: &str) {
        for (push_id, pending) in orphans {
            warn!(push_id = %push_id, key = %pending.key, reason, "failing pending push");
            let _ = pending.editor_tx.send(failed(&push_id, reason));
        }
    }

    /// Serve a sidecar connection until it closes or is superseded.
    pub async fn serve_sidecar(&self, key: RouteKey, conn: Connection) {
        let mut served = self.spawn_served(conn);
        let conn_id = served.conn_id;

        let registration = self
            .registry
            .register_sidecar(key.clone(), conn_id, served.tx.clone());
        if let Some(old) = registration.replaced {
            info!(%key, conn_id, "sidecar superseded by new connection");
            let _ = old.send(Outbound::Close(CloseReason::new(
                CLOSE_GOING_AWAY,
                "superseded by a newer sidecar connection",
            )));
        }
        Self::fail_orphans(registration.orphaned, SIDECAR_GONE);
        info!(%key, conn_id, "sidecar registered");

        while let Some(inbound) = served.next().await {
            match inbound {
                Inbound::Envelope(envelope) => self.handle_sidecar_frame(&key, conn_id, envelope),
                Inbound::Invalid(e) => {
                    warn!(%key, conn_id, error = %e, "invalid frame from sidecar");
                }
                Inbound::Ping(_) | Inbound::Closed(_) => {}
            }
        }

        if let Some(orphans) = self.registry.unregister_sidecar(&key, conn_id) {
            info!(%key, conn_id, "sidecar disconnected");
            Self::fail_orphans(orphans, SIDECAR_GONE);
        }
        served.finish().await;
    }

    fn handle_sidecar_frame(&self, key: &RouteKey, conn_id: ConnId, envelope: Envelope) {
        match &envelope.payload {
            Some(Payload::PushResponse(response)) => {
                let push_id = response.push_id.clone();
                self.route_response(conn_id, &push_id, response.is_terminal(), envelope);
            }
            Some(Payload::VerificationProgress(progress)) => {
                let push_id = progress.push_id.clone();
                self.route_response(conn_id, &push_id, false, envelope);
            }
            _ => {
                warn!(
                    %key,
                    conn_id,
                    kind = %envelope.kind(),
                    "unexpected message from sidecar, ignoring"
                );
            }
        }
    }

    /// Deliver a sidecar's answer to the editor that sent the push.
    ///
    /// Terminal responses release tracking; unknown push ids are dropped.
    pub fn route_response(
        &self,
        sidecar_conn: ConnId,
        push_id: &str,
        terminal: bool,
        envelope: Envelope,
    ) {
        if terminal {
            match self.registry.complete_push(push_id, sidecar_conn) {
                Some(pending) => {
                    info!(
                        push_id,
                        key = %pending.key,
                        elapsed_ms = pending.started_at.elapsed().as_millis() as u64,
                        "push finished"
                    );
                    let _ = pending.editor_tx.send(Outbound::Envelope(envelope));
                }
                None => warn!(push_id, sidecar_conn, "response for unknown push, dropping"),
            }
            return;
        }

        match self.registry.editor_for(push_id, sidecar_conn) {
            Some(editor_tx) => {
                let _ = editor_tx.send(Outbound::Envelope(envelope));
            }
            None => debug!(push_id, kind = %envelope.kind(), "progress for unknown push, dropping"),
        }
    }

    /// Serve an editor-side publisher connection.
    pub async fn serve_editor(&self, key: RouteKey, conn: Connection) {
        let mut served = self.spawn_served(conn);
        let conn_id = served.conn_id;
        debug!(%key, conn_id, "editor connected");

        while let Some(inbound) = served.next().await {
            match inbound {
                Inbound::Envelope(envelope) => {
                    self.handle_editor_frame(&key, conn_id, &served.tx, envelope)
                }
                Inbound::Invalid(e) => {
                    // No push id to answer with; the editor's own timeout covers it.
                    warn!(%key, conn_id, error = %e, "invalid frame from editor, dropping");
                }
                Inbound::Ping(_) | Inbound::Closed(_) => {}
            }
        }

        let dropped = self.registry.editor_disconnected(conn_id);
        debug!(%key, conn_id, dropped_pushes = dropped, "editor disconnected");
        served.finish().await;
    }

    fn handle_editor_frame(
        &self,
        key: &RouteKey,
        conn_id: ConnId,
        tx: &OutboundTx,
        envelope: Envelope,
    ) {
        match envelope.kind() {
            MessageKind::PushRequest => self.route_push(key, conn_id, tx, envelope),
            MessageKind::VerificationProgressResponse => match self.registry.sidecar_tx(key) {
                Some(sidecar) => {
                    let _ = sidecar.send(Outbound::Envelope(envelope));
                }
                None => debug!(%key, "no sidecar for verification ack, dropping"),
            },
            other => {
                let push_id = envelope.push_id().unwrap_or_default().to_string();
                warn!(%key, conn_id, kind = %other, "unsupported message from editor");
                let _ = tx.send(failed(&push_id, format!("unsupported message kind {other}")));
            }
        }
    }

    /// Forward a push to the key's sidecar, or fail it immediately.
    pub fn route_push(
        &self,
        key: &RouteKey,
        editor_conn: ConnId,
        editor_tx: &OutboundTx,
        envelope: Envelope,
    ) {
        let push_id = envelope.push_id().unwrap_or_default().to_string();
        if push_id.is_empty() {
            let _ = editor_tx.send(failed("", "push_id is required"));
            return;
        }

        let (ticket, sidecar_tx) =
            match self
                .registry
                .begin_push(key, &push_id, editor_conn, editor_tx.clone())
            {
                Ok(route) => route,
                Err(e) => {
                    if matches!(e, RouteError::Unreachable(_)) {
                        info!(%key, push_id = %push_id, "no sidecar registered, failing push");
                    } else {
                        warn!(%key, push_id = %push_id, error = %e, "rejecting push");
                    }
                    let _ = editor_tx.send(failed(&push_id, e.to_string()));
                    return;
                }
            };

        if sidecar_tx.send(Outbound::Envelope(envelope)).is_err() {
            if let Some(pending) = self.registry.abandon_push(&push_id, ticket) {
                let _ = pending
                    .editor_tx
                    .send(failed(&push_id, RouteError::Unreachable(key.clone()).to_string()));
            }
            return;
        }
        info!(%key, push_id = %push_id, "push forwarded to sidecar");

        let registry = Arc::clone(&self.registry);
        let timeout = self.response_timeout;
        let timer_push_id = push_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(pending) = registry.abandon_push(&timer_push_id, ticket) {
                warn!(push_id = %timer_push_id, key = %pending.key, "sidecar response timed out");
                let _ = pending.editor_tx.send(failed(
                    &timer_push_id,
                    format!("sidecar did not respond within {}s", timeout.as_secs()),
                ));
            }
        });
        self.registry
            .attach_timer(&push_id, ticket, timer.abort_handle());
    }

    /// Close every sidecar and fail everything in flight.
    pub fn shutdown(&self) {
        let (sidecars, pending) = self.registry.drain();
        info!(
            sidecars = sidecars.len(),
            pending = pending.len(),
            "relay shutting down"
        );
        Self::fail_orphans(pending, "relay shutting down");
        for tx in sidecars {
            let _ = tx.send(Outbound::Close(CloseReason::new(
                CLOSE_GOING_AWAY,
                "relay shutting down",
            )));
        }
    }
}
