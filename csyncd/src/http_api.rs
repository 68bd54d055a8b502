//! HTTP surface of the relay.
//!
//! Provides:
//! - `/health` - liveness with registry counters
//! - `/api/v1/push/sidecar/{app_id}/{deployment_id}` - sidecar WebSocket
//! - `/api/v1/push/ide/{app_id}/{deployment_id}` - editor WebSocket
//! - `/api/v1/push/ide/{app_id}/{deployment_id}/ready` - whether a sidecar is registered

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use csync_common::codec::{Envelope, Payload};
use csync_common::transport::{CLOSE_POLICY_VIOLATION, CloseReason, Connection, Inbound};
use csync_common::util::constant_time_eq;
use csync_common::{API_KEY_HEADER, RouteKey};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::router::RelayRouter;
use crate::ws::into_connection;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub router: RelayRouter,
    api_key: String,
    auth_timeout: Duration,
    /// Relay version.
    pub version: &'static str,
    /// Relay start time.
    pub started_at: Instant,
    /// Relay PID.
    pub pid: u32,
}

impl HttpState {
    pub fn new(router: RelayRouter, config: &RelayConfig) -> Self {
        Self {
            router,
            api_key: config.api_key.clone(),
            auth_timeout: config.auth_timeout,
            version: csync_common::VERSION,
            started_at: Instant::now(),
            pid: std::process::id(),
        }
    }

    fn key_matches(&self, presented: &str) -> bool {
        constant_time_eq(presented.as_bytes(), self.api_key.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Sidecar,
    Editor,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sidecar => "sidecar",
            Self::Editor => "editor",
        }
    }
}

/// How a request identified itself.
enum HeaderAuth {
    Accepted,
    Absent,
    Rejected,
}

fn header_auth(state: &HttpState, headers: &HeaderMap) -> HeaderAuth {
    match headers.get(API_KEY_HEADER) {
        None => HeaderAuth::Absent,
        Some(value) => match value.to_str() {
            Ok(key) if state.key_matches(key) => HeaderAuth::Accepted,
            _ => HeaderAuth::Rejected,
        },
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "invalid or missing API key" })),
    )
        .into_response()
}

/// Create the relay router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/v1/push/sidecar/{app_id}/{deployment_id}",
            get(sidecar_handler),
        )
        .route("/api/v1/push/ide/{app_id}/{deployment_id}", get(editor_handler))
        .route(
            "/api/v1/push/ide/{app_id}/{deployment_id}/ready",
            get(ready_handler),
        )
        .with_state(Arc::new(state))
}

/// Handler for `/health`.
async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let stats = state.router.stats();
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "pid": state.pid,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "sidecars": stats.sidecars,
        "pending_pushes": stats.pending_pushes,
    }))
}

/// Handler for `/ready`: is a sidecar registered for the key?
async fn ready_handler(
    State(state): State<Arc<HttpState>>,
    Path((app_id, deployment_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !matches!(header_auth(&state, &headers), HeaderAuth::Accepted) {
        return unauthorized();
    }
    match RouteKey::new(app_id, deployment_id) {
        Ok(key) => Json(json!({ "ready": state.router.is_registered(&key) })).into_response(),
        Err(e) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn sidecar_handler(
    State(state): State<Arc<HttpState>>,
    Path((app_id, deployment_id)): Path<(String, String)>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(state, Role::Sidecar, app_id, deployment_id, headers, ws)
}

async fn editor_handler(
    State(state): State<Arc<HttpState>>,
    Path((app_id, deployment_id)): Path<(String, String)>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(state, Role::Editor, app_id, deployment_id, headers, ws)
}

fn upgrade(
    state: Arc<HttpState>,
    role: Role,
    app_id: String,
    deployment_id: String,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let key = match RouteKey::new(app_id, deployment_id) {
        Ok(key) => key,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
                .into_response();
        }
    };

    let pre_authenticated = match header_auth(&state, &headers) {
        HeaderAuth::Accepted => true,
        HeaderAuth::Absent => false,
        HeaderAuth::Rejected => {
            warn!(%key, role = role.as_str(), "rejected connection with invalid API key");
            return unauthorized();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        let mut conn = into_connection(socket);
        if !pre_authenticated && !authenticate_first_frame(&state, &mut conn).await {
            return;
        }
        debug!(%key, role = role.as_str(), "connection admitted");
        match role {
            Role::Sidecar => state.router.serve_sidecar(key, conn).await,
            Role::Editor => state.router.serve_editor(key, conn).await,
        }
    })
}

/// Require an `AUTH_REQUEST` carrying the key as the first frame.
async fn authenticate_first_frame(state: &HttpState, conn: &mut Connection) -> bool {
    let rejection = match conn.recv(Some(state.auth_timeout)).await {
        Ok(Inbound::Envelope(Envelope {
            payload: Some(Payload::AuthRequest(request)),
            ..
        })) => {
            if state.key_matches(&request.api_key) {
                info!(client = %request.client_name, "authenticated by first frame");
                return conn.send(&Envelope::auth_response(true, "")).await.is_ok();
            }
            "invalid API key"
        }
        Ok(Inbound::Closed(_)) => return false,
        Ok(_) => "expected AUTH_REQUEST as first frame",
        Err(e) => {
            debug!(error = %e, "no authentication frame");
            "no AUTH_REQUEST received"
        }
    };

    warn!(reason = rejection, "rejecting unauthenticated connection");
    let _ = conn.send(&Envelope::auth_response(false, rejection)).await;
    let _ = conn
        .close(CloseReason::new(CLOSE_POLICY_VIOLATION, rejection))
        .await;
    false
}
