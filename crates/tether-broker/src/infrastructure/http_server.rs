//! HTTP server: attach routes, the status endpoint, and the serve loop.
//!
//! | Route                     | Purpose                               |
//! |---------------------------|---------------------------------------|
//! | `GET /attach/{id}/master` | master attach (WebSocket upgrade)     |
//! | `GET /attach/{id}/slave`  | slave attach (WebSocket upgrade)      |
//! | `GET /status`             | live-session diagnostics as JSON      |
//!
//! Attach preconditions are checked before the upgrade is accepted, so a
//! refused attach is an ordinary HTTP error with a JSON body
//! `{"error": "<message>"}`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use tether_core::StatusSummary;

use crate::application::attach::{self, AttachError};
use crate::application::control::{Control, ControlError};
use crate::application::session::{Role, Session};
use crate::infrastructure::ws_link;

// ── Errors ────────────────────────────────────────────────────────────────────

impl AttachError {
    /// HTTP status for this refusal.
    pub fn status(&self) -> StatusCode {
        match self {
            AttachError::MissingId(_) | AttachError::NotUpgrade => StatusCode::BAD_REQUEST,
            AttachError::UnknownSession(_) => StatusCode::NOT_FOUND,
            AttachError::SlaveAlreadyAttached(_)
            | AttachError::NotWaitingForSlave { .. }
            | AttachError::Control(ControlError::SessionExists(_)) => StatusCode::CONFLICT,
            AttachError::Control(ControlError::Directory(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AttachError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AttachError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("attach failed: {self}");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// State shared by every handler.
#[derive(Clone)]
pub struct ServerState {
    pub control: Arc<Control>,
    /// Close-handshake limit handed to every socket adapter.
    pub close_timeout: Duration,
}

impl ServerState {
    pub fn new(control: Arc<Control>, close_timeout: Duration) -> Self {
        Self {
            control,
            close_timeout,
        }
    }
}

/// Builds the broker's router around a shared [`Control`].
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/attach/{id}/master", get(attach_master))
        .route("/attach/{id}/slave", get(attach_slave))
        .route("/status", get(status))
        .with_state(state)
}

async fn attach_master(
    State(state): State<ServerState>,
    Path(raw_id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AttachError> {
    let id = attach::parse_id(&raw_id)?;
    let ws = ws.map_err(|_| AttachError::NotUpgrade)?;
    let session = attach::prepare_master(&state.control, &id).await?;

    let failed = Arc::clone(&session);
    let close_timeout = state.close_timeout;
    Ok(ws
        .on_failed_upgrade(move |e| abandon_after_failed_upgrade(&failed, &e))
        .on_upgrade(move |socket| async move {
            let link = ws_link::spawn(socket, id, Role::Master, close_timeout);
            // Failures are logged and the session abandoned inside.
            let _ = attach::complete_master(&session, link);
        }))
}

/// A master whose handshake broke after its claim was granted never gets a
/// connection, so its session is torn down and the claim released.
fn abandon_after_failed_upgrade(session: &Session, err: &axum::Error) {
    warn!(session_id = %session.id(), "master upgrade failed: {err}");
    session.abandon();
}

async fn attach_slave(
    State(state): State<ServerState>,
    Path(raw_id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AttachError> {
    let id = attach::parse_id(&raw_id)?;
    let ws = ws.map_err(|_| AttachError::NotUpgrade)?;
    let session = attach::prepare_slave(&state.control, &id)?;

    let close_timeout = state.close_timeout;
    Ok(ws.on_upgrade(move |socket| async move {
        let link = ws_link::spawn(socket, id, Role::Slave, close_timeout);
        let _ = attach::complete_slave(&session, link);
    }))
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
struct StatusBody {
    health: &'static str,
    sessions: StatusSummary,
}

async fn status(State(state): State<ServerState>) -> Json<StatusBody> {
    Json(StatusBody {
        health: "ok",
        sessions: state.control.status_summary(),
    })
}

// ── Serve loop ────────────────────────────────────────────────────────────────

/// Binds `bind_addr` and serves until Ctrl+C.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server(bind_addr: SocketAddr, state: ServerState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {bind_addr}"))?;
    serve(listener, state, shutdown_signal()).await
}

/// Serves on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: ServerState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .context("listener has no local address")?;
    info!("tether broker listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C; shutting down"),
        Err(e) => {
            // Without a signal handler, run until killed.
            error!("failed to listen for Ctrl+C signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
