//! Execution gateway: the HTTP boundary in front of the session manager.
//!
//! Two operations do real work, `POST /execute` and `POST /restart`;
//! `GET /health` reports the published session state without touching the
//! execute gate. A restart that cannot bring a kernel back up is fatal: the
//! response still goes out, then the server shuts down.

use anyhow::{Context, Result};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::protocol::ExecutionResult;
use crate::sandbox::{SessionManager, SessionState};

/// Body of `POST /execute`. A missing `code` runs as empty source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExecuteBody {
    #[serde(default)]
    pub code: String,
}

/// Body returned by `POST /restart`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RestartResponse {
    pub status: String,
    pub message: String,
}

impl RestartResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Body returned by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct HealthResponse {
    pub status: String,
    pub state: SessionState,
    pub session_id: Option<String>,
}

/// Shared handler state.
#[derive(Clone)]
pub(crate) struct AppState {
    sessions: Arc<SessionManager>,
    fatal: Arc<watch::Sender<Option<String>>>,
}

impl AppState {
    /// Creates handler state and the receiver on which fatal failures are
    /// announced.
    pub fn new(sessions: Arc<SessionManager>) -> (Self, watch::Receiver<Option<String>>) {
        let (fatal, rx) = watch::channel(None);
        let state = Self {
            sessions,
            fatal: Arc::new(fatal),
        };
        (state, rx)
    }

    fn signal_fatal(&self, message: String) {
        error!("Fatal: {}, shutting down", message);
        self.fatal.send_replace(Some(message));
    }
}

/// Builds the gateway router.
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute_handler))
        .route("/restart", post(restart_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves the gateway until `shutdown` resolves or a fatal failure occurs,
/// then terminates the kernel. A fatal failure is returned as an error.
pub(crate) async fn serve<F>(
    listener: TcpListener,
    sessions: Arc<SessionManager>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (state, fatal) = AppState::new(Arc::clone(&sessions));
    let addr = listener.local_addr().context("Failed to read listen address")?;
    info!(%addr, "Execution gateway listening");

    let watcher = fatal.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown => info!("Shutdown requested"),
                () = wait_for_fatal(watcher) => {}
            }
        })
        .await
        .context("Gateway server error")?;

    sessions.shutdown().await;

    let failure = fatal.borrow().clone();
    match failure {
        Some(message) => anyhow::bail!("Gateway stopped after a fatal error: {message}"),
        None => {
            info!("Execution gateway stopped");
            Ok(())
        }
    }
}

async fn wait_for_fatal(mut fatal: watch::Receiver<Option<String>>) {
    while fatal.changed().await.is_ok() {
        if fatal.borrow().is_some() {
            return;
        }
    }
}

async fn execute_handler(State(state): State<AppState>, Json(body): Json<ExecuteBody>) -> Response {
    match state.sessions.execute(&body.code).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            warn!("Execution failed: {}", e);
            if e.is_restart_failed() {
                state.signal_fatal(e.to_string());
            }
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExecutionResult::failed(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn restart_handler(State(state): State<AppState>) -> Response {
    match state.sessions.restart().await {
        Ok(id) => (
            StatusCode::OK,
            Json(RestartResponse {
                status: "success".to_string(),
                message: format!("Kernel restarted (session {id})"),
            }),
        )
            .into_response(),
        Err(e) => {
            state.signal_fatal(e.to_string());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RestartResponse {
                    status: "error".to_string(),
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.sessions.status();
    Json(HealthResponse {
        status: "ok".to_string(),
        state: status.state,
        session_id: status.session_id,
    })
}
