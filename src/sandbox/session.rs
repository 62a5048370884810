//! The single persistent kernel session and its lifecycle.
//!
//! [`SessionManager`] owns the one live kernel of a deployment. Every
//! operation that touches the kernel (execute, restart, shutdown) goes
//! through one async mutex, so reading the current session, submitting
//! code and draining its events happen as one step. A restart arriving
//! during an execution waits for that drain to finish, then replaces the
//! session wholesale.
//!
//! Lifecycle state is published on a `watch` channel so health checks can
//! read it without queueing behind the gate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{KernelLauncher, KernelProcess, SandboxError};
use crate::protocol::{self, decode_line, ArtifactWriter, DrainSettings, ExecutionResult};

/// Lifecycle state of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum SessionState {
    Starting,
    Ready,
    Executing,
    ShuttingDown,
    Dead,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Executing => write!(f, "executing"),
            Self::ShuttingDown => write!(f, "shutting-down"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// Snapshot of the session as seen from outside the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<String>,
}

/// Parameters for launching and driving kernels.
#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    /// Shared workspace directory, as seen by this process.
    pub workspace: PathBuf,
    pub startup_timeout: Duration,
    pub drain: DrainSettings,
}

struct Session {
    id: String,
    kernel: KernelProcess,
}

/// Owns the deployment's single kernel session.
pub(crate) struct SessionManager {
    launcher: Arc<dyn KernelLauncher>,
    settings: SessionSettings,
    artifacts: ArtifactWriter,
    current: Mutex<Option<Session>>,
    status: watch::Sender<SessionStatus>,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn KernelLauncher>, settings: SessionSettings) -> Self {
        let artifacts = ArtifactWriter::new(settings.workspace.clone());
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Dead,
            session_id: None,
        });
        Self {
            launcher,
            settings,
            artifacts,
            current: Mutex::new(None),
            status,
        }
    }

    /// Current state and session id.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Starts a fresh session, replacing any existing one. Returns the new
    /// session id.
    pub async fn start(&self) -> Result<String, SandboxError> {
        let mut current = self.current.lock().await;
        self.shutdown_locked(&mut current).await;
        self.start_locked(&mut current).await
    }

    /// Terminates the current session. Termination failures are logged and
    /// swallowed.
    pub async fn shutdown(&self) {
        let mut current = self.current.lock().await;
        self.shutdown_locked(&mut current).await;
    }

    /// Replaces the current session with a fresh one, wiping all
    /// interpreter state. Any failure to start is a `RestartFailed`.
    pub async fn restart(&self) -> Result<String, SandboxError> {
        let mut current = self.current.lock().await;
        info!("Restarting kernel session");
        self.shutdown_locked(&mut current).await;
        self.start_locked(&mut current)
            .await
            .map_err(|e| SandboxError::restart_failed(e.to_string()))
    }

    /// Runs `code` on the current session.
    ///
    /// A missing or dead session is restarted first; if that fails the
    /// error is `RestartFailed`. A lost channel during execution marks the
    /// session dead and terminates its kernel so the next call starts
    /// fresh. A drain cutoff returns partial output and leaves the session
    /// ready.
    pub async fn execute(&self, code: &str) -> Result<ExecutionResult, SandboxError> {
        let mut current = self.current.lock().await;

        if current.is_none() {
            warn!("No live kernel session, starting one before executing");
            self.start_locked(&mut current)
                .await
                .map_err(|e| SandboxError::restart_failed(e.to_string()))?;
        }

        let Some(session) = current.as_mut() else {
            return Err(SandboxError::restart_failed("no session after start"));
        };
        let id = session.id.clone();

        self.publish(SessionState::Executing, Some(&id));
        let outcome = protocol::execute(
            &mut session.kernel,
            code,
            self.settings.drain,
            &self.artifacts,
        )
        .await;

        match outcome {
            Ok(result) => {
                self.publish(SessionState::Ready, Some(&id));
                Ok(result)
            }
            Err(e) => {
                warn!(session_id = %id, "Execution failed, discarding session: {}", e);
                self.shutdown_locked(&mut current).await;
                Err(e)
            }
        }
    }

    async fn start_locked(&self, slot: &mut Option<Session>) -> Result<String, SandboxError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.publish(SessionState::Starting, Some(&id));

        let launched = self.launcher.launch(&self.settings.workspace).await;
        let mut kernel = match launched {
            Ok(kernel) => kernel,
            Err(e) => {
                self.publish(SessionState::Dead, None);
                return Err(e);
            }
        };

        let ready = timeout(
            self.settings.startup_timeout,
            wait_for_ready(&mut kernel.output),
        )
        .await
        .unwrap_or_else(|_| Err(SandboxError::startup_timeout(self.settings.startup_timeout)));

        if let Err(e) = ready {
            warn!(session_id = %id, "Kernel failed to start: {}", e);
            if let Err(term) = kernel.handle.terminate().await {
                warn!("Failed to terminate kernel {}: {:#}", kernel.handle.describe(), term);
            }
            self.publish(SessionState::Dead, None);
            return Err(e);
        }

        info!(
            session_id = %id,
            launcher = self.launcher.name(),
            kernel = %kernel.handle.describe(),
            "Kernel session ready"
        );
        *slot = Some(Session {
            id: id.clone(),
            kernel,
        });
        self.publish(SessionState::Ready, Some(&id));
        Ok(id)
    }

    async fn shutdown_locked(&self, slot: &mut Option<Session>) {
        let Some(mut session) = slot.take() else {
            return;
        };

        self.publish(SessionState::ShuttingDown, Some(&session.id));
        debug!(session_id = %session.id, "Terminating {}", session.kernel.handle.describe());
        if let Err(e) = session.kernel.handle.terminate().await {
            warn!(session_id = %session.id, "Failed to terminate kernel: {:#}", e);
        }
        self.publish(SessionState::Dead, Some(&session.id));
        info!(session_id = %session.id, "Kernel session shut down");
    }

    fn publish(&self, state: SessionState, session_id: Option<&str>) {
        debug!(state = %state, "Session state change");
        self.status.send_replace(SessionStatus {
            state,
            session_id: session_id.map(String::from),
        });
    }
}

/// Waits for the driver's readiness signal: an idle status with no parent.
async fn wait_for_ready(output: &mut mpsc::Receiver<String>) -> Result<(), SandboxError> {
    while let Some(line) = output.recv().await {
        match decode_line(&line) {
            Ok(msg) if msg.parent.is_none() && msg.event.is_idle() => return Ok(()),
            Ok(msg) => debug!(parent = ?msg.parent, "Ignoring kernel event before ready"),
            Err(e) => debug!("Ignoring kernel output before ready: {}", e),
        }
    }
    Err(SandboxError::launch_failed(
        "kernel exited before reporting ready",
    ))
}
