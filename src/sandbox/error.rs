//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings. A drain cutoff is not an
//! error (the caller gets a partial result), and an exception raised by
//! user code is reported as log content, so neither appears here.

use std::time::Duration;

/// Errors that can occur while managing or talking to a kernel session.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The kernel did not report ready within the startup timeout.
    #[error("Kernel did not become ready within {timeout_secs} seconds")]
    StartupTimeout { timeout_secs: u64 },

    /// The interpreter process (or its container) could not be launched.
    #[error("Failed to launch kernel: {message}")]
    LaunchFailed { message: String },

    /// The control or event channel to the kernel was lost.
    #[error("Kernel channel disconnected: {message}")]
    Disconnected { message: String },

    /// A restart could not bring a fresh kernel up.
    #[error("Kernel restart failed: {message}")]
    RestartFailed { message: String },

    /// Docker daemon is not running or not accessible.
    #[error("Docker is not available: {message}")]
    DockerUnavailable { message: String },

    /// The execution gateway could not be reached or answered garbage.
    #[error("Gateway transport failure: {message}")]
    Transport { message: String },
}

impl SandboxError {
    /// Creates a `StartupTimeout` error from a `Duration`.
    pub fn startup_timeout(duration: Duration) -> Self {
        Self::StartupTimeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates a `LaunchFailed` error.
    pub fn launch_failed(message: impl Into<String>) -> Self {
        Self::LaunchFailed {
            message: message.into(),
        }
    }

    /// Creates a `Disconnected` error.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    /// Creates a `RestartFailed` error.
    pub fn restart_failed(message: impl Into<String>) -> Self {
        Self::RestartFailed {
            message: message.into(),
        }
    }

    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates a `Transport` error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true if the kernel never became ready.
    pub fn is_startup_timeout(&self) -> bool {
        matches!(self, Self::StartupTimeout { .. })
    }

    /// Returns true if the kernel channel was lost.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    /// Returns true if this is a restart failure.
    pub fn is_restart_failed(&self) -> bool {
        matches!(self, Self::RestartFailed { .. })
    }
}
