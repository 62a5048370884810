//! Kernel sandbox: the persistent interpreter session and its launchers.
//!
//! A kernel is one long-lived interpreter process running the embedded
//! driver script. It can run as a local child process or inside a Docker
//! container with the workspace bind-mounted. Either way the session
//! manager only sees a [`KernelProcess`]: a writable control channel, a
//! stream of protocol lines, and a handle that can terminate it.

mod docker;
mod error;
mod local;
#[cfg(test)]
pub(crate) mod mock;
mod network;
mod session;

pub(crate) use docker::DockerLauncher;
pub(crate) use error::SandboxError;
pub(crate) use local::LocalLauncher;
pub(crate) use network::NetworkPolicy;
pub(crate) use session::{SessionManager, SessionSettings, SessionState};

use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

/// Environment variable through which the driver learns its workspace path.
pub(crate) const WORKSPACE_ENV: &str = "CODEBOX_WORKSPACE";

/// Capacity of the protocol line channel between reader task and session.
pub(crate) const LINE_CHANNEL_CAPACITY: usize = 1024;

/// A running interpreter as seen by the session manager.
pub(crate) struct KernelProcess {
    /// Control channel: protocol requests are written here.
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
    /// Event channel: one protocol line per item. Closed when the kernel exits.
    pub output: mpsc::Receiver<String>,
    /// Owner of the underlying process or container.
    pub handle: Box<dyn KernelHandle>,
}

/// Terminates the process (or container) behind a kernel.
#[async_trait]
pub(crate) trait KernelHandle: Send + Sync {
    /// Identifier for logging (pid or container name).
    fn describe(&self) -> String;

    /// Requests immediate termination.
    async fn terminate(&mut self) -> anyhow::Result<()>;
}

/// Starts fresh kernels bound to a workspace directory.
#[async_trait]
pub(crate) trait KernelLauncher: Send + Sync {
    /// Returns the launcher name for display.
    fn name(&self) -> &'static str;

    /// Launches a kernel. Returns as soon as the process exists; readiness
    /// is awaited by the session manager.
    async fn launch(&self, workspace: &Path) -> Result<KernelProcess, SandboxError>;
}

/// Splits a byte stream into protocol lines.
///
/// Container output arrives in arbitrary chunks, so a line may span
/// several chunks and a chunk may hold several lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_joins_split_lines() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"{\"msg_type\":").is_empty());
        assert_eq!(buf.push(b"\"status\"}\n"), vec!["{\"msg_type\":\"status\"}"]);
    }

    #[test]
    fn test_line_buffer_splits_multiple_lines() {
        let mut buf = LineBuffer::default();
        let lines = buf.push(b"one\ntwo\r\nthr");
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(buf.push(b"ee\n"), vec!["three"]);
    }

    #[test]
    fn test_line_buffer_keeps_multibyte_characters_across_chunks() {
        let mut buf = LineBuffer::default();
        let text = "café\n".as_bytes();
        assert!(buf.push(&text[..4]).is_empty());
        assert_eq!(buf.push(&text[4..]), vec!["café"]);
    }
}
