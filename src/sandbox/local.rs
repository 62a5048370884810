//! Kernel running as a child process of the service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    KernelHandle, KernelLauncher, KernelProcess, SandboxError, LINE_CHANNEL_CAPACITY,
    WORKSPACE_ENV,
};
use crate::templates;

/// Launches the kernel driver with a local interpreter.
#[derive(Debug, Clone)]
pub(crate) struct LocalLauncher {
    /// Interpreter program followed by its own arguments.
    command: Vec<String>,
}

impl LocalLauncher {
    /// Creates a launcher from an interpreter command line such as
    /// `python3` or `/opt/venv/bin/python -X utf8`.
    pub fn new(interpreter: &str) -> Result<Self> {
        let command = shell_words::split(interpreter)
            .with_context(|| format!("Invalid interpreter command: {interpreter}"))?;
        if command.is_empty() {
            anyhow::bail!("Interpreter command is empty");
        }
        Ok(Self { command })
    }
}

#[async_trait]
impl KernelLauncher for LocalLauncher {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn launch(&self, workspace: &Path) -> Result<KernelProcess, SandboxError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| SandboxError::launch_failed("empty interpreter command"))?;

        let workspace = workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.to_path_buf());

        debug!("Spawning {} {:?} in {}", program, args, workspace.display());

        let mut child = Command::new(program)
            .args(args)
            .args(["-u", "-c", templates::KERNEL_DRIVER])
            .current_dir(&workspace)
            .env(WORKSPACE_ENV, &workspace)
            .env("PYTHONUNBUFFERED", "1")
            .env("MPLBACKEND", "Agg")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::launch_failed(format!("failed to spawn '{program}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::launch_failed("kernel stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::launch_failed("kernel stdout not captured"))?;

        let pid = child.id().unwrap_or_default();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr, pid));
        }

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            debug!(pid, "Kernel event channel closed");
        });

        info!(pid, "Kernel process spawned");

        Ok(KernelProcess {
            input: Box::pin(stdin),
            output: rx,
            handle: Box::new(LocalKernel { child }),
        })
    }
}

async fn log_stderr(stderr: impl AsyncRead + Unpin, pid: u32) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(pid, "kernel stderr: {}", line);
    }
}

struct LocalKernel {
    child: Child,
}

#[async_trait]
impl KernelHandle for LocalKernel {
    fn describe(&self) -> String {
        match self.child.id() {
            Some(pid) => format!("pid {pid}"),
            None => "exited process".to_string(),
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .context("Failed to kill kernel process")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreter_with_arguments() {
        let launcher = LocalLauncher::new("/opt/venv/bin/python -X utf8").unwrap();
        assert_eq!(launcher.command, vec!["/opt/venv/bin/python", "-X", "utf8"]);
    }

    #[test]
    fn test_empty_interpreter_is_rejected() {
        assert!(LocalLauncher::new("   ").is_err());
    }

    #[test]
    fn test_unbalanced_quotes_are_rejected() {
        assert!(LocalLauncher::new("python3 'unterminated").is_err());
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_launch() {
        let launcher = LocalLauncher::new("definitely-not-an-interpreter-xyz").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = launcher.launch(dir.path()).await;
        assert!(matches!(result, Err(SandboxError::LaunchFailed { .. })));
    }
}
