//! Run the execution gateway in front of a kernel session.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{Backend, Config};
use crate::gateway;
use crate::sandbox::{DockerLauncher, KernelLauncher, LocalLauncher, SessionManager, SessionSettings};

/// Starts the kernel, then serves until Ctrl-C or a fatal restart failure.
pub(crate) async fn run(config: &Config, bind: Option<String>) -> Result<()> {
    let workspace = config.session.workspace_dir()?;
    fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create workspace: {}", workspace.display()))?;

    let launcher = build_launcher(config).await?;
    let sessions = Arc::new(SessionManager::new(
        launcher,
        SessionSettings {
            workspace: workspace.clone(),
            startup_timeout: config.session.startup_timeout(),
            drain: config.protocol.drain_settings(),
        },
    ));

    let session_id = sessions
        .start()
        .await
        .context("Failed to start kernel session")?;

    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = match TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(e) => {
            sessions.shutdown().await;
            return Err(e).with_context(|| format!("Failed to bind {bind}"));
        }
    };

    println!("\n{} codebox gateway on {}", "▶".green().bold(), bind.cyan());
    println!("  Backend:    {}", config.session.backend.to_string().cyan());
    println!("  Workspace:  {}", workspace.display().to_string().cyan());
    println!("  Session:    {}", session_id.dimmed());

    gateway::serve(listener, sessions, shutdown_signal()).await
}

async fn build_launcher(config: &Config) -> Result<Arc<dyn KernelLauncher>> {
    let interpreter = &config.session.interpreter;
    match config.session.backend {
        Backend::Local => Ok(Arc::new(LocalLauncher::new(interpreter)?)),
        Backend::Docker => {
            let launcher = DockerLauncher::new(config.session.docker.clone(), interpreter)?;
            if let Err(e) = launcher.cleanup_orphaned().await {
                warn!("Orphan cleanup skipped: {:#}", e);
            }
            info!(image = %config.session.docker.image, "Using docker kernel backend");
            Ok(Arc::new(launcher))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
