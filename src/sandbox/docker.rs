//! Kernel running inside a Docker container.
//!
//! The container is created with the workspace bind-mounted and kept alive
//! by a placeholder process; the kernel driver runs as an attached exec so
//! its stdin and stdout become the protocol channels.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    KernelHandle, KernelLauncher, KernelProcess, LineBuffer, SandboxError, LINE_CHANNEL_CAPACITY,
    WORKSPACE_ENV,
};
use crate::config::DockerConfig;
use crate::templates;

/// Label attached to every kernel container, used to find orphans.
const KERNEL_LABEL: &str = "codebox.kernel";

/// Launches kernels in containers built from the kernel image.
pub(crate) struct DockerLauncher {
    config: DockerConfig,
    interpreter: Vec<String>,
}

impl DockerLauncher {
    pub fn new(config: DockerConfig, interpreter: &str) -> Result<Self> {
        let interpreter = shell_words::split(interpreter)
            .with_context(|| format!("Invalid interpreter command: {interpreter}"))?;
        if interpreter.is_empty() {
            anyhow::bail!("Interpreter command is empty");
        }
        Ok(Self {
            config,
            interpreter,
        })
    }

    /// Removes kernel containers left behind by a previous run.
    pub async fn cleanup_orphaned(&self) -> Result<u32> {
        let docker = connect().await?;

        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![KERNEL_LABEL.to_string()]);

        let containers = docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .context("Failed to list kernel containers")?;

        let mut removed = 0;
        for id in containers.into_iter().filter_map(|c| c.id) {
            match remove(&docker, &id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove orphaned container {}: {:#}", id, e),
            }
        }

        if removed > 0 {
            info!("Removed {} orphaned kernel container(s)", removed);
        }
        Ok(removed)
    }

    fn build_container_config(&self, workspace: &Path) -> Result<ContainerConfig<String>> {
        let host_path = workspace
            .canonicalize()
            .with_context(|| format!("Workspace not found: {}", workspace.display()))?;
        let host_path = host_path.to_str().context("Invalid workspace path")?;

        let binds = vec![format!("{}:{}:rw", host_path, self.config.workdir)];
        let labels = HashMap::from([(KERNEL_LABEL.to_string(), "true".to_string())]);

        Ok(ContainerConfig {
            image: Some(self.config.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(self.config.workdir.clone()),
            env: Some(vec![self.workspace_env()]),
            labels: Some(labels),
            host_config: Some(bollard::service::HostConfig {
                binds: Some(binds),
                network_mode: self.config.network.network_mode(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn workspace_env(&self) -> String {
        format!("{}={}", WORKSPACE_ENV, self.config.workdir)
    }

    async fn attach_driver(&self, docker: &Docker, name: &str) -> Result<KernelProcess> {
        let mut cmd = self.interpreter.clone();
        cmd.extend([
            "-u".to_string(),
            "-c".to_string(),
            templates::KERNEL_DRIVER.to_string(),
        ]);

        let exec = docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(self.config.workdir.clone()),
                    env: Some(vec![self.workspace_env(), "MPLBACKEND=Agg".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .context("Failed to create exec")?;

        let StartExecResults::Attached { mut output, input } = docker
            .start_exec(&exec.id, None)
            .await
            .context("Failed to start exec")?
        else {
            anyhow::bail!("Kernel exec started detached");
        };

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let container = name.to_string();
        tokio::spawn(async move {
            let mut stdout = LineBuffer::default();
            let mut stderr = LineBuffer::default();
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        for line in stdout.push(&message) {
                            if tx.send(line).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        for line in stderr.push(&message) {
                            debug!(container = %container, "kernel stderr: {}", line);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Error reading kernel output: {}", e);
                        break;
                    }
                }
            }
            debug!(container = %container, "Kernel event channel closed");
        });

        Ok(KernelProcess {
            input,
            output: rx,
            handle: Box::new(DockerKernel {
                docker: docker.clone(),
                name: name.to_string(),
            }),
        })
    }
}

#[async_trait]
impl KernelLauncher for DockerLauncher {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn launch(&self, workspace: &Path) -> Result<KernelProcess, SandboxError> {
        let docker = connect()
            .await
            .map_err(|e| SandboxError::docker_unavailable(format!("{e:#}")))?;

        let name = format!(
            "codebox-{}",
            uuid::Uuid::new_v4().to_string().split('-').next().unwrap_or("kernel")
        );

        let config = self
            .build_container_config(workspace)
            .map_err(|e| SandboxError::launch_failed(format!("{e:#}")))?;

        debug!("Creating container: {}", name);
        docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| SandboxError::launch_failed(format!("failed to create container: {e}")))?;

        let attached = async {
            docker
                .start_container::<String>(&name, None)
                .await
                .context("Failed to start container")?;
            self.attach_driver(&docker, &name).await
        }
        .await;

        match attached {
            Ok(kernel) => {
                info!(
                    container = %name,
                    image = %self.config.image,
                    network = %self.config.network,
                    "Kernel container started"
                );
                Ok(kernel)
            }
            Err(e) => {
                if let Err(cleanup) = remove(&docker, &name).await {
                    warn!("Failed to remove container {}: {:#}", name, cleanup);
                }
                Err(SandboxError::launch_failed(format!("{e:#}")))
            }
        }
    }
}

struct DockerKernel {
    docker: Docker,
    name: String,
}

#[async_trait]
impl KernelHandle for DockerKernel {
    fn describe(&self) -> String {
        format!("container {}", self.name)
    }

    async fn terminate(&mut self) -> Result<()> {
        debug!("Removing container {}", self.name);
        remove(&self.docker, &self.name).await
    }
}

async fn connect() -> Result<Docker> {
    let docker = Docker::connect_with_local_defaults()
        .context("Failed to connect to Docker. Is Docker running?")?;

    docker
        .ping()
        .await
        .context("Cannot ping Docker daemon. Is Docker running?")?;

    Ok(docker)
}

async fn remove(docker: &Docker, name: &str) -> Result<()> {
    docker
        .remove_container(
            name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
        .with_context(|| format!("Failed to remove container {name}"))
}
