use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::DrainSettings;
use crate::sandbox::NetworkPolicy;

pub(crate) const CONFIG_FILE: &str = "codebox.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Execution gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Where the kernel runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum Backend {
    /// Child process of the service
    #[default]
    Local,
    /// Docker container with the workspace bind-mounted
    Docker,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

/// Kernel session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SessionConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Interpreter command (may include arguments)
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Shared workspace directory, as seen by the service
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Seconds to wait for a fresh kernel to report ready
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Docker backend configuration
    #[serde(default)]
    pub docker: DockerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            interpreter: default_interpreter(),
            workspace: default_workspace(),
            startup_timeout_secs: default_startup_timeout(),
            docker: DockerConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn workspace_dir(&self) -> Result<PathBuf> {
        expand_path(&self.workspace).map(PathBuf::from)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DockerConfig {
    /// Kernel image
    #[serde(default = "default_image")]
    pub image: String,

    /// Workspace mount point inside the container
    #[serde(default = "default_workdir")]
    pub workdir: String,

    #[serde(default)]
    pub network: NetworkPolicy,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            workdir: default_workdir(),
            network: NetworkPolicy::default(),
        }
    }
}

/// Event draining bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProtocolConfig {
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_drain_budget")]
    pub drain_budget_secs: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout(),
            drain_budget_secs: default_drain_budget(),
        }
    }
}

impl ProtocolConfig {
    pub fn drain_settings(&self) -> DrainSettings {
        DrainSettings {
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            budget: Duration::from_secs(self.drain_budget_secs),
        }
    }
}

/// Caller-side tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ToolConfig {
    /// Gateway base URL
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Workspace directory, as seen by the caller
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Network-level request timeout; must exceed the drain budget
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Delay before the post-execution workspace snapshot
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            workspace: default_workspace(),
            request_timeout_secs: default_request_timeout(),
            settle_millis: default_settle_millis(),
        }
    }
}

impl ToolConfig {
    pub fn workspace_dir(&self) -> Result<PathBuf> {
        expand_path(&self.workspace).map(PathBuf::from)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for daily-rolling log files
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions
fn default_bind() -> String {
    "127.0.0.1:5001".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_workspace() -> String {
    "workspace".to_string()
}

fn default_startup_timeout() -> u64 {
    10
}

fn default_image() -> String {
    "codebox-kernel:latest".to_string()
}

fn default_workdir() -> String {
    "/app/workspace".to_string()
}

fn default_read_timeout() -> u64 {
    5
}

fn default_drain_budget() -> u64 {
    10
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_settle_millis() -> u64 {
    1000
}

impl Config {
    /// Load configuration from `codebox.toml` in a directory, using
    /// defaults if not found
    pub fn load(project_dir: &Path) -> Result<Self> {
        Self::load_file(&project_dir.join(CONFIG_FILE))
    }

    /// Load configuration from an explicit file, using defaults if it
    /// does not exist
    pub fn load_file(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Resolve the config from `--config` or the current directory
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Self::load_file(path)
            }
            None => {
                let cwd = std::env::current_dir().context("Failed to get current directory")?;
                Self::load(&cwd)
            }
        }
    }
}

/// Expand ~ to home directory
pub(crate) fn expand_path(path: &str) -> Result<String> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(rest).display().to_string())
    } else {
        Ok(path.to_string())
    }
}
