//! Caller-side invocation wrapper.
//!
//! [`CodeTool::run`] is what an agent calls: it never fails, every outcome
//! is rendered into one string. The submitted script carries a bootstrap
//! and a fresh marker; output before the marker is dropped. Artifacts are
//! found by diffing the workspace listing around the call.

mod script;
mod snapshot;
mod tags;

pub(crate) use tags::{extract_images, is_error};

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ToolConfig;
use crate::gateway::{ExecuteBody, HealthResponse, RestartResponse};
use crate::protocol::ExecutionResult;
use crate::sandbox::SandboxError;
use script::{after_marker, build_script, new_marker, strip_code_fences};
use snapshot::{is_image, Snapshot};
use tags::{format_error, image_tag, strip_ansi, NO_OUTPUT};

/// Client for the execution gateway.
#[derive(Debug, Clone)]
pub(crate) struct CodeTool {
    client: reqwest::Client,
    base_url: String,
    workspace: PathBuf,
    settle: Duration,
}

impl CodeTool {
    pub fn new(
        gateway_url: &str,
        workspace: impl Into<PathBuf>,
        request_timeout: Duration,
        settle: Duration,
    ) -> Result<Self, SandboxError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SandboxError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: gateway_url.trim_end_matches('/').to_string(),
            workspace: workspace.into(),
            settle,
        })
    }

    /// Builds a tool from `[tool]` configuration, optionally overriding the
    /// gateway URL.
    pub fn from_config(config: &ToolConfig, gateway_url: Option<&str>) -> anyhow::Result<Self> {
        let tool = Self::new(
            gateway_url.unwrap_or(&config.gateway_url),
            config.workspace_dir()?,
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_millis(config.settle_millis),
        )?;
        Ok(tool)
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Runs `code` in the remote session and renders the outcome.
    pub async fn run(&self, code: &str) -> String {
        let code = strip_code_fences(code);
        let marker = new_marker();
        let script = build_script(code, &marker);

        let before = Snapshot::take(&self.workspace);

        let result = match self.execute(&script).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Execution request failed: {}", e);
                return format_error(&strip_ansi(&e.to_string()));
            }
        };

        let logs = strip_ansi(&result.logs);
        let logs = after_marker(&logs, &marker);

        if let Some(error) = result.error.as_deref().filter(|e| !e.is_empty()) {
            return format_error(&strip_ansi(error));
        }

        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        let after = Snapshot::take(&self.workspace);

        let mut images = after.new_images(&before);
        images.extend(result.images.into_iter().filter(|name| is_image(name)));
        images.sort();
        images.dedup();
        debug!(images = images.len(), "Execution finished");

        render(logs, &images)
    }

    /// Sends `POST /execute` with an already-built script.
    async fn execute(&self, script: &str) -> Result<ExecutionResult, SandboxError> {
        let url = format!("{}/execute", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ExecuteBody {
                code: script.to_string(),
            })
            .send()
            .await
            .map_err(|e| SandboxError::transport(format!("POST {url}: {e}")))?;

        let status = response.status();
        response.json::<ExecutionResult>().await.map_err(|e| {
            SandboxError::transport(format!("POST {url} returned {status}: {e}"))
        })
    }

    /// Asks the gateway to restart the session. A non-success answer is an
    /// error.
    pub async fn restart(&self) -> Result<RestartResponse, SandboxError> {
        let url = format!("{}/restart", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| SandboxError::transport(format!("POST {url}: {e}")))?;

        let status = response.status();
        let body = response
            .json::<RestartResponse>()
            .await
            .map_err(|e| SandboxError::transport(format!("POST {url} returned {status}: {e}")))?;

        if status.is_success() && body.is_success() {
            Ok(body)
        } else {
            Err(SandboxError::restart_failed(body.message))
        }
    }

    /// Reads the gateway's session status.
    pub async fn health(&self) -> Result<HealthResponse, SandboxError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SandboxError::transport(format!("GET {url}: {e}")))?;

        let status = response.status();
        response
            .json::<HealthResponse>()
            .await
            .map_err(|e| SandboxError::transport(format!("GET {url} returned {status}: {e}")))
    }
}

fn render(logs: &str, images: &[String]) -> String {
    if !images.is_empty() {
        format!("{logs}\n{}", image_tag(images))
    } else if logs.trim().is_empty() {
        NO_OUTPUT.to_string()
    } else {
        logs.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway;
    use crate::protocol::DrainSettings;
    use crate::sandbox::mock::MockLauncher;
    use crate::sandbox::{KernelLauncher, LocalLauncher, SessionManager, SessionSettings};
    use std::fs;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct TestGateway {
        url: String,
        stop: Option<oneshot::Sender<()>>,
        server: Option<JoinHandle<anyhow::Result<()>>>,
    }

    impl TestGateway {
        async fn spawn(launcher: Arc<dyn KernelLauncher>, dir: &TempDir, drain: DrainSettings) -> Self {
            let sessions = Arc::new(SessionManager::new(
                launcher,
                SessionSettings {
                    workspace: dir.path().to_path_buf(),
                    startup_timeout: Duration::from_secs(10),
                    drain,
                },
            ));
            sessions.start().await.unwrap();

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let (stop, stopped) = oneshot::channel::<()>();
            let server = tokio::spawn(gateway::serve(listener, sessions, async move {
                let _ = stopped.await;
            }));

            Self {
                url,
                stop: Some(stop),
                server: Some(server),
            }
        }

        fn tool(&self, dir: &TempDir) -> CodeTool {
            CodeTool::new(&self.url, dir.path(), Duration::from_secs(30), Duration::ZERO).unwrap()
        }

        async fn stop(mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            if let Some(server) = self.server.take() {
                let _ = server.await;
            }
        }
    }

    fn quick_drain() -> DrainSettings {
        DrainSettings {
            read_timeout: Duration::from_millis(100),
            budget: Duration::from_secs(2),
        }
    }

    async fn mock_gateway(dir: &TempDir) -> (TestGateway, MockLauncher) {
        let launcher = MockLauncher::new();
        let gateway = TestGateway::spawn(Arc::new(launcher.clone()), dir, quick_drain()).await;
        (gateway, launcher)
    }

    #[test]
    fn test_render() {
        assert_eq!(render("5\n", &[]), "5\n");
        assert_eq!(render(" \n", &[]), NO_OUTPUT);
        assert_eq!(
            render("", &["a.png".to_string()]),
            "\n[IMAGE_GENERATED:a.png]"
        );
    }

    #[tokio::test]
    async fn test_state_persists_between_calls() {
        let dir = tempdir().unwrap();
        let (gateway, _) = mock_gateway(&dir).await;
        let tool = gateway.tool(&dir);

        assert_eq!(tool.run("x = 5").await, NO_OUTPUT);
        assert_eq!(tool.run("print(x)").await, "5\n");

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_fenced_code_is_unwrapped() {
        let dir = tempdir().unwrap();
        let (gateway, _) = mock_gateway(&dir).await;
        let tool = gateway.tool(&dir);

        assert_eq!(tool.run("```python\nprint('hi')\n```").await, "hi\n");

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_new_files_are_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.png"), b"old").unwrap();
        let (gateway, _) = mock_gateway(&dir).await;
        let tool = gateway.tool(&dir);

        let output = tool
            .run("save('old.png')\nsave('plot.png')\nsave('table.csv')")
            .await;
        assert_eq!(output, "\n[IMAGE_GENERATED:plot.png]");
        assert!(dir.path().join("plot.png").exists());
        assert_eq!(
            extract_images(&output, tool.workspace()),
            vec![dir.path().join("plot.png")]
        );

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_rich_display_images_are_reported() {
        let dir = tempdir().unwrap();
        let (gateway, _) = mock_gateway(&dir).await;
        let tool = gateway.tool(&dir);

        let output = tool.run("display_png()").await;
        assert!(output.starts_with("<Figure>\n[IMAGE_GENERATED:"));
        assert_eq!(extract_images(&output, tool.workspace()).len(), 1);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_user_exception_is_not_a_tool_error() {
        let dir = tempdir().unwrap();
        let (gateway, _) = mock_gateway(&dir).await;
        let tool = gateway.tool(&dir);

        let output = tool.run("raise ValueError(\"boom\")").await;
        assert!(!is_error(&output));
        assert!(output.starts_with("Error: "));
        assert!(output.contains("boom"));

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_a_tool_error() {
        let dir = tempdir().unwrap();
        let (gateway, launcher) = mock_gateway(&dir).await;
        let tool = gateway.tool(&dir);

        let output = tool.run("exit()").await;
        assert!(output.starts_with("EXECUTION_ERROR:\n"));
        assert!(output.contains("disconnected"));

        assert_eq!(tool.run("print('again')").await, "again\n");
        assert_eq!(launcher.launches(), 2);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_restart_clears_state() {
        let dir = tempdir().unwrap();
        let (gateway, launcher) = mock_gateway(&dir).await;
        let tool = gateway.tool(&dir);

        tool.run("x = 5").await;
        let restarted = tool.restart().await.unwrap();
        assert_eq!(restarted.status, "success");

        let output = tool.run("print(x)").await;
        assert!(output.contains("NameError"));

        let health = tool.health().await.unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.state, crate::sandbox::SessionState::Ready);
        assert_eq!(launcher.live(), 1);

        gateway.stop().await;
        assert_eq!(launcher.live(), 0);
    }

    #[tokio::test]
    async fn test_failed_restart_is_an_error() {
        let dir = tempdir().unwrap();
        let (gateway, launcher) = mock_gateway(&dir).await;
        let tool = gateway.tool(&dir);

        launcher.fail_launches(true);
        let err = tool.restart().await.unwrap_err();
        assert!(err.is_restart_failed());

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_gateway_returns_error_string() {
        let dir = tempdir().unwrap();
        let tool = CodeTool::new(
            "http://127.0.0.1:1",
            dir.path(),
            Duration::from_secs(5),
            Duration::ZERO,
        )
        .unwrap();

        let output = tool.run("print(1)").await;
        assert!(output.starts_with("EXECUTION_ERROR:\n"));
        assert!(tool.restart().await.is_err());
        assert!(tool.health().await.is_err());
    }

    // -------------------------------------------------------------------------
    // Real interpreter (skipped when python3 is not installed)
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_python_end_to_end() {
        let python = std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success());
        if !python {
            return;
        }

        let dir = tempdir().unwrap();
        let launcher = LocalLauncher::new("python3").unwrap();
        let gateway = TestGateway::spawn(Arc::new(launcher), &dir, DrainSettings::default()).await;
        let tool = gateway.tool(&dir);

        assert_eq!(tool.run("x = 5").await, NO_OUTPUT);
        assert_eq!(tool.run("print(x)").await.trim(), "5");

        let output = tool
            .run("with open('plot.png', 'wb') as f:\n    f.write(b'\\x89PNG')")
            .await;
        assert!(output.contains("[IMAGE_GENERATED:plot.png]"));
        assert!(dir.path().join("plot.png").exists());

        let output = tool.run("raise ValueError(\"boom\")").await;
        assert!(output.contains("Error:"));
        assert!(output.contains("ValueError: boom"));
        assert!(!is_error(&output));

        tool.restart().await.unwrap();
        let output = tool.run("print(x)").await;
        assert!(output.contains("NameError"));

        gateway.stop().await;
    }
}
