//! Submission and time-bounded draining of one execution.

use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{aggregate, decode_line, ArtifactWriter, ExecuteRequest, ExecutionEvent, ExecutionResult};
use crate::sandbox::{KernelProcess, SandboxError};

/// Time bounds for collecting the events of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DrainSettings {
    /// Longest wait for a single event.
    pub read_timeout: Duration,
    /// Elapsed time after which a silent read ends the drain with whatever
    /// was collected. A kernel that keeps emitting is never cut off.
    pub budget: Duration,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            budget: Duration::from_secs(10),
        }
    }
}

/// Runs `code` on the kernel and aggregates its output.
///
/// Going silent past the drain budget is not an error: the partial output
/// is returned and the kernel keeps running the code in the background. A
/// failed submission or a closed event channel is a hard failure.
pub(crate) async fn execute(
    kernel: &mut KernelProcess,
    code: &str,
    settings: DrainSettings,
    artifacts: &ArtifactWriter,
) -> Result<ExecutionResult, SandboxError> {
    let request = ExecuteRequest::new(code);
    debug!(msg_id = %request.msg_id, bytes = code.len(), "Submitting code to kernel");

    submit(kernel, &request).await?;
    let events = drain(&mut kernel.output, &request.msg_id, settings).await?;

    let aggregate = aggregate(&events);
    let images = artifacts.persist(aggregate.images);

    Ok(ExecutionResult {
        logs: aggregate.logs,
        images,
        error: None,
    })
}

async fn submit(kernel: &mut KernelProcess, request: &ExecuteRequest) -> Result<(), SandboxError> {
    let line = request
        .to_line()
        .map_err(|e| SandboxError::disconnected(format!("failed to encode request: {e}")))?;

    kernel
        .input
        .write_all(line.as_bytes())
        .await
        .map_err(|e| SandboxError::disconnected(format!("failed to submit code: {e}")))?;
    kernel
        .input
        .flush()
        .await
        .map_err(|e| SandboxError::disconnected(format!("failed to submit code: {e}")))?;

    Ok(())
}

/// Collects events for `msg_id` until the kernel reports idle, or until a
/// read times out after the budget has elapsed. Events of other requests
/// are stale and dropped.
pub(super) async fn drain(
    output: &mut mpsc::Receiver<String>,
    msg_id: &str,
    settings: DrainSettings,
) -> Result<Vec<ExecutionEvent>, SandboxError> {
    let started = Instant::now();
    let mut events = Vec::new();

    loop {
        match timeout(settings.read_timeout, output.recv()).await {
            Ok(Some(line)) => match decode_line(&line) {
                Ok(msg) if msg.parent.as_deref() == Some(msg_id) => {
                    let done = msg.event.is_idle();
                    events.push(msg.event);
                    if done {
                        debug!(msg_id, events = events.len(), "Execution finished");
                        return Ok(events);
                    }
                }
                Ok(msg) => debug!(parent = ?msg.parent, "Discarding stale kernel event"),
                Err(e) => debug!("Ignoring kernel output: {}", e),
            },
            Ok(None) => {
                return Err(SandboxError::disconnected(
                    "event channel closed during execution",
                ))
            }
            Err(_) if started.elapsed() > settings.budget => {
                warn!(
                    msg_id,
                    collected = events.len(),
                    "Kernel silent past the drain budget of {:?}, returning partial output",
                    settings.budget
                );
                return Ok(events);
            }
            Err(_) => debug!(msg_id, "No kernel event within {:?}", settings.read_timeout),
        }
    }
}
