//! Kernel wire protocol and execution event model.
//!
//! The driver running inside the interpreter reads one JSON request per
//! line on its control channel and writes one JSON message per line on its
//! event channel. Messages are shaped after Jupyter's iopub messages:
//!
//! ```text
//! {"msg_type": "stream", "parent": "<msg_id>", "content": {"name": "stdout", "text": "5\n"}}
//! {"msg_type": "status", "parent": "<msg_id>", "content": {"execution_state": "idle"}}
//! ```
//!
//! Decoding turns each line into a closed [`ExecutionEvent`] so that the
//! aggregation in [`aggregate`] is a pure function over an event sequence.

mod aggregate;
mod drain;

pub(crate) use aggregate::{aggregate, ArtifactWriter};
pub(crate) use drain::{execute, DrainSettings};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One request on the kernel's control channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct ExecuteRequest {
    pub msg_id: String,
    pub code: String,
}

impl ExecuteRequest {
    /// Creates a request with a fresh message id.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().simple().to_string(),
            code: code.into(),
        }
    }

    /// Encodes the request as a single protocol line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Interpreter execution state carried by status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ExecutionState {
    Starting,
    Busy,
    Idle,
}

/// Mime bundle attached to result and display events.
pub(crate) type MimeBundle = BTreeMap<String, String>;

/// One classified item in the ordered stream a kernel emits for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExecutionEvent {
    /// Text written to stdout or stderr.
    Stream { name: String, text: String },
    /// Value of a trailing expression.
    Result { data: MimeBundle },
    /// Rich display payload, possibly carrying an image.
    Display { data: MimeBundle },
    /// Exception raised by user code.
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    /// Execution state transition.
    Status { state: ExecutionState },
}

impl ExecutionEvent {
    /// Returns true for the terminal event of a request.
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            Self::Status {
                state: ExecutionState::Idle
            }
        )
    }
}

/// A decoded event together with the request it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelMessage {
    /// Id of the request that produced the event; `None` for kernel-level
    /// events such as the startup readiness signal.
    pub parent: Option<String>,
    pub event: ExecutionEvent,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    msg_type: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct StreamContent {
    #[serde(default = "default_stream_name")]
    name: String,
    #[serde(default)]
    text: String,
}

fn default_stream_name() -> String {
    "stdout".to_string()
}

#[derive(Deserialize)]
struct DataContent {
    #[serde(default)]
    data: MimeBundle,
}

#[derive(Deserialize)]
struct ErrorContent {
    #[serde(default)]
    ename: String,
    #[serde(default)]
    evalue: String,
    #[serde(default)]
    traceback: Vec<String>,
}

#[derive(Deserialize)]
struct StatusContent {
    execution_state: ExecutionState,
}

/// Error decoding a line from the kernel's event channel.
#[derive(Debug, thiserror::Error)]
pub(crate) enum DecodeError {
    #[error("malformed kernel message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown kernel message type: {0}")]
    UnknownType(String),
}

/// Decodes one line of the event channel.
pub(crate) fn decode_line(line: &str) -> Result<KernelMessage, DecodeError> {
    let wire: WireMessage = serde_json::from_str(line)?;
    let content = wire.content;

    let event = match wire.msg_type.as_str() {
        "stream" => {
            let c: StreamContent = serde_json::from_value(content)?;
            ExecutionEvent::Stream {
                name: c.name,
                text: c.text,
            }
        }
        "execute_result" => {
            let c: DataContent = serde_json::from_value(content)?;
            ExecutionEvent::Result { data: c.data }
        }
        "display_data" => {
            let c: DataContent = serde_json::from_value(content)?;
            ExecutionEvent::Display { data: c.data }
        }
        "error" => {
            let c: ErrorContent = serde_json::from_value(content)?;
            ExecutionEvent::Error {
                ename: c.ename,
                evalue: c.evalue,
                traceback: c.traceback,
            }
        }
        "status" => {
            let c: StatusContent = serde_json::from_value(content)?;
            ExecutionEvent::Status {
                state: c.execution_state,
            }
        }
        other => return Err(DecodeError::UnknownType(other.to_string())),
    };

    Ok(KernelMessage {
        parent: wire.parent,
        event,
    })
}

/// Encodes an event as a protocol line; the inverse of [`decode_line`].
///
/// The service never writes events itself; scripted test kernels do.
#[cfg(test)]
pub(crate) fn encode_event(parent: Option<&str>, event: &ExecutionEvent) -> String {
    use serde_json::json;

    let (msg_type, content) = match event {
        ExecutionEvent::Stream { name, text } => ("stream", json!({ "name": name, "text": text })),
        ExecutionEvent::Result { data } => ("execute_result", json!({ "data": data })),
        ExecutionEvent::Display { data } => ("display_data", json!({ "data": data })),
        ExecutionEvent::Error {
            ename,
            evalue,
            traceback,
        } => (
            "error",
            json!({ "ename": ename, "evalue": evalue, "traceback": traceback }),
        ),
        ExecutionEvent::Status { state } => ("status", json!({ "execution_state": state })),
    };

    let wire = WireMessage {
        msg_type: msg_type.to_string(),
        parent: parent.map(String::from),
        content,
    };
    let mut line = serde_json::to_string(&wire).unwrap_or_default();
    line.push('\n');
    line
}

/// Aggregate result of one execution, as returned by `POST /execute`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ExecutionResult {
    /// Concatenated text output in emission order.
    #[serde(default)]
    pub logs: String,
    /// Artifact file names written to the workspace directory.
    #[serde(default)]
    pub images: Vec<String>,
    /// Transport or protocol failure; never set for exceptions in user code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Result for an execution that could not be carried out at all.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}
