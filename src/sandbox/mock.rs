//! Scripted in-process kernel for tests.
//!
//! Understands a tiny line-oriented language, enough to exercise state,
//! errors, artifacts, slow code and crashes without a real interpreter:
//!
//! ```text
//! x = 5            bind a variable
//! print('hi')      print a literal
//! print(x)         print a variable (NameError if unbound)
//! raise E("msg")   raise an exception
//! sleep(200)       block for 200 ms
//! display_png()    emit a rich-display PNG
//! save('a.png')    write a file into the workspace
//! exit()           kill the kernel
//! ```
//!
//! Anything else is ignored, so wrapper bootstrap lines pass through.

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{KernelHandle, KernelLauncher, KernelProcess, SandboxError, LINE_CHANNEL_CAPACITY};
use crate::protocol::{encode_event, ExecuteRequest, ExecutionEvent, ExecutionState, MimeBundle};

/// Smallest valid PNG signature, enough for file-type sniffing in tests.
pub(crate) const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Default)]
struct Counters {
    launches: AtomicUsize,
    live: AtomicUsize,
    fail_launch: AtomicBool,
    silent: AtomicBool,
}

/// Launcher for scripted kernels. Clones share counters and switches.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockLauncher {
    counters: Arc<Counters>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of kernels launched so far.
    pub fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    /// Number of kernels launched and not yet terminated.
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Makes subsequent launches fail outright.
    pub fn fail_launches(&self, fail: bool) {
        self.counters.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent kernels never report ready.
    pub fn silent(&self, silent: bool) {
        self.counters.silent.store(silent, Ordering::SeqCst);
    }
}

#[async_trait]
impl KernelLauncher for MockLauncher {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn launch(&self, workspace: &Path) -> Result<KernelProcess, SandboxError> {
        if self.counters.fail_launch.load(Ordering::SeqCst) {
            return Err(SandboxError::launch_failed("mock launch disabled"));
        }

        let id = self.counters.launches.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.live.fetch_add(1, Ordering::SeqCst);

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let kernel = MockKernel {
            vars: HashMap::new(),
            workspace: workspace.to_path_buf(),
            events: tx,
        };
        let silent = self.counters.silent.load(Ordering::SeqCst);
        let task = tokio::spawn(kernel.serve(server, silent));

        Ok(KernelProcess {
            input: Box::pin(client),
            output: rx,
            handle: Box::new(MockHandle {
                id,
                task,
                counters: Arc::clone(&self.counters),
                terminated: false,
            }),
        })
    }
}

struct MockHandle {
    id: usize,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
    terminated: bool,
}

#[async_trait]
impl KernelHandle for MockHandle {
    fn describe(&self) -> String {
        format!("mock kernel #{}", self.id)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.task.abort();
        if !self.terminated {
            self.terminated = true;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

enum Step {
    Continue,
    Failed,
    Exit,
}

struct MockKernel {
    vars: HashMap<String, String>,
    workspace: PathBuf,
    events: mpsc::Sender<String>,
}

impl MockKernel {
    async fn serve(mut self, input: DuplexStream, silent: bool) {
        if silent {
            std::future::pending::<()>().await;
        }
        self.emit(None, ExecutionEvent::Status {
            state: ExecutionState::Idle,
        })
        .await;

        let mut lines = BufReader::new(input).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(request) = serde_json::from_str::<ExecuteRequest>(&line) else {
                continue;
            };
            let parent = Some(request.msg_id.as_str());
            self.emit(parent, ExecutionEvent::Status {
                state: ExecutionState::Busy,
            })
            .await;

            for statement in request.code.lines() {
                match self.run(parent, statement.trim()).await {
                    Step::Continue => {}
                    Step::Failed => break,
                    Step::Exit => return,
                }
            }

            self.emit(parent, ExecutionEvent::Status {
                state: ExecutionState::Idle,
            })
            .await;
        }
    }

    async fn run(&mut self, parent: Option<&str>, statement: &str) -> Step {
        if statement == "exit()" {
            return Step::Exit;
        }

        if statement == "display_png()" {
            let mut data = MimeBundle::new();
            data.insert("text/plain".to_string(), "<Figure>".to_string());
            data.insert(
                "image/png".to_string(),
                base64::engine::general_purpose::STANDARD.encode(PNG_BYTES),
            );
            self.emit(parent, ExecutionEvent::Display { data }).await;
            return Step::Continue;
        }

        if let Some(arg) = call_arg(statement, "sleep") {
            let millis = arg.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            return Step::Continue;
        }

        if let Some(arg) = call_arg(statement, "save") {
            let _ = std::fs::write(self.workspace.join(unquote(arg)), PNG_BYTES);
            return Step::Continue;
        }

        if let Some(arg) = call_arg(statement, "print") {
            let text = if is_quoted(arg) {
                unquote(arg).to_string()
            } else if let Some(value) = self.vars.get(arg) {
                value.clone()
            } else {
                let evalue = format!("name '{arg}' is not defined");
                self.raise(parent, "NameError", &evalue).await;
                return Step::Failed;
            };
            self.emit(parent, ExecutionEvent::Stream {
                name: "stdout".to_string(),
                text: format!("{text}\n"),
            })
            .await;
            return Step::Continue;
        }

        if let Some(rest) = statement.strip_prefix("raise ") {
            let (ename, evalue) = match rest.split_once('(') {
                Some((name, arg)) => (name, unquote(arg.trim_end_matches(')'))),
                None => (rest, ""),
            };
            self.raise(parent, ename, evalue).await;
            return Step::Failed;
        }

        if let Some((name, value)) = statement.split_once(" = ") {
            self.vars
                .insert(name.trim().to_string(), unquote(value.trim()).to_string());
        }
        Step::Continue
    }

    async fn raise(&self, parent: Option<&str>, ename: &str, evalue: &str) {
        self.emit(parent, ExecutionEvent::Error {
            ename: ename.to_string(),
            evalue: evalue.to_string(),
            traceback: vec![
                "Traceback (most recent call last):".to_string(),
                format!("{ename}: {evalue}"),
            ],
        })
        .await;
    }

    async fn emit(&self, parent: Option<&str>, event: ExecutionEvent) {
        let line = encode_event(parent, &event);
        let _ = self.events.send(line.trim_end().to_string()).await;
    }
}

fn call_arg<'a>(statement: &'a str, function: &str) -> Option<&'a str> {
    statement
        .strip_prefix(function)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn is_quoted(arg: &str) -> bool {
    arg.len() >= 2
        && ((arg.starts_with('\'') && arg.ends_with('\''))
            || (arg.starts_with('"') && arg.ends_with('"')))
}

fn unquote(arg: &str) -> &str {
    if is_quoted(arg) {
        &arg[1..arg.len() - 1]
    } else {
        arg
    }
}
