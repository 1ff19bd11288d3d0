//! Scripted in-memory runtime for orchestrator tests

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{ContainerIo, ContainerRequest, ContainerRuntime, OutputFrame};
use crate::core::{ExecutionError, ExecutionResult};

/// Exit code reported for killed containers (128 + SIGKILL)
pub const KILLED_EXIT_CODE: i64 = 137;

/// What a fake container does once started
#[derive(Debug, Clone)]
pub enum Script {
    /// Echo the first stdin line to stdout, then exit 0
    EchoLine,
    /// Print to both streams, then exit with `exit_code`
    Output {
        stdout: &'static str,
        stderr: &'static str,
        exit_code: i64,
    },
    /// Sleep, then exit 0
    Sleep(Duration),
    /// Run until killed
    Hang,
}

type FrameSender = mpsc::UnboundedSender<ExecutionResult<OutputFrame>>;

struct FakeContainer {
    output_tx: Option<FrameSender>,
    output_rx: Option<mpsc::UnboundedReceiver<ExecutionResult<OutputFrame>>>,
    stdin_reader: Option<DuplexStream>,
    stdin_writer: Option<DuplexStream>,
    exit: watch::Sender<Option<i64>>,
    task: Option<JoinHandle<()>>,
}

pub struct FakeRuntime {
    script: Script,
    fail_on: Option<&'static str>,
    next_id: AtomicUsize,
    containers: Mutex<HashMap<String, FakeContainer>>,
    requests: Mutex<Vec<ContainerRequest>>,
    sources: Mutex<HashMap<PathBuf, String>>,
    calls: Mutex<Vec<String>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl FakeRuntime {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            fail_on: None,
            next_id: AtomicUsize::new(0),
            containers: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            sources: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            max_live: AtomicUsize::new(0),
        }
    }

    /// Make `operation` fail for every container
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    pub fn requests(&self) -> Vec<ContainerRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Workspace files as seen at container creation
    pub fn sources(&self) -> HashMap<PathBuf, String> {
        self.sources.lock().unwrap().clone()
    }

    /// Calls made, as "operation container_id"
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .count()
    }

    /// Most containers alive at the same time
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    fn record(&self, operation: &'static str, container_id: &str) -> ExecutionResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", operation, container_id));
        if self.fail_on == Some(operation) {
            return Err(ExecutionError::container(operation, "injected failure"));
        }
        Ok(())
    }

    fn with_container<T>(
        &self,
        operation: &'static str,
        container_id: &str,
        f: impl FnOnce(&mut FakeContainer) -> T,
    ) -> ExecutionResult<T> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| ExecutionError::container(operation, "no such container"))?;
        Ok(f(container))
    }

    fn set_exit(exit: &watch::Sender<Option<i64>>, code: i64) {
        exit.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(code);
                true
            } else {
                false
            }
        });
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, request: &ContainerRequest) -> ExecutionResult<String> {
        let id = format!("c-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.record("create", &id)?;

        self.requests.lock().unwrap().push(request.clone());
        if let Ok(entries) = std::fs::read_dir(&request.workspace) {
            let mut sources = self.sources.lock().unwrap();
            for entry in entries.flatten() {
                if let Ok(content) = std::fs::read_to_string(entry.path()) {
                    sources.insert(entry.path(), content);
                }
            }
        }

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (stdin_writer, stdin_reader) = tokio::io::duplex(4096);
        let (exit, _) = watch::channel(None);

        self.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer {
                output_tx: Some(output_tx),
                output_rx: Some(output_rx),
                stdin_reader: Some(stdin_reader),
                stdin_writer: Some(stdin_writer),
                exit,
                task: None,
            },
        );

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(id)
    }

    async fn attach(&self, container_id: &str) -> ExecutionResult<ContainerIo> {
        self.record("attach", container_id)?;
        let (rx, writer) = self.with_container("attach", container_id, |c| {
            (c.output_rx.take(), c.stdin_writer.take())
        })?;
        let (Some(rx), Some(writer)) = (rx, writer) else {
            return Err(ExecutionError::container("attach", "already attached"));
        };

        let output = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed();

        Ok(ContainerIo {
            output,
            input: Box::pin(writer),
        })
    }

    async fn start(&self, container_id: &str) -> ExecutionResult<()> {
        self.record("start", container_id)?;
        let script = self.script.clone();

        self.with_container("start", container_id, |c| {
            let output = c.output_tx.take();
            let stdin = c.stdin_reader.take();
            let exit = c.exit.clone();

            c.task = Some(tokio::spawn(async move {
                let Some(output) = output else { return };
                match script {
                    Script::EchoLine => {
                        let Some(stdin) = stdin else { return };
                        let mut line = String::new();
                        if BufReader::new(stdin).read_line(&mut line).await.is_ok() {
                            let _ = output.send(Ok(OutputFrame::Stdout(line)));
                        }
                        drop(output);
                        FakeRuntime::set_exit(&exit, 0);
                    }
                    Script::Output {
                        stdout,
                        stderr,
                        exit_code,
                    } => {
                        let _ = output.send(Ok(OutputFrame::Stdout(stdout.to_string())));
                        let _ = output.send(Ok(OutputFrame::Stderr(stderr.to_string())));
                        drop(output);
                        FakeRuntime::set_exit(&exit, exit_code);
                    }
                    Script::Sleep(duration) => {
                        tokio::time::sleep(duration).await;
                        drop(output);
                        FakeRuntime::set_exit(&exit, 0);
                    }
                    Script::Hang => {
                        let _stdin = stdin;
                        std::future::pending::<()>().await;
                    }
                }
            }));
        })
    }

    async fn wait(&self, container_id: &str) -> ExecutionResult<i64> {
        self.record("wait", container_id)?;
        let mut exit = self.with_container("wait", container_id, |c| c.exit.subscribe())?;
        let code = exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ExecutionError::container("wait", "container removed"))?;
        Ok((*code).unwrap_or_default())
    }

    async fn kill(&self, container_id: &str) -> ExecutionResult<()> {
        self.record("kill", container_id)?;
        self.with_container("kill", container_id, |c| {
            if let Some(task) = c.task.take() {
                task.abort();
            }
            c.output_tx = None;
            FakeRuntime::set_exit(&c.exit, KILLED_EXIT_CODE);
        })
    }

    async fn remove(&self, container_id: &str) -> ExecutionResult<()> {
        self.record("remove", container_id)?;
        let container = self.containers.lock().unwrap().remove(container_id);
        match container {
            Some(container) => {
                if let Some(task) = container.task {
                    task.abort();
                }
                self.live.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(ExecutionError::container("remove", "no such container")),
        }
    }
}
