//! Run orchestrator
//!
//! `ExecutionService` accepts run requests and drives each run on its own
//! tokio task: admission, workspace, container, stdio wiring, the timed exit
//! wait, and teardown. Status changes go through the session's check-and-set
//! transitions, so exactly one terminal status is published per run.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel::{EventSink, ServerEvent};
use crate::config::{IsolationProfile, ServerConfig};
use crate::core::{ExecutionError, ExecutionResult, ExecutionStatus, LanguageSpecFactory};
use crate::engine::admission::{AdmissionGate, AdmissionPermit};
use crate::engine::container::{ContainerRequest, ContainerRuntime, OutputFrame, OutputStream};
use crate::engine::stdin::{self, StdinPump};
use crate::engine::workspace::Workspace;
use crate::session::{ExecutionSession, SessionRegistry};

/// How long a finished container's output may keep trickling in before the
/// exit is reported
const OUTPUT_DRAIN_WINDOW: Duration = Duration::from_secs(2);

/// Body of `POST /api/execute`
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub language: String,
    #[serde(default)]
    pub code: String,
    /// Sent to stdin right after the program starts
    #[serde(default)]
    pub input: Option<String>,
}

/// Point-in-time view of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: ExecutionStatus,
    /// Only set while the run is live
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin_attached: Option<bool>,
}

/// Resources a run acquires, released by `teardown`
#[derive(Default)]
struct RunResources {
    permit: Option<AdmissionPermit>,
    workspace: Option<Workspace>,
    container_id: Option<String>,
    output_task: Option<JoinHandle<()>>,
    stdin_pump: Option<StdinPump>,
}

pub struct ExecutionService {
    runtime: Arc<dyn ContainerRuntime>,
    languages: LanguageSpecFactory,
    registry: SessionRegistry,
    events: Arc<dyn EventSink>,
    gate: AdmissionGate,
    profile: IsolationProfile,
    workspace_root: Option<PathBuf>,
    drain_window: Duration,
}

impl ExecutionService {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        languages: LanguageSpecFactory,
        events: Arc<dyn EventSink>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            runtime,
            languages,
            registry: SessionRegistry::new(config.outcome_retention),
            events,
            gate: AdmissionGate::new(config.max_concurrent_runs),
            profile: config.isolation.clone(),
            workspace_root: config.workspace_root.clone(),
            drain_window: OUTPUT_DRAIN_WINDOW,
        }
    }

    #[cfg(test)]
    pub fn with_drain_window(mut self, drain_window: Duration) -> Self {
        self.drain_window = drain_window;
        self
    }

    /// Register a new run and schedule it. Returns the run id immediately.
    pub fn start(self: &Arc<Self>, request: ExecuteRequest) -> String {
        let run_id = Uuid::new_v4().to_string();
        let session = Arc::new(ExecutionSession::new(run_id.clone()));

        self.registry.insert(Arc::clone(&session));
        self.events
            .publish(&run_id, ServerEvent::Status(ExecutionStatus::Ready));
        info!(
            "Accepted run {} (language={}, {} bytes)",
            run_id,
            request.language,
            request.code.len()
        );

        tokio::spawn(Arc::clone(self).execute(session, request));
        run_id
    }

    /// Forward client input to the run's stdin. No-op if the run is gone or
    /// has no container attached. Never waits on the program.
    pub fn send_input(&self, run_id: &str, text: &str) {
        let Some(stdin) = self.registry.get(run_id).and_then(|s| s.stdin()) else {
            debug!("Dropping input for run {}: no stdin attached", run_id);
            return;
        };
        if let Err(e) = stdin.write(text) {
            debug!("Dropping input for run {}: {}", run_id, e);
        }
    }

    /// Stop a run. No-op if the run is gone or already terminal.
    pub async fn stop(&self, run_id: &str) {
        let Some(session) = self.registry.get(run_id) else {
            debug!("Ignoring stop for unknown run {}", run_id);
            return;
        };
        if !session.finish(ExecutionStatus::Stopped) {
            debug!("Ignoring stop for run {}: already {}", run_id, session.status());
            return;
        }

        self.events
            .publish(run_id, ServerEvent::Status(ExecutionStatus::Stopped));
        info!("Run {} stopped by client", run_id);

        if let Some(container_id) = session.container_id() {
            if let Err(e) = self.runtime.kill(&container_id).await {
                warn!("Failed to kill container for run {}: {}", run_id, e);
            }
        }
    }

    /// Current status of a live run, or the retained outcome of a finished one
    /// Close admission. Runs still queued for a slot end as `ERROR`; running
    /// ones are left to finish.
    pub fn shutdown(&self) {
        self.gate.close();
        info!(
            "Admission closed with {} run(s) still registered",
            self.registry.len()
        );
    }

    pub fn status_of(&self, run_id: &str) -> Option<ExecutionStatus> {
        self.registry.status_of(run_id)
    }

    /// Whether the run still holds resources
    pub fn is_live(&self, run_id: &str) -> bool {
        self.registry.get(run_id).is_some()
    }

    pub fn snapshot(&self, run_id: &str) -> Option<RunSnapshot> {
        if let Some(session) = self.registry.get(run_id) {
            return Some(RunSnapshot {
                run_id: run_id.to_string(),
                status: session.status(),
                created_at: Some(session.created_at()),
                stdin_attached: Some(session.has_stdin()),
            });
        }
        self.registry.outcome(run_id).map(|status| RunSnapshot {
            run_id: run_id.to_string(),
            status,
            created_at: None,
            stdin_attached: None,
        })
    }

    pub fn active_runs(&self) -> usize {
        self.registry.len()
    }

    pub fn available_slots(&self) -> usize {
        self.gate.available()
    }

    pub fn supported_languages(&self) -> &[String] {
        self.languages.supported_languages()
    }

    async fn execute(self: Arc<Self>, session: Arc<ExecutionSession>, request: ExecuteRequest) {
        let mut resources = RunResources::default();

        let outcome = AssertUnwindSafe(self.run(&session, &request, &mut resources))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fail(&session, &e.to_string()),
            Err(_) => self.fail(&session, "Internal error while executing run"),
        }

        self.teardown(&session, resources).await;
    }

    async fn run(
        &self,
        session: &Arc<ExecutionSession>,
        request: &ExecuteRequest,
        resources: &mut RunResources,
    ) -> ExecutionResult<()> {
        let run_id = session.run_id();

        resources.permit = Some(self.gate.acquire().await?);
        if session.status().is_terminal() {
            info!("Run {} ended while waiting for admission", run_id);
            return Ok(());
        }

        let spec = self.languages.get_spec(&request.language)?;

        let workspace = resources
            .workspace
            .insert(Workspace::create(run_id, self.workspace_root.as_deref())?);
        workspace.write_source(&spec.file_name, &request.code).await?;

        let container_request = ContainerRequest {
            name: format!("run-{}", run_id),
            image: spec.image,
            command: spec.command,
            workspace: workspace.path().to_path_buf(),
            profile: self.profile.clone(),
        };
        let container_id = self.runtime.create(&container_request).await?;
        resources.container_id = Some(container_id.clone());

        let io = self.runtime.attach(&container_id).await?;
        let (stdin, pump) = stdin::conduit(run_id, io.input);
        resources.stdin_pump = Some(pump);
        resources.output_task = Some(self.forward_output(Arc::clone(session), io.output));

        self.runtime.start(&container_id).await?;

        let activated = session.activate(&container_id, stdin.clone(), || {
            self.events
                .publish(run_id, ServerEvent::Status(ExecutionStatus::Running));
        });
        if !activated {
            info!("Run {} was stopped before its program started", run_id);
            return Ok(());
        }
        info!(
            "Run {} running in container {} ({})",
            run_id, container_id, container_request.image
        );

        if let Some(input) = request.input.as_deref().filter(|i| !i.trim().is_empty()) {
            let mut line = input.to_string();
            if !line.ends_with('\n') {
                line.push('\n');
            }
            if let Err(e) = stdin.write(&line) {
                debug!("Inline input for run {} was not delivered: {}", run_id, e);
            }
        }
        drop(stdin);

        match self.wait_with_timeout(&container_id).await {
            Ok(exit_code) => {
                self.complete(session, exit_code, resources).await;
                Ok(())
            }
            Err(ExecutionError::Timeout) => {
                self.expire(session, &container_id).await;
                Ok(())
            }
            // The wait may fail because a stop removed the container under it
            Err(_) if session.status().is_terminal() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn wait_with_timeout(&self, container_id: &str) -> ExecutionResult<i64> {
        tokio::time::timeout(self.profile.timeout, self.runtime.wait(container_id))
            .await
            .map_err(|_| ExecutionError::Timeout)?
    }

    fn forward_output(
        &self,
        session: Arc<ExecutionSession>,
        mut output: OutputStream,
    ) -> JoinHandle<()> {
        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            let run_id = session.run_id();
            while let Some(frame) = output.next().await {
                // Output racing a stop or timeout is not shown
                if session.status().is_terminal() {
                    break;
                }
                match frame {
                    Ok(OutputFrame::Stdout(text)) => {
                        events.publish(run_id, ServerEvent::Stdout(text))
                    }
                    Ok(OutputFrame::Stderr(text)) => {
                        events.publish(run_id, ServerEvent::Stderr(text))
                    }
                    Err(e) => {
                        debug!("Output stream for run {} ended: {}", run_id, e);
                        break;
                    }
                }
            }
        })
    }

    /// Natural exit
    async fn complete(
        &self,
        session: &ExecutionSession,
        exit_code: i64,
        resources: &mut RunResources,
    ) {
        let run_id = session.run_id();

        if let Some(task) = resources.output_task.as_mut() {
            if tokio::time::timeout(self.drain_window, task).await.is_err() {
                debug!("Output for run {} still open after exit", run_id);
            }
        }

        if session.finish(ExecutionStatus::Finished) {
            self.events
                .publish(run_id, ServerEvent::Exit(exit_code.to_string()));
            self.events
                .publish(run_id, ServerEvent::Status(ExecutionStatus::Finished));
            info!("Run {} finished with exit code {}", run_id, exit_code);
        }
    }

    async fn expire(&self, session: &ExecutionSession, container_id: &str) {
        let run_id = session.run_id();

        if session.finish(ExecutionStatus::Timeout) {
            self.events
                .publish(run_id, ServerEvent::Status(ExecutionStatus::Timeout));
            warn!(
                "Run {} timed out after {:?}",
                run_id, self.profile.timeout
            );
        }

        if let Err(e) = self.runtime.kill(container_id).await {
            warn!("Failed to kill timed out run {}: {}", run_id, e);
        }
    }

    fn fail(&self, session: &ExecutionSession, message: &str) {
        let run_id = session.run_id();

        if session.finish(ExecutionStatus::Error) {
            self.events
                .publish(run_id, ServerEvent::Status(ExecutionStatus::Error));
            self.events
                .publish(run_id, ServerEvent::Error(message.to_string()));
        }
        error!("Run {} failed: {}", run_id, message);
    }

    async fn teardown(&self, session: &ExecutionSession, mut resources: RunResources) {
        let run_id = session.run_id();

        if let Some(task) = resources.output_task.take() {
            task.abort();
        }

        session.detach();
        if let Some(pump) = resources.stdin_pump.take() {
            pump.close();
        }

        if let Some(container_id) = resources.container_id.take() {
            if let Err(e) = self.runtime.remove(&container_id).await {
                warn!("Failed to remove container for run {}: {}", run_id, e);
            }
        }

        if let Some(workspace) = resources.workspace.take() {
            if let Err(e) = workspace.cleanup() {
                warn!("Failed to remove workspace for run {}: {}", run_id, e);
            }
        }

        if !session.status().is_terminal() {
            self.fail(session, "Run ended without a result");
        }

        self.registry.remove(run_id);
        self.events.close(run_id);
        drop(resources.permit.take());

        debug!("Run {} torn down", run_id);
    }
}
