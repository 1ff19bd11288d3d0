//! Session module - Per-run lifecycle state
//!
//! An `ExecutionSession` is created when a run is accepted and is mutated
//! only by the orchestrator. Other actors (the streaming channel, the
//! diagnostics endpoint) read it through the `SessionRegistry`.

pub mod registry;

pub use registry::SessionRegistry;

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::core::ExecutionStatus;
use crate::engine::stdin::StdinSink;

#[derive(Debug)]
struct SessionState {
    status: ExecutionStatus,
    container_id: Option<String>,
    stdin: Option<StdinSink>,
}

/// Mutable record of one run
#[derive(Debug)]
pub struct ExecutionSession {
    run_id: String,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

impl ExecutionSession {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            created_at: Utc::now(),
            state: Mutex::new(SessionState {
                status: ExecutionStatus::Ready,
                container_id: None,
                stdin: None,
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> ExecutionStatus {
        self.lock().status
    }

    pub fn container_id(&self) -> Option<String> {
        self.lock().container_id.clone()
    }

    /// Write end of the stdin conduit, if a container is attached
    pub fn stdin(&self) -> Option<StdinSink> {
        self.lock().stdin.clone()
    }

    pub fn has_stdin(&self) -> bool {
        self.lock().stdin.is_some()
    }

    /// `READY -> RUNNING`, attaching the container and its stdin together.
    ///
    /// `announce` runs before the transition is released, so anything it
    /// publishes precedes a concurrent terminal transition's events.
    ///
    /// Returns `false` (and attaches nothing) if the session already left
    /// `READY`, e.g. because a stop arrived before the container started.
    pub fn activate(&self, container_id: &str, stdin: StdinSink, announce: impl FnOnce()) -> bool {
        let mut state = self.lock();
        if state.status != ExecutionStatus::Ready {
            return false;
        }
        state.status = ExecutionStatus::Running;
        state.container_id = Some(container_id.to_string());
        state.stdin = Some(stdin);
        announce();
        true
    }

    /// Apply a terminal status unless one is already set.
    ///
    /// First terminal transition wins; returns whether this call applied it.
    pub fn finish(&self, status: ExecutionStatus) -> bool {
        debug_assert!(status.is_terminal());
        let mut state = self.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        true
    }

    /// Clear container and stdin; later input is dropped
    pub fn detach(&self) {
        let mut state = self.lock();
        state.container_id = None;
        state.stdin = None;
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // State stays consistent across a panicking holder; every write is a
        // single field assignment.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
