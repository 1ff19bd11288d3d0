//! Concurrent store of live sessions
//!
//! Sessions are keyed by run id in a sharded map, so lookups for unrelated
//! runs never contend on a single lock. When a session is removed its
//! terminal status is kept for a retention window so a client attaching
//! after the run ended can still learn how it ended.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::ExecutionSession;
use crate::core::ExecutionStatus;

#[derive(Debug, Clone, Copy)]
struct RetainedOutcome {
    status: ExecutionStatus,
    removed_at: Instant,
}

/// Registry of live sessions plus recently finished outcomes
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<ExecutionSession>>,
    outcomes: DashMap<String, RetainedOutcome>,
    retention: Duration,
}

impl SessionRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            outcomes: DashMap::new(),
            retention,
        }
    }

    pub fn insert(&self, session: Arc<ExecutionSession>) {
        self.sessions.insert(session.run_id().to_string(), session);
    }

    pub fn get(&self, run_id: &str) -> Option<Arc<ExecutionSession>> {
        self.sessions.get(run_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a live session, retaining its terminal status
    pub fn remove(&self, run_id: &str) -> Option<Arc<ExecutionSession>> {
        let (_, session) = self.sessions.remove(run_id)?;

        self.prune_outcomes();

        let status = session.status();
        if status.is_terminal() {
            self.outcomes.insert(
                run_id.to_string(),
                RetainedOutcome {
                    status,
                    removed_at: Instant::now(),
                },
            );
        }

        debug!("Removed session {} (status {})", run_id, status);
        Some(session)
    }

    /// Terminal status of a run that has already been torn down
    pub fn outcome(&self, run_id: &str) -> Option<ExecutionStatus> {
        let outcome = *self.outcomes.get(run_id)?;
        if outcome.removed_at.elapsed() >= self.retention {
            self.outcomes.remove(run_id);
            return None;
        }
        Some(outcome.status)
    }

    /// Current status of a live run, or the retained outcome of a finished one
    pub fn status_of(&self, run_id: &str) -> Option<ExecutionStatus> {
        match self.get(run_id) {
            Some(session) => Some(session.status()),
            None => self.outcome(run_id),
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn prune_outcomes(&self) {
        let retention = self.retention;
        self.outcomes
            .retain(|_, outcome| outcome.removed_at.elapsed() < retention);
    }
}
