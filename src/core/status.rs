use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Ready,
    Running,
    Finished,
    Stopped,
    Timeout,
    Error,
}

impl ExecutionStatus {
    /// Terminal states are never overwritten once reached
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Ready | ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Ready => "READY",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Finished => "FINISHED",
            ExecutionStatus::Stopped => "STOPPED",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}
