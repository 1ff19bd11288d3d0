//! Error taxonomy for a single run
//!
//! Every variant is contained to the run that produced it. The orchestrator
//! maps them onto the session status; none of them is fatal to the server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Requested language has no execution spec
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Failure writing or removing the per-run workspace
    #[error("Workspace I/O failed ({context}): {source}")]
    WorkspaceIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Container create/start/attach/wait/kill/remove failure
    #[error("Container {operation} failed: {message}")]
    ContainerLifecycle {
        operation: &'static str,
        message: String,
    },

    /// Wall-clock limit elapsed while waiting for the container
    #[error("Execution timed out")]
    Timeout,

    /// Admission gate was shut down while waiting for a slot
    #[error("Admission gate closed")]
    AdmissionClosed,
}

impl ExecutionError {
    pub fn workspace(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::WorkspaceIo {
            context: context.into(),
            source,
        }
    }

    pub fn container(operation: &'static str, message: impl ToString) -> Self {
        Self::ContainerLifecycle {
            operation,
            message: message.to_string(),
        }
    }
}

pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;
