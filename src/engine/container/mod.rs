//! Container module - Isolation boundary abstraction
//!
//! This module provides a minimal interface over the container runtime:
//! - Container creation with the fixed isolation profile
//! - Stdio attachment (output frames + stdin writer)
//! - Start, wait, forced kill and forced removal
//!
//! The container module does NOT:
//! - Track run status (that's the orchestrator's job)
//! - Know about languages or the client protocol
//! - Enforce the wall-clock timeout

pub mod docker;
#[cfg(test)]
pub mod fake;

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::io::AsyncWrite;

use crate::config::IsolationProfile;
use crate::core::ExecutionResult;

pub use docker::DockerRuntime;

/// Mount point of the run workspace inside the container
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Everything needed to create one isolated container
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    /// Container name (derived from the run id)
    pub name: String,
    /// Runner image
    pub image: String,
    /// Shell command, run as `sh -c <command>`
    pub command: String,
    /// Host directory bind-mounted at [`WORKSPACE_MOUNT`]
    pub workspace: PathBuf,
    /// Resource limits
    pub profile: IsolationProfile,
}

/// One frame of container output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFrame {
    Stdout(String),
    Stderr(String),
}

pub type OutputStream = Pin<Box<dyn Stream<Item = ExecutionResult<OutputFrame>> + Send>>;

/// Attached stdio of a container
pub struct ContainerIo {
    /// Multiplexed stdout/stderr frames, in arrival order per stream
    pub output: OutputStream,
    /// Container standard input
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Container lifecycle operations used by the orchestrator
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container; returns its id
    async fn create(&self, request: &ContainerRequest) -> ExecutionResult<String>;

    /// Attach to stdin/stdout/stderr
    async fn attach(&self, container_id: &str) -> ExecutionResult<ContainerIo>;

    async fn start(&self, container_id: &str) -> ExecutionResult<()>;

    /// Wait for the container to exit; returns the exit code
    async fn wait(&self, container_id: &str) -> ExecutionResult<i64>;

    /// Forcefully terminate the container
    async fn kill(&self, container_id: &str) -> ExecutionResult<()>;

    /// Forcefully remove the container (killing it if still running)
    async fn remove(&self, container_id: &str) -> ExecutionResult<()>;
}
