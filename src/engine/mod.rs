//! Engine module - Runs untrusted programs in containers
//!
//! - `admission`: bounds how many runs hold isolation resources at once
//! - `workspace`: per-run temp directory holding the source file
//! - `container`: container runtime seam and its Docker implementation
//! - `stdin`: conduit from client input to container stdin
//! - `executer`: the orchestrator tying them together

pub mod admission;
pub mod container;
pub mod executer;
pub mod stdin;
pub mod workspace;

pub use executer::{ExecuteRequest, ExecutionService, RunSnapshot};
