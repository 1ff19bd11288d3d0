//! Channel module - Streaming protocol between a run and its client
//!
//! This module provides:
//! - The wire messages exchanged over the per-run WebSocket
//! - The `EventSink` seam through which the orchestrator publishes events
//! - `ChannelHub`, the sink implementation backing the WebSocket endpoint
//!
//! Delivery is best effort: events for a run without an attached client are
//! dropped, and publishing never blocks the orchestrator.

pub mod hub;

pub use hub::{ChannelHub, Outbound};

use serde::{Deserialize, Serialize};

use crate::core::ExecutionStatus;

/// Server -> client message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerEvent {
    Status(ExecutionStatus),
    Stdout(String),
    Stderr(String),
    /// Exit code, as a decimal string
    Exit(String),
    Error(String),
}

impl ServerEvent {
    pub fn to_json(&self) -> String {
        // Every variant holds a string or a unit enum
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Client -> server message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Input {
        #[serde(default)]
        data: String,
    },
    Stop,
}

impl ClientMessage {
    /// Parse a text frame; `None` for malformed or unknown messages
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Where the orchestrator sends run events
pub trait EventSink: Send + Sync {
    /// Deliver `event` to the client attached to `run_id`, if any
    fn publish(&self, run_id: &str, event: ServerEvent);

    /// Detach and close the client channel for `run_id`
    fn close(&self, run_id: &str);
}
