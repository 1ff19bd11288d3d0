//! Per-run client attachments

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::{EventSink, ServerEvent};

/// What the WebSocket writer receives
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    Close,
}

struct Attachment {
    id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Routes run events to the WebSocket attached to each run
#[derive(Default)]
pub struct ChannelHub {
    attachments: DashMap<String, Attachment>,
    next_id: AtomicU64,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client to `run_id`, replacing any previous attachment.
    ///
    /// Returns the attachment id (for `detach`) and the receiving end.
    pub fn attach(&self, run_id: &str) -> (u64, mpsc::UnboundedReceiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(previous) = self
            .attachments
            .insert(run_id.to_string(), Attachment { id, tx })
        {
            debug!("Replacing client attachment for run {}", run_id);
            let _ = previous.tx.send(Outbound::Close);
        }

        (id, rx)
    }

    /// Drop the attachment if it is still the one identified by `id`
    pub fn detach(&self, run_id: &str, id: u64) {
        self.attachments.remove_if(run_id, |_, a| a.id == id);
    }

    #[cfg(test)]
    pub fn is_attached(&self, run_id: &str) -> bool {
        self.attachments.contains_key(run_id)
    }
}

impl EventSink for ChannelHub {
    fn publish(&self, run_id: &str, event: ServerEvent) {
        if let Some(attachment) = self.attachments.get(run_id) {
            if attachment.tx.send(Outbound::Event(event)).is_err() {
                debug!("Client for run {} is gone; event dropped", run_id);
            }
        }
    }

    fn close(&self, run_id: &str) {
        if let Some((_, attachment)) = self.attachments.remove(run_id) {
            let _ = attachment.tx.send(Outbound::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExecutionStatus;

    #[test]
    fn test_publish_reaches_attached_client() {
        let hub = ChannelHub::new();
        let (_, mut rx) = hub.attach("run-1");

        hub.publish("run-1", ServerEvent::Status(ExecutionStatus::Running));
        hub.publish("run-2", ServerEvent::Stdout("elsewhere".to_string()));

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Event(ServerEvent::Status(ExecutionStatus::Running))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_client_is_dropped() {
        let hub = ChannelHub::new();
        hub.publish("run-1", ServerEvent::Stdout("lost".to_string()));
        assert!(!hub.is_attached("run-1"));
    }

    #[test]
    fn test_close_detaches_and_signals() {
        let hub = ChannelHub::new();
        let (_, mut rx) = hub.attach("run-1");

        hub.close("run-1");

        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(!hub.is_attached("run-1"));
        hub.publish("run-1", ServerEvent::Stdout("late".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_newer_attachment_replaces_older() {
        let hub = ChannelHub::new();
        let (old_id, mut old_rx) = hub.attach("run-1");
        let (_, mut new_rx) = hub.attach("run-1");

        assert_eq!(old_rx.try_recv().unwrap(), Outbound::Close);

        // A stale detach must not remove the newer attachment
        hub.detach("run-1", old_id);
        assert!(hub.is_attached("run-1"));

        hub.publish("run-1", ServerEvent::Stderr("err".to_string()));
        assert_eq!(
            new_rx.try_recv().unwrap(),
            Outbound::Event(ServerEvent::Stderr("err".to_string()))
        );
    }
}
