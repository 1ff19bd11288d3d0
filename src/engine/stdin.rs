//! Stdin conduit between client input and a container's standard input
//!
//! The conduit has two ends that close independently:
//! - `StdinSink` (write end) is stored on the session and fed by client input.
//! - `StdinPump` (read end) drains queued chunks into the container attachment.
//!
//! Dropping every sink ends the pump after it has flushed what was queued;
//! closing the pump makes further sends fail, which callers ignore.
//! Writes never wait: input for a program that stopped reading its stdin is
//! dropped once the queue is full.

use std::pin::Pin;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::debug;

/// Chunks that may wait in the conduit before further input is dropped
const STDIN_QUEUE_DEPTH: usize = 64;

/// Why a write was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StdinRejected {
    #[error("stdin queue is full")]
    Full,
    #[error("stdin is closed")]
    Closed,
}

/// Write end of a stdin conduit
#[derive(Debug, Clone)]
pub struct StdinSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl StdinSink {
    /// Create a sink together with the receiving side of its queue
    pub fn channel() -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(STDIN_QUEUE_DEPTH);
        (Self { tx }, rx)
    }

    /// Queue UTF-8 text for the container without waiting
    pub fn write(&self, text: &str) -> Result<(), StdinRejected> {
        self.tx
            .try_send(text.as_bytes().to_vec())
            .map_err(|e| match e {
                TrySendError::Full(_) => StdinRejected::Full,
                TrySendError::Closed(_) => StdinRejected::Closed,
            })
    }
}

/// Read end of a stdin conduit
#[derive(Debug)]
pub struct StdinPump {
    handle: JoinHandle<()>,
}

impl StdinPump {
    /// Spawn a pump writing queued chunks into `writer`, flushing each one
    pub fn spawn(
        run_id: &str,
        mut rx: mpsc::Receiver<Vec<u8>>,
        mut writer: Pin<Box<dyn AsyncWrite + Send>>,
    ) -> Self {
        let run_id = run_id.to_string();
        let handle = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = writer.write_all(&chunk).await {
                    debug!("Stdin write failed for run {}: {}", run_id, e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    debug!("Stdin flush failed for run {}: {}", run_id, e);
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });
        Self { handle }
    }

    /// Close the read end immediately
    pub fn close(self) {
        self.handle.abort();
    }
}

/// Open a conduit onto `writer`
pub fn conduit(run_id: &str, writer: Pin<Box<dyn AsyncWrite + Send>>) -> (StdinSink, StdinPump) {
    let (sink, rx) = StdinSink::channel();
    let pump = StdinPump::spawn(run_id, rx, writer);
    (sink, pump)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_input_reaches_writer_in_order() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let (sink, _pump) = conduit("run-1", Box::pin(writer));

        assert!(sink.write("first\n").is_ok());
        assert!(sink.write("second\nthird\n").is_ok());
        drop(sink);

        let mut received = String::new();
        reader.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "first\nsecond\nthird\n");
    }

    #[tokio::test]
    async fn test_write_after_close_is_rejected() {
        let (writer, _reader) = tokio::io::duplex(1024);
        let (sink, pump) = conduit("run-1", Box::pin(writer));

        pump.close();
        tokio::task::yield_now().await;

        // The aborted pump drops its receiver; give the runtime a moment
        let mut result = Ok(());
        for _ in 0..10 {
            result = sink.write("late");
            if result.is_err() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(result, Err(StdinRejected::Closed));
    }

    #[tokio::test]
    async fn test_write_to_stalled_reader_never_waits() {
        // Nobody reads the other end, so the pump stalls once the pipe fills
        let (writer, _reader) = tokio::io::duplex(16);
        let (sink, _pump) = conduit("run-1", Box::pin(writer));
        let chunk = "x".repeat(1024);

        let results: Vec<_> = (0..STDIN_QUEUE_DEPTH * 2)
            .map(|_| sink.write(&chunk))
            .collect();

        assert!(results.contains(&Err(StdinRejected::Full)));
        assert!(!results.contains(&Err(StdinRejected::Closed)));
    }
}
