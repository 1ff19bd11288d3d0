//! Admission gate
//!
//! Bounds how many runs may hold isolation resources at once. Runs beyond
//! the capacity wait in their own task; the caller of `start` is never
//! blocked. A permit is released when it is dropped, which happens exactly
//! once on every exit path of a run. Closing the gate at shutdown fails every
//! run still waiting for a slot.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::{ExecutionError, ExecutionResult};

/// Counting gate with a fixed capacity
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
}

/// One admission slot; released on drop
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> ExecutionResult<AdmissionPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ExecutionError::AdmissionClosed)?;
        Ok(AdmissionPermit { _permit: permit })
    }

    /// Reject current and future waiters; held permits stay valid
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Slots not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let gate = AdmissionGate::new(2);

        let first = gate.acquire().await.unwrap();
        let _second = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);

        let mut third = task::spawn(gate.acquire());
        assert_pending!(third.poll());

        drop(first);
        assert!(third.is_woken());
        let permit = assert_ready!(third.poll()).unwrap();

        assert_eq!(gate.available(), 0);
        drop(permit);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_permit_released_on_early_exit() {
        let gate = AdmissionGate::new(1);

        let result: ExecutionResult<()> = async {
            let _permit = gate.acquire().await?;
            Err(ExecutionError::UnsupportedLanguage("cobol".to_string()))
        }
        .await;

        assert!(result.is_err());
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let gate = AdmissionGate::new(1);
        let held = gate.acquire().await.unwrap();

        let mut waiting = task::spawn(gate.acquire());
        assert_pending!(waiting.poll());

        gate.close();
        assert!(matches!(
            assert_ready!(waiting.poll()),
            Err(ExecutionError::AdmissionClosed)
        ));
        assert!(matches!(
            gate.acquire().await,
            Err(ExecutionError::AdmissionClosed)
        ));
        drop(held);
    }
}
