//! In-flight admission gate shared by both ingress modes.

use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds the number of governance cycles in flight at once.
///
/// Push mode rejects with 503 when no slot is free; pull mode waits for a
/// slot, which naturally slows the poll loop instead of dropping work.
#[derive(Debug, Clone)]
pub struct InflightGate {
    semaphore: Arc<Semaphore>,
    limit: NonZeroUsize,
}

impl InflightGate {
    /// Creates a gate admitting at most `limit` concurrent cycles.
    #[must_use]
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit.get())),
            limit,
        }
    }

    /// Returns the configured limit.
    #[must_use]
    pub const fn limit(&self) -> NonZeroUsize {
        self.limit
    }

    /// Returns the number of free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Attempts to claim a slot without waiting (push mode).
    #[must_use]
    pub fn try_enter(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    /// Waits for a slot (pull mode).
    ///
    /// Returns `None` only if the gate is closed, which does not happen
    /// during normal operation.
    pub async fn enter(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }
}

impl Default for InflightGate {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(64).expect("non-zero"))
    }
}
