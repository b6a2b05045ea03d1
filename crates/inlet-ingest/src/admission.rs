//! Non-blocking concurrency cap on in-flight processing.
//!
//! A saturated gate answers "busy" immediately instead of queueing, so load
//! spikes turn into 503s rather than an unbounded backlog.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Fixed-capacity gate over a tokio [`Semaphore`].
#[derive(Debug)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Proof of admission. The slot is released when the permit is dropped,
/// which happens exactly once on every exit path.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot if one is free; `None` means the gate is saturated.
    pub fn try_enter(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Wait until every slot has been returned, or `timeout` elapses.
    ///
    /// Returns `true` when the gate drained. Used at shutdown to let
    /// in-flight dispatches finish; the drained slots are handed back
    /// before returning.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        match tokio::time::timeout(timeout, self.semaphore.acquire_many(all)).await {
            Ok(Ok(_permits)) => true,
            Ok(Err(_closed)) => true,
            Err(_elapsed) => false,
        }
    }
}
