use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, SemaphorePermit};

/// Counting permit bounding concurrent file handles.
///
/// Cloning shares the underlying semaphore, so one instance can be handed to
/// every component writing under the same cache root.
#[derive(Debug, Clone)]
pub struct IoPermits {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl IoPermits {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit. The semaphore is never closed, so this only
    /// returns `None` if that invariant is broken.
    pub async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.semaphore.acquire().await.ok()
    }

    /// Owned variant for work moved into spawned tasks
    pub async fn acquire_owned(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for IoPermits {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1);
        Self::new(cores * 2)
    }
}
