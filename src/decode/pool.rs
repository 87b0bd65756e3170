//! Bounded background worker pool
//!
//! Blocking work (catalog queries, file and media decodes) runs on tokio's
//! blocking threads. A semaphore caps how many of those jobs run at once;
//! everything past the cap waits for a permit instead of piling onto the
//! blocking pool.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    /// Create a pool that runs at most `max_workers` jobs concurrently on
    /// the runtime behind `handle`
    pub fn new(handle: Handle, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Create a pool on the runtime the caller is running in.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current(max_workers: usize) -> Self {
        Self::new(Handle::current(), max_workers)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Jobs currently holding a permit
    pub fn running(&self) -> usize {
        self.max_workers - self.permits.available_permits()
    }

    /// Queue `job` for execution. It runs once a permit is free.
    ///
    /// The job reports its own result; a panic inside it is logged and
    /// goes no further.
    pub fn spawn<F>(&self, task: &'static str, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                debug!(task, "worker pool closed, job dropped");
                return;
            };
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                error!(task, error = %e, "background job failed");
            }
        });
    }

    /// Stop admitting jobs. Queued jobs that have no permit yet are dropped
    /// without running; anything they own is dropped with them.
    pub fn close(&self) {
        self.permits.close();
    }
}
