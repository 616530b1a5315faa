use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::Semaphore, task::JoinHandle, time::timeout};

/// Runs delivery handlers with at most `size` of them in flight.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);

        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a free worker, then runs `task` on it. Returns `None` once
    /// the pool is closed.
    pub async fn spawn<F>(&self, task: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok()?;

        Some(tokio::spawn(async move {
            let output = task.await;
            drop(permit);
            output
        }))
    }

    /// Waits up to `grace` for every running task to finish.
    pub async fn drain(&self, grace: Duration) -> bool {
        matches!(
            timeout(grace, self.permits.acquire_many(self.size as u32)).await,
            Ok(Ok(_))
        )
    }

    pub fn close(&self) {
        self.permits.close();
    }
}
