use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Bounded executor for work that must stay off watch-delivery and transport paths.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        WorkerPool { permits: Arc::new(Semaphore::new(size.max(1))) }
    }

    /// Spawns immediately; the future starts running once a permit is free.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // The semaphore is never closed, so `acquire_owned` cannot fail.
            let _permit = permits.acquire_owned().await.ok();
            fut.await
        })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
