//! Bounded worker pools.
//!
//! `queue_or_error` never waits: if every worker is busy and the queue is
//! full the task is rejected and the caller decides what that means.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use crate::error::PoolError;

pub trait Pool: Send + Sync {
    fn queue_or_error(&self, task: BoxFuture<'static, ()>) -> Result<(), PoolError>;
}

pub struct WorkerPool {
    name: String,
    /// Running plus queued tasks.
    slots: Arc<Semaphore>,
    /// Running tasks.
    workers: Arc<Semaphore>,
    capacity: usize,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(name: &str, workers: usize, queue: usize) -> Self {
        let workers = workers.max(1);
        tracing::debug!(pool = name, workers, queue, "worker pool created");
        Self {
            name: name.to_string(),
            slots: Arc::new(Semaphore::new(workers + queue)),
            workers: Arc::new(Semaphore::new(workers)),
            capacity: workers + queue,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tasks currently running or waiting for a worker.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.slots.available_permits())
    }

    /// Reject new work. Running and queued tasks are left to finish.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.slots.close();
    }
}

impl Pool for WorkerPool {
    fn queue_or_error(&self, task: BoxFuture<'static, ()>) -> Result<(), PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed(self.name.clone()));
        }
        let slot = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(tokio::sync::TryAcquireError::Closed) => {
                return Err(PoolError::Closed(self.name.clone()))
            }
            Err(tokio::sync::TryAcquireError::NoPermits) => {
                return Err(PoolError::Saturated(self.name.clone()))
            }
        };

        let workers = self.workers.clone();
        tokio::spawn(async move {
            let _slot = slot;
            let Ok(_worker) = workers.acquire_owned().await else {
                return;
            };
            task.await;
        });
        Ok(())
    }
}
