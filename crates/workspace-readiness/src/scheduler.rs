//! Shared delayed-task scheduler for probe attempts.
//!
//! Every probe attempt is a short-lived tokio task that sleeps for its
//! delay and then runs under a permit from a bounded semaphore, so a slow
//! network call holds up at most one permit instead of the whole queue.
//! A scheduled task is dropped without running when its cancel signal
//! fires first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::trace;

/// Cloneable handle to the shared probe scheduler.
///
/// `schedule` may be called concurrently from any number of coordinators.
#[derive(Debug, Clone)]
pub struct Scheduler {
    permits: Arc<Semaphore>,
}

impl Scheduler {
    /// Create a scheduler running at most `max_concurrent` tasks at a time.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Run `task` after `delay`, unless `cancel` turns `true` (or its
    /// sender is dropped) before the task acquires a permit.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(
        &self,
        delay: Duration,
        mut cancel: watch::Receiver<bool>,
        task: F,
    ) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let permit = tokio::select! {
                permit = async {
                    tokio::time::sleep(delay).await;
                    permits.acquire_owned().await
                } => permit,
                _ = cancel.wait_for(|cancelled| *cancelled) => {
                    trace!("scheduled task cancelled");
                    return;
                }
            };
            let Ok(_permit) = permit else {
                return;
            };
            task.await;
        })
    }

    /// Number of tasks that could start right now.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(16)
    }
}
