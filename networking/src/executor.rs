//! Bounded worker pools.
//!
//! Each pool is a fixed number of tokio tasks draining one bounded job
//! queue. A pool with a single worker runs its jobs strictly one after the
//! other, which is how the sync engine serialises block import.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{error, info_span, trace, warn, Instrument};

type Job = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("job queue is full")]
    QueueFull,
    #[error("worker pool is shut down")]
    ShutDown,
}

pub struct WorkerPool {
    name: &'static str,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing a queue of `capacity` jobs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: &'static str, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                tokio::spawn(
                    async move {
                        loop {
                            let job = receiver.lock().await.recv().await;
                            match job {
                                Some(job) => job.await,
                                None => break,
                            }
                        }
                        trace!("worker exiting");
                    }
                    .instrument(info_span!("worker", pool = name, id)),
                )
            })
            .collect();

        Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Enqueue without waiting. Rejects when the queue is full or the pool is shut down.
    pub fn try_submit<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(SubmitError::ShutDown);
        };
        sender.try_send(Box::pin(job)).map_err(|err| match err {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Closed(_) => SubmitError::ShutDown,
        })
    }

    /// Enqueue, waiting for room in the queue.
    pub async fn submit<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(sender) = self.sender.lock().clone() else {
            return Err(SubmitError::ShutDown);
        };
        sender.send(Box::pin(job)).await.map_err(|_| SubmitError::ShutDown)
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting jobs, let the queue drain for up to `grace`, then abort
    /// whatever is still running and wait up to `grace` again.
    ///
    /// Calling it again after the first call returns immediately.
    pub async fn shutdown(&self, grace: Duration) {
        drop(self.sender.lock().take());
        let mut workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }

        if wait_all(&mut workers, grace).await {
            return;
        }

        workers.retain(|worker| !worker.is_finished());
        warn!(pool = self.name, running = workers.len(), "worker pool did not drain in time, aborting");
        for worker in &workers {
            worker.abort();
        }

        if !wait_all(&mut workers, grace).await {
            error!(pool = self.name, "worker pool did not terminate");
        }
    }
}

async fn wait_all(workers: &mut [JoinHandle<()>], grace: Duration) -> bool {
    tokio::time::timeout(grace, join_all(workers.iter_mut())).await.is_ok()
}
