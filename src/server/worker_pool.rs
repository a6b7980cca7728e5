use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::SubmitError;


/// The work done by one pipeline stage for a single item.
#[async_trait]
pub trait StageHandler<T>: Send + Sync + 'static {
    async fn handle(&self, item: T);
}

#[derive(Debug, Default)]
pub struct StageStats {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub completed: AtomicU64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct StageStatsSnapshot {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
}

impl StageStats {
    pub fn snapshot(&self) -> StageStatsSnapshot {
        StageStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

/// The sending end of a stage's bounded queue. Every submission either enqueues the item or fails
///  with a [SubmitError] that is counted, so there is no silent loss.
///
/// The stage's workers keep running as long as at least one submitter is alive, so dropping all
///  submitters is how a stage is told to drain and stop.
pub struct StageSubmitter<T> {
    stage: &'static str,
    sender: mpsc::Sender<T>,
    handoff_timeout: Duration,
    stats: Arc<StageStats>,
}

impl<T> Clone for StageSubmitter<T> {
    fn clone(&self) -> Self {
        StageSubmitter {
            stage: self.stage,
            sender: self.sender.clone(),
            handoff_timeout: self.handoff_timeout,
            stats: self.stats.clone(),
        }
    }
}

impl<T: Send + 'static> StageSubmitter<T> {
    /// Never waits: a full queue is rejected right away. This is for the ingestion loop, which
    ///  must not block on application logic.
    pub fn try_submit(&self, item: T) -> Result<(), SubmitError> {
        let result = match self.sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SubmitError::QueueFull { stage: self.stage }),
            Err(TrySendError::Closed(_)) => Err(SubmitError::Closed { stage: self.stage }),
        };
        self.count(&result);
        result
    }

    /// Waits for room in the queue up to the configured hand-off timeout.
    pub async fn submit(&self, item: T) -> Result<(), SubmitError> {
        let result = match self.sender.send_timeout(item, self.handoff_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SubmitError::QueueFull { stage: self.stage }),
            Err(SendTimeoutError::Closed(_)) => Err(SubmitError::Closed { stage: self.stage }),
        };
        self.count(&result);
        result
    }

    fn count(&self, result: &Result<(), SubmitError>) {
        match result {
            Ok(()) => self.stats.submitted.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.rejected.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// A fixed number of worker tasks sharing one bounded queue.
pub struct WorkerPool {
    stage: &'static str,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<StageStats>,
}

impl WorkerPool {
    pub fn spawn<T: Send + 'static>(
        stage: &'static str,
        num_workers: usize,
        queue_capacity: usize,
        handoff_timeout: Duration,
        handler: impl StageHandler<T>,
    ) -> (WorkerPool, StageSubmitter<T>) {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);
        let stats = Arc::new(StageStats::default());

        let workers = (0..num_workers)
            .map(|worker_id| tokio::spawn(Self::do_loop(stage, worker_id, receiver.clone(), handler.clone(), stats.clone())))
            .collect();
        debug!(stage, num_workers, queue_capacity, "started worker pool");

        let submitter = StageSubmitter {
            stage,
            sender,
            handoff_timeout,
            stats: stats.clone(),
        };
        (WorkerPool { stage, workers, stats }, submitter)
    }

    async fn do_loop<T: Send + 'static, H: StageHandler<T>>(stage: &'static str, worker_id: usize, receiver: Arc<Mutex<mpsc::Receiver<T>>>, handler: Arc<H>, stats: Arc<StageStats>) {
        loop {
            // the lock is only held while waiting for the next item, never while handling it
            let item = receiver.lock().await
                .recv().await;

            match item {
                Some(item) => {
                    handler.handle(item).await;
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    trace!(stage, worker_id, "queue closed, worker exits");
                    break;
                }
            }
        }
    }

    /// Waits for the workers to drain the queue and exit, which they do once all submitters are
    ///  dropped. Workers that are still busy after the grace period are aborted, which also
    ///  interrupts workers waiting on an empty queue.
    pub async fn shutdown(self, grace_period: Duration) -> StageStatsSnapshot {
        let deadline = Instant::now() + grace_period;

        let mut remaining = Vec::new();
        let mut workers = self.workers.into_iter();
        while let Some(mut handle) = workers.next() {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                remaining.push(handle);
                remaining.extend(workers.by_ref());
            }
        }

        if !remaining.is_empty() {
            warn!(stage = self.stage, num_aborted = remaining.len(), "grace period expired, aborting workers");
            for handle in &remaining {
                handle.abort();
            }
            for handle in remaining {
                let _ = handle.await;
            }
        }

        let stats = self.stats.snapshot();
        info!(stage = self.stage, submitted = stats.submitted, rejected = stats.rejected, completed = stats.completed, "stage shut down");
        stats
    }
}
