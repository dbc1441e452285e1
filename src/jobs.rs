//! Bounded ingestion worker pool.
//!
//! Ingestion runs detached from the initiating request, but not as an
//! anonymous fire-and-forget task: jobs go through a bounded queue feeding
//! a fixed set of workers, every submit hands back a result channel, and a
//! full queue rejects the submit so the caller can surface backpressure.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::ingest::IngestionCoordinator;
use crate::models::IngestionJob;

/// Receives the job's final outcome once a worker finishes it.
pub type JobHandle = oneshot::Receiver<Result<(), String>>;

#[derive(Debug)]
pub enum SubmitError {
    /// The queue is at capacity; the job was not accepted.
    QueueFull,
    /// All workers have shut down.
    Closed,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::QueueFull => write!(f, "ingestion queue is full"),
            SubmitError::Closed => write!(f, "ingestion workers are not running"),
        }
    }
}

impl std::error::Error for SubmitError {}

struct QueuedJob {
    job: IngestionJob,
    done: oneshot::Sender<Result<(), String>>,
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
}

impl JobQueue {
    /// Spawn `workers` workers draining a queue of `queue_depth` slots.
    pub fn start(
        coordinator: Arc<IngestionCoordinator>,
        workers: usize,
        queue_depth: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<QueuedJob>(queue_depth);
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..workers {
            let rx = rx.clone();
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                loop {
                    let queued = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(QueuedJob { job, done }) = queued else {
                        tracing::debug!(worker_id, "ingestion worker shutting down");
                        break;
                    };
                    let outcome = coordinator
                        .run(job)
                        .await
                        .map_err(|e| format!("{:#}", e));
                    // Dispatcher may have stopped listening; the outcome is
                    // already persisted either way
                    let _ = done.send(outcome);
                }
            });
        }

        Self { tx }
    }

    /// Submit a job without blocking. A full queue is reported to the
    /// caller instead of waiting.
    pub fn submit(&self, job: IngestionJob) -> Result<JobHandle, SubmitError> {
        let (done, handle) = oneshot::channel();
        match self.tx.try_send(QueuedJob { job, done }) {
            Ok(()) => Ok(handle),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SubmitError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::Closed),
        }
    }
}
