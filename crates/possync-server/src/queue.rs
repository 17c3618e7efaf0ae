//! In-process job queue for batch delivery.
//!
//! Ingress accepts a batch, registers it in the job table and pushes it onto
//! a bounded channel; the worker pool drains the channel. The bound is the
//! backpressure mechanism: a full channel rejects the submission instead of
//! buffering without limit, and the caller reports the saturation to the
//! terminal, which retries later.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use possync_domain::{Batch, BatchSummary};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use ulid::Ulid;

/// Mints a job id. ULIDs sort by creation time, which keeps job listings and
/// ledger `batch_id` columns chronologically ordered for free.
pub fn new_job_id() -> String {
    Ulid::new().to_string()
}

/// Errors raised by queue submission.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("queue is closed")]
    Closed,
}

/// Result alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// A batch travelling through the queue, with its delivery attempt counter.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    /// The submitted batch; `batch.job_id` keys the job table.
    pub batch: Batch,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

/// Queue-side lifecycle of one submitted batch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobState {
    /// Waiting in the channel.
    Queued,
    /// Picked up by a worker.
    Active { attempt: u32 },
    /// Applied; per-record outcomes are in the summary.
    Completed { result: BatchSummary },
    /// Gave up after the configured attempts, or the batch was rejected
    /// outright (invalid identifiers).
    Failed { error: String, attempts: u32 },
}

/// Submission and polling surface shared by ingress and workers.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Registers and queues a batch. Non-blocking; a full queue is an error
    /// and leaves no job-table entry behind.
    fn enqueue(&self, batch: Batch) -> QueueResult<()>;

    /// Receives the next job, waiting until one is available. Returns `None`
    /// once the queue is closed.
    async fn next_job(&self) -> Option<QueuedJob>;

    /// Puts a job back for another delivery attempt.
    fn requeue(&self, job: QueuedJob) -> QueueResult<()>;

    /// Overwrites the job-table state for a job id.
    fn update_job(&self, job_id: &str, state: JobState);

    /// Looks up the job-table state for a job id.
    fn job(&self, job_id: &str) -> Option<JobState>;

    /// Number of jobs currently waiting in the channel.
    fn depth(&self) -> usize;
}

/// Bounded Tokio mpsc queue with an in-memory job table.
///
/// Workers share the single receiver behind an async mutex, so each queued
/// job is delivered to exactly one worker. Job-table entries live for the
/// process lifetime; the table is a polling surface, not an audit trail (the
/// ledger is).
pub struct TokioJobQueue {
    tx: mpsc::Sender<QueuedJob>,
    rx: Mutex<mpsc::Receiver<QueuedJob>>,
    jobs: DashMap<String, JobState>,
    capacity: usize,
}

impl TokioJobQueue {
    /// Creates a queue bounded at `capacity` pending jobs.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        TokioJobQueue {
            tx,
            rx: Mutex::new(rx),
            jobs: DashMap::new(),
            capacity,
        }
    }

    /// Creates a queue wrapped in an `Arc` for sharing across tasks.
    pub fn new_shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    fn send(&self, job: QueuedJob) -> QueueResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => {
                metrics::gauge!("possync_queue_depth").set(self.depth() as f64);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(QueueError::Full {
                capacity: self.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    fn enqueue(&self, batch: Batch) -> QueueResult<()> {
        let job_id = batch.job_id.clone();
        // Register before sending so a worker that grabs the job immediately
        // never races a later insert back to QUEUED.
        self.jobs.insert(job_id.clone(), JobState::Queued);
        if let Err(err) = self.send(QueuedJob { batch, attempt: 1 }) {
            self.jobs.remove(&job_id);
            return Err(err);
        }
        Ok(())
    }

    async fn next_job(&self) -> Option<QueuedJob> {
        let job = self.rx.lock().await.recv().await;
        if job.is_some() {
            metrics::gauge!("possync_queue_depth").set(self.depth() as f64);
        }
        job
    }

    fn requeue(&self, job: QueuedJob) -> QueueResult<()> {
        self.jobs.insert(job.batch.job_id.clone(), JobState::Queued);
        self.send(job)
    }

    fn update_job(&self, job_id: &str, state: JobState) {
        self.jobs.insert(job_id.to_string(), state);
    }

    fn job(&self, job_id: &str) -> Option<JobState> {
        self.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}
