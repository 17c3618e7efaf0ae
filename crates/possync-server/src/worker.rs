//! Worker pool draining the job queue.
//!
//! Each worker pulls one job at a time, marks its records PROCESSING in the
//! ledger, applies the batch and stores the summary on the job table. A
//! transient transport failure re-queues the whole batch (bounded by
//! `max_attempts`); the apply engine's bypass semantics make that re-delivery
//! safe. Per-record failures are not failures of the job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use possync_domain::{BatchSummary, LedgerStatus};
use possync_storage::SyncStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::{JobQueue, JobState, QueuedJob};
use crate::registry::SchemaRegistry;

/// Sizing knobs for the pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Number of concurrent worker tasks.
    pub workers: usize,
    /// Delivery attempts per batch before the job is marked failed.
    pub max_attempts: u32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig {
            workers: 4,
            max_attempts: 3,
        }
    }
}

/// Handles to the spawned workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the worker tasks. Workers stop when the shutdown channel fires
    /// or the queue closes.
    pub fn spawn<S, Q>(
        config: WorkerPoolConfig,
        store: Arc<S>,
        queue: Arc<Q>,
        registry: Arc<SchemaRegistry>,
        shutdown: &broadcast::Sender<()>,
    ) -> Self
    where
        S: SyncStore,
        Q: JobQueue,
    {
        let handles = (0..config.workers)
            .map(|worker_id| {
                let store = Arc::clone(&store);
                let queue = Arc::clone(&queue);
                let registry = Arc::clone(&registry);
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    debug!(worker_id, "batch worker started");
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            job = queue.next_job() => {
                                let Some(job) = job else { break };
                                process_job(
                                    store.as_ref(),
                                    queue.as_ref(),
                                    registry.as_ref(),
                                    job,
                                    config.max_attempts,
                                )
                                .await;
                            }
                        }
                    }
                    debug!(worker_id, "batch worker stopped");
                })
            })
            .collect();

        WorkerPool { handles }
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn process_job<S, Q>(
    store: &S,
    queue: &Q,
    registry: &SchemaRegistry,
    job: QueuedJob,
    max_attempts: u32,
) where
    S: SyncStore,
    Q: JobQueue,
{
    let QueuedJob { batch, attempt } = job;
    let job_id = batch.job_id.clone();
    let operation = batch.operation.as_str();
    queue.update_job(&job_id, JobState::Active { attempt });

    // Lifecycle mark is best-effort: losing it degrades the status poll to
    // PROCESSING-unknown for a moment, it must not block the apply.
    if let Err(err) = store.mark_batch(&batch, LedgerStatus::Processing).await {
        warn!(job_id = %job_id, error = %err, "failed to mark batch PROCESSING");
    }

    let schema = registry.load(&batch.table_name);
    if schema.is_none() {
        debug!(job_id = %job_id, table = %batch.table_name, "no schema, fallback conversion");
    }

    let started = Instant::now();
    match store.apply_batch(&batch, schema.as_deref()).await {
        Ok(summary) => {
            let elapsed = started.elapsed();
            record_batch_metrics(operation, &summary, elapsed);
            info!(
                job_id = %job_id,
                operation,
                table = %batch.table_name,
                client_id = %batch.client_id,
                success_count = summary.saved_successfully,
                error_count = summary.save_errors,
                total_records = summary.records_processed,
                elapsed_ms = elapsed.as_millis() as u64,
                "batch processed"
            );
            queue.update_job(&job_id, JobState::Completed { result: summary });
        }
        Err(err) if err.is_transient() && attempt < max_attempts => {
            warn!(
                job_id = %job_id,
                operation,
                table = %batch.table_name,
                attempt,
                error = %err,
                "transient batch failure, re-queueing"
            );
            metrics::counter!(
                "possync_batches_total",
                "operation" => operation,
                "outcome" => "retried"
            )
            .increment(1);
            let retry = QueuedJob {
                batch,
                attempt: attempt + 1,
            };
            if let Err(requeue_err) = queue.requeue(retry) {
                error!(job_id = %job_id, error = %requeue_err, "re-queue rejected, marking job failed");
                queue.update_job(
                    &job_id,
                    JobState::Failed {
                        error: err.to_string(),
                        attempts: attempt,
                    },
                );
            }
        }
        Err(err) => {
            error!(
                job_id = %job_id,
                operation,
                table = %batch.table_name,
                attempt,
                error = %err,
                "batch failed"
            );
            metrics::counter!(
                "possync_batches_total",
                "operation" => operation,
                "outcome" => "failed"
            )
            .increment(1);
            queue.update_job(
                &job_id,
                JobState::Failed {
                    error: err.to_string(),
                    attempts: attempt,
                },
            );
        }
    }
}

fn record_batch_metrics(operation: &'static str, summary: &BatchSummary, elapsed: Duration) {
    let outcome = if summary.success { "success" } else { "partial" };
    metrics::counter!(
        "possync_batches_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    metrics::counter!(
        "possync_records_total",
        "operation" => operation,
        "status" => "success"
    )
    .increment(summary.saved_successfully as u64);
    metrics::counter!(
        "possync_records_total",
        "operation" => operation,
        "status" => "error"
    )
    .increment(summary.save_errors as u64);
    metrics::histogram!("possync_apply_duration_seconds", "operation" => operation)
        .record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TokioJobQueue;
    use async_trait::async_trait;
    use possync_domain::{
        Batch, BatchStats, ErrorDetail, LedgerEntry, Operation, RawRecord, RowSnapshot,
        TableSchema,
    };
    use possync_storage::{ActivitySample, MemorySyncStore, StorageError, StorageResult, SyncLog};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn batch(job_id: &str, table: &str) -> Batch {
        Batch {
            operation: Operation::Create,
            table_name: table.to_string(),
            client_id: "tienda1_pos1".to_string(),
            field_id: "hash_id".to_string(),
            batch_version: "v1".to_string(),
            records: vec![
                RawRecord::from_json(json!({
                    "producto": "cafe",
                    "__meta": {"hash_id": "r1", "hash": "h1"}
                })),
                RawRecord::from_json(json!({
                    "producto": "te",
                    "__meta": {"hash_id": "r2", "hash": "h2"}
                })),
            ],
            job_id: job_id.to_string(),
        }
    }

    fn registry() -> Arc<SchemaRegistry> {
        SchemaRegistry::new_shared("schemas-not-present", false)
    }

    async fn wait_for_terminal(queue: &TokioJobQueue, job_id: &str) -> JobState {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match queue.job(job_id) {
                    Some(state @ (JobState::Completed { .. } | JobState::Failed { .. })) => {
                        return state;
                    }
                    _ => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            }
        })
        .await
        .expect("job did not reach a terminal state")
    }

    /// Fails `apply_batch` with a connection error a configured number of
    /// times, then delegates to a real memory store.
    struct FlakyStore {
        inner: MemorySyncStore,
        failures_left: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            FlakyStore {
                inner: MemorySyncStore::new(),
                failures_left: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl SyncStore for FlakyStore {
        async fn apply_batch(
            &self,
            batch: &Batch,
            schema: Option<&TableSchema>,
        ) -> StorageResult<BatchSummary> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::connection("connection refused"));
            }
            self.inner.apply_batch(batch, schema).await
        }

        async fn mark_batch(&self, batch: &Batch, status: LedgerStatus) -> StorageResult<()> {
            self.inner.mark_batch(batch, status).await
        }

        async fn ledger_entry(
            &self,
            table: &str,
            client_id: &str,
            batch_version: &str,
            record_id: &str,
        ) -> StorageResult<Option<LedgerEntry>> {
            self.inner
                .ledger_entry(table, client_id, batch_version, record_id)
                .await
        }

        async fn ledger_entries(
            &self,
            table: &str,
            client_id: &str,
            batch_version: &str,
            record_ids: &[String],
        ) -> StorageResult<Vec<LedgerEntry>> {
            self.inner
                .ledger_entries(table, client_id, batch_version, record_ids)
                .await
        }

        async fn ledger_entries_for_batch(
            &self,
            table: &str,
            client_id: &str,
            batch_id: &str,
        ) -> StorageResult<Vec<LedgerEntry>> {
            self.inner
                .ledger_entries_for_batch(table, client_id, batch_id)
                .await
        }

        async fn batch_stats(
            &self,
            table: &str,
            client_id: &str,
            batch_id: &str,
        ) -> StorageResult<BatchStats> {
            self.inner.batch_stats(table, client_id, batch_id).await
        }

        async fn prune_ledger(&self, table: &str, older_than_days: u32) -> StorageResult<u64> {
            self.inner.prune_ledger(table, older_than_days).await
        }

        async fn row_snapshots(
            &self,
            table: &str,
            field_id: &str,
            client_id: &str,
            batch_version: &str,
            record_ids: &[String],
        ) -> StorageResult<Vec<RowSnapshot>> {
            self.inner
                .row_snapshots(table, field_id, client_id, batch_version, record_ids)
                .await
        }

        async fn error_details(
            &self,
            table: &str,
            client_id: &str,
            record_id: &str,
        ) -> StorageResult<Vec<ErrorDetail>> {
            self.inner.error_details(table, client_id, record_id).await
        }

        async fn client_for_api_key(&self, key_hash: &str) -> StorageResult<Option<String>> {
            self.inner.client_for_api_key(key_hash).await
        }

        async fn upsert_sync_log(&self, log: &SyncLog) -> StorageResult<SyncLog> {
            self.inner.upsert_sync_log(log).await
        }

        async fn sync_log(&self, client_id: &str) -> StorageResult<Option<SyncLog>> {
            self.inner.sync_log(client_id).await
        }

        async fn record_activity(&self, samples: &[ActivitySample]) -> StorageResult<()> {
            self.inner.record_activity(samples).await
        }

        async fn ping(&self) -> StorageResult<()> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_worker_applies_batch_and_stores_summary() {
        let store = MemorySyncStore::new_shared();
        let queue = TokioJobQueue::new_shared(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                workers: 2,
                max_attempts: 3,
            },
            Arc::clone(&store),
            Arc::clone(&queue),
            registry(),
            &shutdown_tx,
        );

        queue.enqueue(batch("job-1", "ventas")).unwrap();

        let state = wait_for_terminal(&queue, "job-1").await;
        match state {
            JobState::Completed { result } => {
                assert!(result.success);
                assert_eq!(result.saved_successfully, 2);
                assert_eq!(result.save_errors, 0);
            }
            other => panic!("unexpected state: {other:?}"),
        }

        // ledger entries were written through the engine
        let entry = store
            .ledger_entry("ventas", "tienda1_pos1", "v1", "r1")
            .await
            .unwrap();
        assert!(entry.is_some());

        let _ = shutdown_tx.send(());
        pool.join().await;
    }

    #[tokio::test]
    async fn test_invalid_table_fails_permanently_without_retry() {
        let store = MemorySyncStore::new_shared();
        let queue = TokioJobQueue::new_shared(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                workers: 1,
                max_attempts: 3,
            },
            store,
            Arc::clone(&queue),
            registry(),
            &shutdown_tx,
        );

        queue.enqueue(batch("job-1", "ventas; drop table x")).unwrap();

        let state = wait_for_terminal(&queue, "job-1").await;
        match state {
            JobState::Failed { error, attempts } => {
                assert!(error.contains("invalid input"), "got: {error}");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected state: {other:?}"),
        }

        let _ = shutdown_tx.send(());
        pool.join().await;
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_until_success() {
        let store = Arc::new(FlakyStore::new(2));
        let queue = TokioJobQueue::new_shared(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                workers: 1,
                max_attempts: 3,
            },
            Arc::clone(&store),
            Arc::clone(&queue),
            registry(),
            &shutdown_tx,
        );

        queue.enqueue(batch("job-1", "ventas")).unwrap();

        let state = wait_for_terminal(&queue, "job-1").await;
        match state {
            JobState::Completed { result } => {
                assert!(result.success);
                assert_eq!(result.records_processed, 2);
            }
            other => panic!("unexpected state: {other:?}"),
        }
        assert_eq!(store.failures_left.load(Ordering::SeqCst), 0);

        let _ = shutdown_tx.send(());
        pool.join().await;
    }

    #[tokio::test]
    async fn test_transient_failure_exhausts_attempts() {
        let store = Arc::new(FlakyStore::new(u32::MAX));
        let queue = TokioJobQueue::new_shared(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                workers: 1,
                max_attempts: 2,
            },
            store,
            Arc::clone(&queue),
            registry(),
            &shutdown_tx,
        );

        queue.enqueue(batch("job-1", "ventas")).unwrap();

        let state = wait_for_terminal(&queue, "job-1").await;
        match state {
            JobState::Failed { error, attempts } => {
                assert!(error.contains("connection"), "got: {error}");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected state: {other:?}"),
        }

        let _ = shutdown_tx.send(());
        pool.join().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_workers() {
        let store = MemorySyncStore::new_shared();
        let queue = TokioJobQueue::new_shared(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                workers: 4,
                max_attempts: 3,
            },
            store,
            queue,
            registry(),
            &shutdown_tx,
        );

        let _ = shutdown_tx.send(());
        tokio::time::timeout(Duration::from_secs(5), pool.join())
            .await
            .expect("workers did not stop");
    }
}
