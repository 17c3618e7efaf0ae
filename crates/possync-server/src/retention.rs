//! Ledger retention pruning.
//!
//! Ledgers grow one row per record per batch version forever. When enabled,
//! a background task walks the tables known to the schema registry on an
//! interval and deletes ledger entries older than the retention window.
//! Advisory housekeeping: a failed pass is logged and retried next tick.

use std::sync::Arc;
use std::time::Duration;

use possync_storage::SyncStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::SchemaRegistry;

/// Retention knobs, from the `ledger.*` configuration section.
#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    /// Entries older than this many days are deleted.
    pub retention_days: u32,
    /// Interval between prune passes.
    pub prune_interval: Duration,
}

/// Spawns the interval pruner over the registry's known tables.
pub fn spawn_pruner<S: SyncStore>(
    store: Arc<S>,
    registry: Arc<SchemaRegistry>,
    config: RetentionConfig,
    shutdown: &broadcast::Sender<()>,
) -> JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.prune_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    prune_all(store.as_ref(), registry.as_ref(), config.retention_days).await;
                }
            }
        }
        debug!("ledger pruner stopped");
    })
}

async fn prune_all<S: SyncStore>(store: &S, registry: &SchemaRegistry, retention_days: u32) {
    for table in registry.known_tables() {
        match store.prune_ledger(&table, retention_days).await {
            Ok(0) => debug!(table = %table, "ledger prune: nothing expired"),
            Ok(removed) => {
                info!(table = %table, removed, retention_days, "ledger entries pruned");
            }
            Err(err) => warn!(table = %table, error = %err, "ledger prune failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use possync_domain::{Batch, Operation, RawRecord};
    use possync_storage::{MemorySyncStore, SyncStore};
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn schema_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join("ventas.json")).unwrap();
        write!(file, r#"{{"table": "ventas", "fields": []}}"#).unwrap();
        dir
    }

    fn batch() -> Batch {
        Batch {
            operation: Operation::Create,
            table_name: "ventas".to_string(),
            client_id: "tienda1_pos1".to_string(),
            field_id: "hash_id".to_string(),
            batch_version: "v1".to_string(),
            records: vec![RawRecord::from_json(json!({
                "producto": "cafe",
                "__meta": {"hash_id": "r1", "hash": "h1"}
            }))],
            job_id: "job-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_pruner_removes_expired_entries() {
        let dir = schema_dir();
        let store = MemorySyncStore::new_shared();
        store.apply_batch(&batch(), None).await.unwrap();
        assert!(store
            .ledger_entry("ventas", "tienda1_pos1", "v1", "r1")
            .await
            .unwrap()
            .is_some());

        let (shutdown_tx, _) = broadcast::channel(1);
        // zero-day retention expires everything already written
        let handle = spawn_pruner(
            Arc::clone(&store),
            SchemaRegistry::new_shared(dir.path(), false),
            RetentionConfig {
                retention_days: 0,
                prune_interval: Duration::from_millis(10),
            },
            &shutdown_tx,
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let entry = store
                    .ledger_entry("ventas", "tienda1_pos1", "v1", "r1")
                    .await
                    .unwrap();
                if entry.is_none() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pruner did not remove the expired entry");

        let _ = shutdown_tx.send(());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_pruner_keeps_entries_inside_the_window() {
        let dir = schema_dir();
        let store = MemorySyncStore::new_shared();
        store.apply_batch(&batch(), None).await.unwrap();

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = spawn_pruner(
            Arc::clone(&store),
            SchemaRegistry::new_shared(dir.path(), false),
            RetentionConfig {
                retention_days: 90,
                prune_interval: Duration::from_millis(10),
            },
            &shutdown_tx,
        );

        // let several passes run
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = shutdown_tx.send(());
        handle.await.unwrap();

        assert!(store
            .ledger_entry("ventas", "tienda1_pos1", "v1", "r1")
            .await
            .unwrap()
            .is_some());
    }
}
