//! In-memory implementation of the [`SyncStore`] trait.
//!
//! Backs tests and single-process development runs. Rows live in a
//! [`DashMap`] keyed by table name; the apply semantics mirror what the
//! PostgreSQL backend makes observable: duplicate creates bypass unless the
//! content hash differs, updates against missing rows fail, deletes against
//! missing rows pass, and every identified record gets exactly one ledger
//! entry per (client, version) key.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;

use async_trait::async_trait;

use possync_domain::batch::HASH_ENVELOPE_KEY;
use possync_domain::ledger::{truncate, widths};
use possync_domain::status::{
    DELETE_BYPASS_NOTE, DUPLICATE_BYPASS_NOTE, DUPLICATE_HASH_MISMATCH_MESSAGE,
    UPDATE_NOT_FOUND_MESSAGE,
};
use possync_domain::{
    prepare_batch, Batch, BatchStats, BatchSummary, ErrorDetail, ErrorKind, LedgerEntry,
    LedgerStatus, Operation, PreparedRecord, RecordOutcome, RowSnapshot, TableSchema, Value,
};

use crate::error::StorageResult;
use crate::traits::{
    missing_id_outcome, validate_batch_identifiers, validate_table, ActivitySample, SyncLog,
    SyncStore,
};

/// A materialized row held by the in-memory backend.
#[derive(Debug, Clone)]
struct MemoryRow {
    server_id: i64,
    record_id: String,
    client_id: String,
    batch_version: String,
    fields: BTreeMap<String, Value>,
    meta: BTreeMap<String, String>,
    deleted: bool,
}

/// Ledger key: (table, client_id, batch_version, record_id).
type LedgerKey = (String, String, String, String);

/// Error sink key: (table, record_id, client_id, batch_version).
type SinkKey = (String, String, String, String);

/// In-memory sync store.
pub struct MemorySyncStore {
    rows: DashMap<String, Vec<MemoryRow>>,
    ledgers: DashMap<LedgerKey, LedgerEntry>,
    errors: DashMap<SinkKey, ErrorDetail>,
    api_keys: DashMap<String, String>,
    sync_logs: DashMap<String, SyncLog>,
    activity: DashMap<String, ActivitySample>,
    next_server_id: AtomicI64,
}

impl Default for MemorySyncStore {
    fn default() -> Self {
        Self::new()
    }
}

fn row_key_matches(row: &MemoryRow, record_id: &str, client_id: &str, batch_version: &str) -> bool {
    row.record_id == record_id && row.client_id == client_id && row.batch_version == batch_version
}

/// Decides the outcome of a create that hit an existing row.
fn resolve_duplicate(record: &PreparedRecord, existing: &MemoryRow) -> RecordOutcome {
    if let (Some(incoming), Some(stored)) =
        (record.hash_tag(), existing.meta.get(HASH_ENVELOPE_KEY))
    {
        if stored.as_str() != incoming {
            return RecordOutcome::failed(
                record.record_id.clone(),
                ErrorKind::Constraint,
                DUPLICATE_HASH_MISMATCH_MESSAGE,
            );
        }
    }
    RecordOutcome::bypassed(record.record_id.clone(), DUPLICATE_BYPASS_NOTE)
}

impl MemorySyncStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            ledgers: DashMap::new(),
            errors: DashMap::new(),
            api_keys: DashMap::new(),
            sync_logs: DashMap::new(),
            activity: DashMap::new(),
            next_server_id: AtomicI64::new(1),
        }
    }

    /// Creates a new store wrapped in an `Arc` for sharing across handlers.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seeds an API key mapping, for development and tests.
    pub fn insert_api_key(&self, key_hash: impl Into<String>, client_id: impl Into<String>) {
        self.api_keys.insert(key_hash.into(), client_id.into());
    }

    /// Revokes a seeded API key mapping, for tests.
    pub fn remove_api_key(&self, key_hash: &str) {
        self.api_keys.remove(key_hash);
    }

    /// Reads back the accumulated activity for one client, for tests.
    pub fn activity_sample(&self, client_id: &str) -> Option<ActivitySample> {
        self.activity.get(client_id).map(|sample| sample.clone())
    }

    /// Marks a stored row soft-deleted without removing it, for development
    /// and tests. Returns whether a row matched.
    pub fn mark_row_deleted(
        &self,
        table: &str,
        client_id: &str,
        batch_version: &str,
        record_id: &str,
    ) -> bool {
        let Some(mut rows) = self.rows.get_mut(table) else {
            return false;
        };
        for row in rows.iter_mut() {
            if row_key_matches(row, record_id, client_id, batch_version) {
                row.deleted = true;
                return true;
            }
        }
        false
    }

    fn apply_create(
        &self,
        batch: &Batch,
        table: &str,
        prepared: &[PreparedRecord],
    ) -> Vec<RecordOutcome> {
        let mut rows = self.rows.entry(table.to_string()).or_default();
        prepared
            .iter()
            .map(|record| {
                let Some(record_id) = record.record_id.as_deref() else {
                    return missing_id_outcome(&batch.field_id);
                };
                if let Some(existing) = rows.iter().find(|row| {
                    row_key_matches(row, record_id, &batch.client_id, &batch.batch_version)
                }) {
                    return resolve_duplicate(record, existing);
                }
                let server_id = self.next_server_id.fetch_add(1, Ordering::Relaxed);
                rows.push(MemoryRow {
                    server_id,
                    record_id: record_id.to_string(),
                    client_id: batch.client_id.clone(),
                    batch_version: batch.batch_version.clone(),
                    fields: record.fields.clone(),
                    meta: record.meta.clone(),
                    deleted: false,
                });
                RecordOutcome::created(record.record_id.clone(), server_id)
            })
            .collect()
    }

    fn apply_update(
        &self,
        batch: &Batch,
        table: &str,
        prepared: &[PreparedRecord],
    ) -> Vec<RecordOutcome> {
        let mut rows = self.rows.entry(table.to_string()).or_default();
        prepared
            .iter()
            .map(|record| {
                let Some(record_id) = record.record_id.as_deref() else {
                    return missing_id_outcome(&batch.field_id);
                };
                match rows.iter_mut().find(|row| {
                    row_key_matches(row, record_id, &batch.client_id, &batch.batch_version)
                }) {
                    Some(row) => {
                        // Null fields never overwrite stored values.
                        for (name, value) in &record.fields {
                            if value.is_null() {
                                continue;
                            }
                            row.fields.insert(name.clone(), value.clone());
                        }
                        RecordOutcome::success(record.record_id.clone())
                    }
                    None => RecordOutcome::failed(
                        record.record_id.clone(),
                        ErrorKind::NotFound,
                        UPDATE_NOT_FOUND_MESSAGE,
                    ),
                }
            })
            .collect()
    }

    fn apply_delete(
        &self,
        batch: &Batch,
        table: &str,
        prepared: &[PreparedRecord],
    ) -> Vec<RecordOutcome> {
        let mut rows = self.rows.entry(table.to_string()).or_default();
        prepared
            .iter()
            .map(|record| {
                let Some(record_id) = record.record_id.as_deref() else {
                    return missing_id_outcome(&batch.field_id);
                };
                match rows.iter().position(|row| {
                    row_key_matches(row, record_id, &batch.client_id, &batch.batch_version)
                }) {
                    Some(index) => {
                        rows.remove(index);
                        RecordOutcome::success(record.record_id.clone())
                    }
                    None => RecordOutcome::bypassed(record.record_id.clone(), DELETE_BYPASS_NOTE),
                }
            })
            .collect()
    }

    /// Upserts one ledger entry, preserving the first attempt time.
    fn upsert_ledger(&self, table: &str, mut entry: LedgerEntry) {
        let key = (
            table.to_string(),
            entry.client_id.clone(),
            entry.batch_version.clone(),
            entry.record_id.clone(),
        );
        match self.ledgers.entry(key) {
            Entry::Occupied(mut slot) => {
                entry.created_at = slot.get().created_at;
                slot.insert(entry);
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
    }

    fn record_outcomes(
        &self,
        batch: &Batch,
        table: &str,
        prepared: &[PreparedRecord],
        outcomes: &[RecordOutcome],
    ) {
        for ((record, outcome), raw) in prepared.iter().zip(outcomes).zip(&batch.records) {
            let Some(record_id) = record.record_id.as_deref() else {
                continue;
            };
            self.upsert_ledger(table, LedgerEntry::from_outcome(batch, record_id, outcome));
            if !outcome.success {
                let detail = ErrorDetail::from_outcome(
                    batch,
                    record_id,
                    outcome,
                    serde_json::Value::Object(raw.0.clone()),
                );
                let key = (
                    table.to_string(),
                    detail.record_id.clone(),
                    detail.client_id.clone(),
                    detail.batch_version.clone(),
                );
                self.errors.insert(key, detail);
            }
        }
    }
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn apply_batch(
        &self,
        batch: &Batch,
        schema: Option<&TableSchema>,
    ) -> StorageResult<BatchSummary> {
        let table = validate_table(&batch.table_name)?;
        let prepared = prepare_batch(batch, schema);
        validate_batch_identifiers(&table, &batch.field_id, &prepared)?;

        let outcomes = match batch.operation {
            Operation::Create => self.apply_create(batch, &table, &prepared),
            Operation::Update => self.apply_update(batch, &table, &prepared),
            Operation::Delete => self.apply_delete(batch, &table, &prepared),
        };

        self.record_outcomes(batch, &table, &prepared, &outcomes);
        Ok(BatchSummary::from_outcomes(batch, outcomes))
    }

    async fn mark_batch(&self, batch: &Batch, status: LedgerStatus) -> StorageResult<()> {
        let table = validate_table(&batch.table_name)?;
        for record in prepare_batch(batch, None) {
            if let Some(record_id) = record.record_id.as_deref() {
                self.upsert_ledger(&table, LedgerEntry::mark(batch, record_id, status));
            }
        }
        Ok(())
    }

    async fn ledger_entry(
        &self,
        table: &str,
        client_id: &str,
        batch_version: &str,
        record_id: &str,
    ) -> StorageResult<Option<LedgerEntry>> {
        let table = validate_table(table)?;
        let key = (
            table,
            client_id.to_string(),
            batch_version.to_string(),
            record_id.to_string(),
        );
        Ok(self.ledgers.get(&key).map(|entry| entry.clone()))
    }

    async fn ledger_entries(
        &self,
        table: &str,
        client_id: &str,
        batch_version: &str,
        record_ids: &[String],
    ) -> StorageResult<Vec<LedgerEntry>> {
        let table = validate_table(table)?;
        let mut entries = Vec::new();
        for record_id in record_ids {
            let key = (
                table.clone(),
                client_id.to_string(),
                batch_version.to_string(),
                record_id.clone(),
            );
            if let Some(entry) = self.ledgers.get(&key) {
                entries.push(entry.clone());
            }
        }
        Ok(entries)
    }

    async fn ledger_entries_for_batch(
        &self,
        table: &str,
        client_id: &str,
        batch_id: &str,
    ) -> StorageResult<Vec<LedgerEntry>> {
        let table = validate_table(table)?;
        let mut entries: Vec<LedgerEntry> = self
            .ledgers
            .iter()
            .filter(|item| {
                item.key().0 == table
                    && item.value().client_id == client_id
                    && item.value().batch_id.as_deref() == Some(batch_id)
            })
            .map(|item| item.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    async fn batch_stats(
        &self,
        table: &str,
        client_id: &str,
        batch_id: &str,
    ) -> StorageResult<BatchStats> {
        let entries = self
            .ledger_entries_for_batch(table, client_id, batch_id)
            .await?;
        let mut stats = BatchStats::default();
        for entry in entries {
            stats.total += 1;
            *stats
                .by_operation
                .entry(entry.operation.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_status
                .entry(entry.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn prune_ledger(&self, table: &str, older_than_days: u32) -> StorageResult<u64> {
        let table = validate_table(table)?;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
        let mut removed = 0u64;
        self.ledgers.retain(|key, entry| {
            if key.0 == table && entry.created_at < cutoff {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn row_snapshots(
        &self,
        table: &str,
        field_id: &str,
        client_id: &str,
        batch_version: &str,
        record_ids: &[String],
    ) -> StorageResult<Vec<RowSnapshot>> {
        let table = validate_table(table)?;
        possync_domain::ident::validate_prefixed(field_id)?;
        let Some(rows) = self.rows.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|row| {
                row.client_id == client_id
                    && row.batch_version == batch_version
                    && record_ids.iter().any(|id| *id == row.record_id)
            })
            .map(|row| RowSnapshot {
                server_id: row.server_id,
                record_id: row.record_id.clone(),
                batch_version: row.batch_version.clone(),
                deleted: row.deleted,
            })
            .collect())
    }

    async fn error_details(
        &self,
        table: &str,
        client_id: &str,
        record_id: &str,
    ) -> StorageResult<Vec<ErrorDetail>> {
        let table = validate_table(table)?;
        let mut details: Vec<ErrorDetail> = self
            .errors
            .iter()
            .filter(|item| {
                item.key().0 == table
                    && item.value().record_id == record_id
                    && item.value().client_id == client_id
            })
            .map(|item| item.value().clone())
            .collect();
        details.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(details)
    }

    async fn client_for_api_key(&self, key_hash: &str) -> StorageResult<Option<String>> {
        Ok(self.api_keys.get(key_hash).map(|client| client.clone()))
    }

    async fn upsert_sync_log(&self, log: &SyncLog) -> StorageResult<SyncLog> {
        let client_id = truncate(&log.client_id, widths::IDENTIFIER);
        let stored = SyncLog {
            client_id: client_id.clone(),
            last_sync_at: log.last_sync_at,
            app_version: log.app_version.clone(),
            files_total: log.files_total,
            files_synced: log.files_synced,
            updated_at: Some(Utc::now()),
        };
        self.sync_logs.insert(client_id, stored.clone());
        Ok(stored)
    }

    async fn sync_log(&self, client_id: &str) -> StorageResult<Option<SyncLog>> {
        Ok(self.sync_logs.get(client_id).map(|log| log.clone()))
    }

    async fn record_activity(&self, samples: &[ActivitySample]) -> StorageResult<()> {
        for sample in samples {
            match self.activity.entry(sample.client_id.clone()) {
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    existing.count += sample.count;
                    existing.last_seen_at = sample.last_seen_at;
                    existing.last_endpoint = sample.last_endpoint.clone();
                }
                Entry::Vacant(slot) => {
                    slot.insert(sample.clone());
                }
            }
        }
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use possync_domain::RawRecord;
    use serde_json::json;

    fn record(id: &str, hash: &str, fields: serde_json::Value) -> serde_json::Value {
        let mut map = match fields {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        map.insert("__meta".to_string(), json!({"hash_id": id, "hash": hash}));
        serde_json::Value::Object(map)
    }

    fn batch(operation: Operation, records: Vec<serde_json::Value>) -> Batch {
        batch_for("tienda1_pos1", "job-1", operation, records)
    }

    fn batch_for(
        client_id: &str,
        job_id: &str,
        operation: Operation,
        records: Vec<serde_json::Value>,
    ) -> Batch {
        Batch {
            operation,
            table_name: "ventas".to_string(),
            client_id: client_id.to_string(),
            field_id: "hash_id".to_string(),
            batch_version: "v1".to_string(),
            records: records.into_iter().map(RawRecord::from_json).collect(),
            job_id: job_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_inserts_rows_and_ledger() {
        let store = MemorySyncStore::new();
        let batch = batch(
            Operation::Create,
            vec![
                record("r1", "h1", json!({"producto": "cafe", "precio": 12.5})),
                record("r2", "h2", json!({"producto": "te"})),
            ],
        );

        let summary = store.apply_batch(&batch, None).await.unwrap();
        assert!(summary.success);
        assert_eq!(summary.records_processed, 2);
        assert_eq!(summary.saved_successfully, 2);
        assert_eq!(summary.save_errors, 0);
        assert!(summary.detailed_results[0].generated_id.is_some());

        let entry = store
            .ledger_entry("ventas", "tienda1_pos1", "v1", "r1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, LedgerStatus::Completed);
        assert_eq!(entry.operation, Operation::Create);
        assert_eq!(entry.batch_id.as_deref(), Some("job-1"));
    }

    #[tokio::test]
    async fn test_create_retry_bypasses_duplicates() {
        let store = MemorySyncStore::new();
        let first = batch(
            Operation::Create,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        store.apply_batch(&first, None).await.unwrap();

        let retry = batch_for(
            "tienda1_pos1",
            "job-2",
            Operation::Create,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        let summary = store.apply_batch(&retry, None).await.unwrap();
        assert!(summary.success);
        assert_eq!(summary.saved_successfully, 1);
        let outcome = &summary.detailed_results[0];
        assert!(outcome.success);
        assert_eq!(outcome.note.as_deref(), Some(DUPLICATE_BYPASS_NOTE));

        // The ledger stores the bypass as ERROR with the note preserved.
        let entry = store
            .ledger_entry("ventas", "tienda1_pos1", "v1", "r1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, LedgerStatus::Error);
        assert_eq!(entry.error_message.as_deref(), Some(DUPLICATE_BYPASS_NOTE));
        assert_eq!(entry.batch_id.as_deref(), Some("job-2"));
    }

    #[tokio::test]
    async fn test_create_duplicate_with_different_hash_fails() {
        let store = MemorySyncStore::new();
        let first = batch(
            Operation::Create,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        store.apply_batch(&first, None).await.unwrap();

        let conflicting = batch_for(
            "tienda1_pos1",
            "job-2",
            Operation::Create,
            vec![record("r1", "h9", json!({"producto": "cafe con leche"}))],
        );
        let summary = store.apply_batch(&conflicting, None).await.unwrap();
        assert!(!summary.success);
        assert_eq!(summary.save_errors, 1);
        let outcome = &summary.detailed_results[0];
        assert_eq!(outcome.error_type, Some(ErrorKind::Constraint));
        assert_eq!(
            outcome.error.as_deref(),
            Some(DUPLICATE_HASH_MISMATCH_MESSAGE)
        );

        let details = store
            .error_details("ventas", "tienda1_pos1", "r1")
            .await
            .unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].error_type, "ConstraintError");
    }

    #[tokio::test]
    async fn test_update_merges_only_non_null_fields() {
        let store = MemorySyncStore::new();
        let create = batch(
            Operation::Create,
            vec![record("r1", "h1", json!({"producto": "cafe", "precio": 12.5}))],
        );
        store.apply_batch(&create, None).await.unwrap();

        let schema = TableSchema::from_json(
            "ventas",
            r#"{"table": "ventas", "fields": [
                {"name": "producto", "type": "C"},
                {"name": "precio", "type": "N"}
            ]}"#,
        )
        .unwrap();
        let update = batch_for(
            "tienda1_pos1",
            "job-2",
            Operation::Update,
            vec![record("r1", "h1", json!({"producto": "cortado", "precio": null}))],
        );
        let summary = store.apply_batch(&update, Some(&schema)).await.unwrap();
        assert!(summary.success);

        let rows = store.rows.get("ventas").unwrap();
        let row = rows
            .iter()
            .find(|row| row.record_id == "r1")
            .unwrap();
        assert_eq!(
            row.fields.get("producto"),
            Some(&Value::Text("cortado".to_string()))
        );
        // The null precio did not erase the stored value.
        assert_eq!(row.fields.get("precio"), Some(&Value::Number(12.5)));
    }

    #[tokio::test]
    async fn test_update_missing_row_reports_not_found() {
        let store = MemorySyncStore::new();
        let update = batch(
            Operation::Update,
            vec![record("nope", "h1", json!({"producto": "cafe"}))],
        );
        let summary = store.apply_batch(&update, None).await.unwrap();
        assert!(!summary.success);
        let outcome = &summary.detailed_results[0];
        assert_eq!(outcome.error_type, Some(ErrorKind::NotFound));
        assert_eq!(outcome.error.as_deref(), Some(UPDATE_NOT_FOUND_MESSAGE));
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_missing_delete_bypasses() {
        let store = MemorySyncStore::new();
        let create = batch(
            Operation::Create,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        store.apply_batch(&create, None).await.unwrap();

        let delete = batch_for(
            "tienda1_pos1",
            "job-2",
            Operation::Delete,
            vec![record("r1", "h1", json!({})), record("ghost", "h2", json!({}))],
        );
        let summary = store.apply_batch(&delete, None).await.unwrap();
        assert!(summary.success);
        assert_eq!(summary.saved_successfully, 2);
        assert!(summary.detailed_results[0].note.is_none());
        assert_eq!(
            summary.detailed_results[1].note.as_deref(),
            Some(DELETE_BYPASS_NOTE)
        );

        let snapshots = store
            .row_snapshots(
                "ventas",
                "hash_id",
                "tienda1_pos1",
                "v1",
                &["r1".to_string()],
            )
            .await
            .unwrap();
        assert!(snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_ledger_keeps_single_entry_per_record() {
        let store = MemorySyncStore::new();
        let batch1 = batch(
            Operation::Create,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        store.mark_batch(&batch1, LedgerStatus::Queued).await.unwrap();
        let queued = store
            .ledger_entry("ventas", "tienda1_pos1", "v1", "r1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.status, LedgerStatus::Queued);

        store.apply_batch(&batch1, None).await.unwrap();
        let entries = store
            .ledger_entries("ventas", "tienda1_pos1", "v1", &["r1".to_string()])
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, LedgerStatus::Completed);
        // The first attempt time survives the upsert.
        assert_eq!(entries[0].created_at, queued.created_at);
    }

    #[tokio::test]
    async fn test_batch_stats_group_by_operation_and_status() {
        let store = MemorySyncStore::new();
        let mixed = batch(
            Operation::Create,
            vec![
                record("r1", "h1", json!({"producto": "cafe"})),
                record("r2", "h2", json!({"producto": "te"})),
            ],
        );
        store.apply_batch(&mixed, None).await.unwrap();
        // Re-send r1 with a different hash so one entry lands as ERROR.
        let conflict = batch(
            Operation::Create,
            vec![record("r1", "h9", json!({"producto": "cafe"}))],
        );
        store.apply_batch(&conflict, None).await.unwrap();

        let stats = store
            .batch_stats("ventas", "tienda1_pos1", "job-1")
            .await
            .unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_operation.get("create"), Some(&2));
        assert_eq!(stats.by_status.get("COMPLETED"), Some(&1));
        assert_eq!(stats.by_status.get("ERROR"), Some(&1));
    }

    #[tokio::test]
    async fn test_prune_ledger_removes_only_old_entries() {
        let store = MemorySyncStore::new();
        let recent = batch(
            Operation::Create,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        store.apply_batch(&recent, None).await.unwrap();

        // Backdate a second entry past the retention window.
        let mut old = LedgerEntry::mark(&recent, "r0", LedgerStatus::Completed);
        old.created_at = Utc::now() - chrono::Duration::days(120);
        store.ledgers.insert(
            (
                "ventas".to_string(),
                old.client_id.clone(),
                old.batch_version.clone(),
                old.record_id.clone(),
            ),
            old,
        );

        let removed = store.prune_ledger("ventas", 90).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store
            .ledger_entry("ventas", "tienda1_pos1", "v1", "r0")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .ledger_entry("ventas", "tienda1_pos1", "v1", "r1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_row_snapshots_scoped_by_client_and_version() {
        let store = MemorySyncStore::new();
        let mine = batch(
            Operation::Create,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        store.apply_batch(&mine, None).await.unwrap();
        let theirs = batch_for(
            "tienda2_pos1",
            "job-9",
            Operation::Create,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        store.apply_batch(&theirs, None).await.unwrap();

        let snapshots = store
            .row_snapshots(
                "ventas",
                "hash_id",
                "tienda1_pos1",
                "v1",
                &["r1".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert!(!snapshots[0].deleted);

        assert!(store.mark_row_deleted("ventas", "tienda1_pos1", "v1", "r1"));
        let snapshots = store
            .row_snapshots(
                "ventas",
                "hash_id",
                "tienda1_pos1",
                "v1",
                &["r1".to_string()],
            )
            .await
            .unwrap();
        assert!(snapshots[0].deleted);
    }

    #[tokio::test]
    async fn test_missing_id_records_fail_validation() {
        let store = MemorySyncStore::new();
        let batch = batch(
            Operation::Create,
            vec![json!({"producto": "cafe", "__meta": {"hash": "h1"}})],
        );
        let summary = store.apply_batch(&batch, None).await.unwrap();
        assert!(!summary.success);
        assert_eq!(summary.save_errors, 1);
        assert_eq!(
            summary.detailed_results[0].error_type,
            Some(ErrorKind::Validation)
        );
        // Without an id there is no ledger key to write.
        let entries = store
            .ledger_entries_for_batch("ventas", "tienda1_pos1", "job-1")
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_table_name_rejects_batch() {
        let store = MemorySyncStore::new();
        let mut bad = batch(
            Operation::Create,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        bad.table_name = "ventas; drop table ventas".to_string();
        let err = store.apply_batch(&bad, None).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_api_key_lookup() {
        let store = MemorySyncStore::new();
        store.insert_api_key("abc123", "tienda1_pos1");
        assert_eq!(
            store.client_for_api_key("abc123").await.unwrap().as_deref(),
            Some("tienda1_pos1")
        );
        assert_eq!(store.client_for_api_key("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_log_upsert_replaces_counts() {
        let store = MemorySyncStore::new();
        let first = SyncLog {
            client_id: "tienda1_pos1".to_string(),
            last_sync_at: Some(Utc::now()),
            app_version: Some("2.1.0".to_string()),
            files_total: 10,
            files_synced: 8,
            updated_at: None,
        };
        let stored = store.upsert_sync_log(&first).await.unwrap();
        assert!(stored.updated_at.is_some());

        let second = SyncLog {
            files_total: 12,
            files_synced: 12,
            ..first
        };
        let stored = store.upsert_sync_log(&second).await.unwrap();
        assert_eq!(stored.files_total, 12);

        let fetched = store.sync_log("tienda1_pos1").await.unwrap().unwrap();
        assert_eq!(fetched.files_synced, 12);
        assert_eq!(fetched.app_version.as_deref(), Some("2.1.0"));
    }

    #[tokio::test]
    async fn test_record_activity_accumulates_counts() {
        let store = MemorySyncStore::new();
        let now = Utc::now();
        let sample = |count: u64, endpoint: &str| ActivitySample {
            client_id: "tienda1_pos1".to_string(),
            last_seen_at: now,
            count,
            last_endpoint: endpoint.to_string(),
        };
        store.record_activity(&[sample(3, "/tables/ventas/batches")]).await.unwrap();
        store.record_activity(&[sample(2, "/clients/sync-log")]).await.unwrap();

        let stored = store.activity.get("tienda1_pos1").unwrap();
        assert_eq!(stored.count, 5);
        assert_eq!(stored.last_endpoint, "/clients/sync-log");
    }

    #[tokio::test]
    async fn test_error_sink_overwrites_per_record_key() {
        let store = MemorySyncStore::new();
        let update = batch(
            Operation::Update,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        store.apply_batch(&update, None).await.unwrap();
        let retry = batch_for(
            "tienda1_pos1",
            "job-2",
            Operation::Update,
            vec![record("r1", "h1", json!({"producto": "cafe"}))],
        );
        store.apply_batch(&retry, None).await.unwrap();

        let details = store
            .error_details("ventas", "tienda1_pos1", "r1")
            .await
            .unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].error_message, UPDATE_NOT_FOUND_MESSAGE);
    }
}
