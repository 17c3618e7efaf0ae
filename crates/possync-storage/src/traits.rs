//! SyncStore trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use possync_domain::ident::{validate_identifier, validate_prefixed};
use possync_domain::{
    Batch, BatchStats, BatchSummary, DomainError, ErrorDetail, ErrorKind, LedgerEntry,
    LedgerStatus, PreparedRecord, RecordOutcome, RowSnapshot, TableSchema,
};

use crate::error::StorageResult;

/// Per-client synchronization telemetry, upserted by the terminals after
/// each sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    /// Tenant id.
    pub client_id: String,
    /// Client-reported time of the last completed sync.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Client application version.
    pub app_version: Option<String>,
    /// Files the client intended to sync.
    #[serde(default)]
    pub files_total: i64,
    /// Files the client finished syncing.
    #[serde(default)]
    pub files_synced: i64,
    /// Server-side write time, set by the store.
    pub updated_at: Option<DateTime<Utc>>,
}

/// One drained heartbeat sample from the activity tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySample {
    /// Tenant id.
    pub client_id: String,
    /// Time of the client's most recent request in the buffer window.
    pub last_seen_at: DateTime<Utc>,
    /// Requests seen in the buffer window.
    pub count: u64,
    /// Route of the most recent request.
    pub last_endpoint: String,
}

/// Validates a logical table name, returning the lowercased form.
pub fn validate_table(table: &str) -> StorageResult<String> {
    Ok(validate_identifier(table)?)
}

/// Name of a table's operations ledger.
pub fn ledger_table(table: &str) -> StorageResult<String> {
    Ok(format!("{}_operations", validate_table(table)?))
}

/// Name of a table's legacy error sink.
pub fn sink_table(table: &str) -> StorageResult<String> {
    Ok(format!("{}_errors", validate_table(table)?))
}

/// Validates every identifier a batch would put into SQL: the table, the id
/// column, and every data field and envelope tag column. Any violation fails
/// the whole batch before a statement is assembled.
pub fn validate_batch_identifiers(
    table: &str,
    field_id: &str,
    prepared: &[PreparedRecord],
) -> StorageResult<()> {
    validate_identifier(table)?;
    validate_prefixed(field_id)?;
    for record in prepared {
        for name in record.fields.keys() {
            validate_identifier(name)?;
        }
        for tag in record.meta.keys() {
            validate_prefixed(tag)?;
        }
    }
    Ok(())
}

/// Outcome recorded for a record whose envelope lacks the batch's id tag.
///
/// Such a record never reaches the database; both backends report it the
/// same way so the ledger and the summary agree across backends.
pub fn missing_id_outcome(field_id: &str) -> RecordOutcome {
    RecordOutcome::failed(
        None,
        ErrorKind::Validation,
        DomainError::MissingRecordId {
            field_id: field_id.to_string(),
        }
        .to_string(),
    )
}

/// Abstract store for batch synchronization.
///
/// Implementations must be thread-safe (Send + Sync) and keep the outcome
/// semantics of the apply engine identical across backends: bypassed
/// duplicate creates, bypassed not-found deletes, not-found update errors,
/// and a ledger upsert for every identified record.
#[async_trait]
pub trait SyncStore: Send + Sync + 'static {
    // Batch apply

    /// Applies one batch to its table and upserts the resulting ledger
    /// entries. Per-record failures are reported in the summary, never as
    /// `Err`; `Err` means the batch as a whole could not be attempted
    /// (invalid identifiers) or a transient transport failure worth
    /// re-delivery.
    async fn apply_batch(
        &self,
        batch: &Batch,
        schema: Option<&TableSchema>,
    ) -> StorageResult<BatchSummary>;

    /// Upserts a lifecycle status (QUEUED, PROCESSING) for every identified
    /// record of the batch.
    async fn mark_batch(&self, batch: &Batch, status: LedgerStatus) -> StorageResult<()>;

    // Ledger reads

    /// Fetches one ledger entry by its primary key.
    async fn ledger_entry(
        &self,
        table: &str,
        client_id: &str,
        batch_version: &str,
        record_id: &str,
    ) -> StorageResult<Option<LedgerEntry>>;

    /// Fetches the ledger entries for a set of record ids under one client
    /// and batch version. Missing keys are simply absent from the result.
    async fn ledger_entries(
        &self,
        table: &str,
        client_id: &str,
        batch_version: &str,
        record_ids: &[String],
    ) -> StorageResult<Vec<LedgerEntry>>;

    /// Fetches all ledger entries recorded under one queue job id, oldest
    /// first.
    async fn ledger_entries_for_batch(
        &self,
        table: &str,
        client_id: &str,
        batch_id: &str,
    ) -> StorageResult<Vec<LedgerEntry>>;

    /// Aggregates ledger counts for one queue job id.
    async fn batch_stats(
        &self,
        table: &str,
        client_id: &str,
        batch_id: &str,
    ) -> StorageResult<BatchStats>;

    /// Deletes ledger entries older than the retention window, returning the
    /// number removed.
    async fn prune_ledger(&self, table: &str, older_than_days: u32) -> StorageResult<u64>;

    // Materialized table reads

    /// Fetches status-poll projections of the materialized rows for a set of
    /// record ids under one client and batch version.
    async fn row_snapshots(
        &self,
        table: &str,
        field_id: &str,
        client_id: &str,
        batch_version: &str,
        record_ids: &[String],
    ) -> StorageResult<Vec<RowSnapshot>>;

    /// Fetches the legacy error-sink rows for one record, newest first.
    async fn error_details(
        &self,
        table: &str,
        client_id: &str,
        record_id: &str,
    ) -> StorageResult<Vec<ErrorDetail>>;

    // Authentication

    /// Resolves an API key hash (SHA-256 hex) to its active client id.
    async fn client_for_api_key(&self, key_hash: &str) -> StorageResult<Option<String>>;

    // Client telemetry

    /// Upserts a client's sync log, returning the stored row.
    async fn upsert_sync_log(&self, log: &SyncLog) -> StorageResult<SyncLog>;

    /// Fetches a client's sync log.
    async fn sync_log(&self, client_id: &str) -> StorageResult<Option<SyncLog>>;

    /// Accumulates drained activity heartbeats.
    async fn record_activity(&self, samples: &[ActivitySample]) -> StorageResult<()>;

    // Health

    /// Cheap round trip to the backing store, used by the readiness probe.
    async fn ping(&self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use possync_domain::Value;
    use std::collections::BTreeMap;

    #[test]
    fn test_table_name_helpers() {
        assert_eq!(ledger_table("xcorte").unwrap(), "xcorte_operations");
        assert_eq!(sink_table("XCorte").unwrap(), "xcorte_errors");
        assert!(ledger_table("items; drop table x").is_err());
        assert!(sink_table("1items").is_err());
    }

    #[test]
    fn test_batch_identifier_validation() {
        let mut fields = BTreeMap::new();
        fields.insert("vta".to_string(), Value::Number(1.0));
        let mut meta = BTreeMap::new();
        meta.insert("hash_id".to_string(), "r-1".to_string());
        let prepared = vec![PreparedRecord {
            record_id: Some("r-1".to_string()),
            fields,
            meta,
        }];
        assert!(validate_batch_identifiers("xcorte", "hash_id", &prepared).is_ok());

        let mut bad_fields = BTreeMap::new();
        bad_fields.insert("vta\"; --".to_string(), Value::Number(1.0));
        let bad = vec![PreparedRecord {
            record_id: Some("r-1".to_string()),
            fields: bad_fields,
            meta: BTreeMap::new(),
        }];
        assert!(validate_batch_identifiers("xcorte", "hash_id", &bad).is_err());
    }
}
