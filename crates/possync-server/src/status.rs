//! Status poll orchestration.
//!
//! Puts the pure resolution function behind two batched reads: the ledger
//! entries for every polled key, then row snapshots only for the keys whose
//! resolution consults the materialized table. One poll costs at most two
//! round trips regardless of how many records it asks about.

use std::collections::HashMap;
use std::sync::Arc;

use possync_domain::{
    resolve_status, LedgerEntry, LedgerStatus, Operation, RecordStatus, RowSnapshot,
};
use possync_storage::{StorageResult, SyncStore};
use serde::Serialize;
use tracing::{instrument, warn};

/// One status poll, scoped the way every engine statement is scoped.
#[derive(Debug, Clone)]
pub struct StatusQuery {
    /// Target logical table.
    pub table: String,
    /// Name of the envelope tag holding each record's id.
    pub field_id: String,
    /// Tenant identifier.
    pub client_id: String,
    /// Batch version partition.
    pub batch_version: String,
    /// Record ids to resolve, reported back in this order.
    pub record_ids: Vec<String>,
}

/// Resolution result for one polled record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordStatusEntry {
    /// Polled record id.
    pub id: String,
    /// Resolved status.
    pub status: RecordStatus,
    /// Row projection for verified COMPLETED create/update, `null` otherwise.
    pub data: Option<RowSnapshot>,
    /// Bypass note, stored error message, or inconsistency message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Response of one poll.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Number of records resolved.
    pub total: usize,
    /// Per-record results, in request order.
    pub records: Vec<RecordStatusEntry>,
}

/// Read-only reconciliation service over a [`SyncStore`].
pub struct StatusService<S> {
    store: Arc<S>,
}

impl<S: SyncStore> StatusService<S> {
    pub fn new(store: Arc<S>) -> Self {
        StatusService { store }
    }

    /// Resolves the status of every polled record. Pure read, safe to call
    /// repeatedly.
    ///
    /// A failed ledger read fails the poll (nothing can be resolved without
    /// the ledger). A failed row verification read degrades instead: the
    /// affected records resolve as if their rows were absent, which steers
    /// the terminal toward a resend, and resends are idempotent.
    #[instrument(skip(self, query), fields(
        table = %query.table,
        client_id = %query.client_id,
        records = query.record_ids.len()
    ))]
    pub async fn check_status(&self, query: &StatusQuery) -> StorageResult<StatusReport> {
        let entries = self
            .store
            .ledger_entries(
                &query.table,
                &query.client_id,
                &query.batch_version,
                &query.record_ids,
            )
            .await?;
        let entries_by_id: HashMap<&str, &LedgerEntry> = entries
            .iter()
            .map(|entry| (entry.record_id.as_str(), entry))
            .collect();

        let verify_ids: Vec<String> = query
            .record_ids
            .iter()
            .filter(|id| needs_row(entries_by_id.get(id.as_str()).copied()))
            .cloned()
            .collect();

        let rows = if verify_ids.is_empty() {
            Vec::new()
        } else {
            match self
                .store
                .row_snapshots(
                    &query.table,
                    &query.field_id,
                    &query.client_id,
                    &query.batch_version,
                    &verify_ids,
                )
                .await
            {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(error = %err, "row verification read failed, resolving without rows");
                    Vec::new()
                }
            }
        };
        let rows_by_id: HashMap<&str, &RowSnapshot> = rows
            .iter()
            .map(|row| (row.record_id.as_str(), row))
            .collect();

        let records: Vec<RecordStatusEntry> = query
            .record_ids
            .iter()
            .map(|id| {
                let outcome = resolve_status(
                    entries_by_id.get(id.as_str()).copied(),
                    rows_by_id.get(id.as_str()).copied(),
                );
                RecordStatusEntry {
                    id: id.clone(),
                    status: outcome.status,
                    data: outcome.data,
                    note: outcome.note,
                }
            })
            .collect();

        Ok(StatusReport {
            total: records.len(),
            records,
        })
    }
}

/// The resolution branches that consult the materialized table: no ledger
/// entry at all, or COMPLETED create/update awaiting data verification.
fn needs_row(entry: Option<&LedgerEntry>) -> bool {
    match entry {
        None => true,
        Some(entry) => {
            entry.status == LedgerStatus::Completed && entry.operation != Operation::Delete
        }
    }
}
