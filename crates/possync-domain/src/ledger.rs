//! Operations ledger and error sink models.
//!
//! The ledger (`<table>_operations`) is the source of truth for "did this
//! record's last attempt succeed": one entry per
//! `(client_id, batch_version, record_id)`, upserted on every attempt.
//! The error sink (`<table>_errors`) keeps legacy per-failure detail rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::batch::{Batch, Operation, RecordOutcome};

/// Column widths the ledger truncates to on write. Oversized metadata is cut
/// deterministically, never rejected, so it cannot block a ledger write.
pub mod widths {
    /// Operation kind.
    pub const OPERATION: usize = 10;
    /// Status.
    pub const STATUS: usize = 20;
    /// client_id, record_id, batch_version and batch_id.
    pub const IDENTIFIER: usize = 100;
    /// field_id.
    pub const FIELD_ID: usize = 50;
    /// Error sink: client_id.
    pub const SINK_CLIENT: usize = 50;
    /// Error sink: operation.
    pub const SINK_OPERATION: usize = 20;
    /// Error sink: error class name.
    pub const SINK_ERROR_TYPE: usize = 50;
    /// Error sink: field_id.
    pub const SINK_FIELD_ID: usize = 50;
}

/// Truncates a value to at most `max` characters.
pub fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Lifecycle status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    /// Accepted by the ingress, not yet picked up.
    Queued,
    /// Picked up by a worker, apply in flight.
    Processing,
    /// Last attempt succeeded.
    Completed,
    /// Last attempt failed (bypassed retries are stored as ERROR with the
    /// bypass note as message and reinterpreted at read time).
    Error,
}

impl LedgerStatus {
    /// Uppercase form stored in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Queued => "QUEUED",
            LedgerStatus::Processing => "PROCESSING",
            LedgerStatus::Completed => "COMPLETED",
            LedgerStatus::Error => "ERROR",
        }
    }

    /// Parses a stored status. Unknown values resolve to `Error`: status
    /// ambiguity is always resolved towards ERROR, never towards COMPLETED.
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "QUEUED" => LedgerStatus::Queued,
            "PROCESSING" => LedgerStatus::Processing,
            "COMPLETED" => LedgerStatus::Completed,
            _ => LedgerStatus::Error,
        }
    }
}

/// One ledger entry, keyed by `(client_id, batch_version, record_id)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    /// Tenant id.
    pub client_id: String,
    /// Record id within the tenant/version space.
    pub record_id: String,
    /// Batch version tag.
    pub batch_version: String,
    /// Name of the envelope tag holding the record id.
    pub field_id: String,
    /// Operation of the last attempt.
    pub operation: Operation,
    /// Status of the last attempt.
    pub status: LedgerStatus,
    /// Error message (or bypass note) of the last attempt.
    pub error_message: Option<String>,
    /// Queue job id of the last attempt.
    pub batch_id: Option<String>,
    /// First attempt time.
    pub created_at: DateTime<Utc>,
    /// Last attempt time.
    pub processed_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Entry for a lifecycle mark (QUEUED at accept, PROCESSING at pickup).
    pub fn mark(batch: &Batch, record_id: &str, status: LedgerStatus) -> Self {
        let now = Utc::now();
        LedgerEntry {
            client_id: truncate(&batch.client_id, widths::IDENTIFIER),
            record_id: truncate(record_id, widths::IDENTIFIER),
            batch_version: truncate(&batch.batch_version, widths::IDENTIFIER),
            field_id: truncate(&batch.field_id, widths::FIELD_ID),
            operation: batch.operation,
            status,
            error_message: None,
            batch_id: Some(truncate(&batch.job_id, widths::IDENTIFIER)),
            created_at: now,
            processed_at: now,
        }
    }

    /// Entry for a final per-record outcome. Bypassed successes are stored
    /// as ERROR carrying the bypass note, real successes as COMPLETED.
    pub fn from_outcome(batch: &Batch, record_id: &str, outcome: &RecordOutcome) -> Self {
        let status = match (outcome.success, &outcome.note) {
            (true, None) => LedgerStatus::Completed,
            (true, Some(_)) => LedgerStatus::Error,
            (false, _) => LedgerStatus::Error,
        };
        let message = outcome.error.clone().or_else(|| outcome.note.clone());
        LedgerEntry {
            status,
            error_message: message,
            ..LedgerEntry::mark(batch, record_id, status)
        }
    }
}

/// Per-failure detail row for the legacy error sink.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    /// Record id.
    pub record_id: String,
    /// Tenant id, truncated to the sink width.
    pub client_id: String,
    /// Operation kind, uppercase.
    pub operation: String,
    /// Error class name.
    pub error_type: String,
    /// Full error message.
    pub error_message: String,
    /// Envelope id tag name.
    pub field_id: String,
    /// Failing record payload.
    pub record_data: serde_json::Value,
    /// Batch version tag.
    pub batch_version: String,
    /// Write time.
    pub created_at: DateTime<Utc>,
}

impl ErrorDetail {
    /// Builds a sink row from a failed outcome.
    pub fn from_outcome(
        batch: &Batch,
        record_id: &str,
        outcome: &RecordOutcome,
        record_data: serde_json::Value,
    ) -> Self {
        ErrorDetail {
            record_id: record_id.to_string(),
            client_id: truncate(&batch.client_id, widths::SINK_CLIENT),
            operation: truncate(
                &batch.operation.as_str().to_uppercase(),
                widths::SINK_OPERATION,
            ),
            error_type: truncate(
                outcome
                    .error_type
                    .map(|k| k.as_str())
                    .unwrap_or("StoreError"),
                widths::SINK_ERROR_TYPE,
            ),
            error_message: outcome.error.clone().unwrap_or_default(),
            field_id: truncate(&batch.field_id, widths::SINK_FIELD_ID),
            record_data,
            batch_version: batch.batch_version.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Ledger statistics for one delivered batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    /// Entries recorded under the batch id.
    pub total: u64,
    /// Counts grouped by operation kind.
    pub by_operation: BTreeMap<String, u64>,
    /// Counts grouped by status.
    pub by_status: BTreeMap<String, u64>,
}
