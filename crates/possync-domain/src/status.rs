//! Record status resolution.
//!
//! Answers "what is the current status of record X" from two inputs: the
//! ledger entry for the key and the materialized row for the same key. The
//! ledger is consulted first because it captures intent and outcome; the
//! materialized table only verifies data presence. Any mismatch between the
//! two is surfaced as an explicit error, never repaired silently.

use serde::Serialize;

use crate::batch::Operation;
use crate::ledger::{LedgerEntry, LedgerStatus};

/// Note attached when a duplicate create was bypassed.
pub const DUPLICATE_BYPASS_NOTE: &str = "duplicate bypassed";

/// Note attached when a delete of an absent row was bypassed.
pub const DELETE_BYPASS_NOTE: &str = "delete not found bypassed";

/// Error message for an update whose target row does not exist.
pub const UPDATE_NOT_FOUND_MESSAGE: &str = "Registro no encontrado para UPDATE";

/// Error message for a duplicate create whose stored content hash differs
/// from the incoming one. Must never match a bypass pattern: a retry that
/// carries different data is a real conflict, not an idempotent re-send.
pub const DUPLICATE_HASH_MISMATCH_MESSAGE: &str = "duplicate con hash distinto";

/// Error reported when the ledger says COMPLETED but the row is gone.
pub const MISSING_ROW_MESSAGE: &str = "marked COMPLETED but record missing from main table";

/// Error reported when a row exists with no ledger entry behind it.
pub const MISSING_LEDGER_MESSAGE: &str =
    "ledger entry missing but data exists - resend to rebuild history";

/// Ledger messages written by the previous generation of the system that
/// also denote bypassed retries.
const LEGACY_DUPLICATE_PATTERN: &str = "duplicate key value violates unique constraint";
const LEGACY_DELETE_PATTERN: &str = "Registro no encontrado para DELETE";

/// Externally visible status of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// Accepted, apply not finished.
    Processing,
    /// Applied (bypassed retries included).
    Completed,
    /// Last attempt failed, or ledger and table disagree.
    Error,
    /// Never seen: no ledger entry and no row.
    NotFound,
}

impl RecordStatus {
    /// Uppercase wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Processing => "PROCESSING",
            RecordStatus::Completed => "COMPLETED",
            RecordStatus::Error => "ERROR",
            RecordStatus::NotFound => "NOT_FOUND",
        }
    }
}

/// Status-poll projection of a materialized row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSnapshot {
    /// Server-generated row id.
    pub server_id: i64,
    /// Record id.
    pub record_id: String,
    /// Batch version the row was written under.
    pub batch_version: String,
    /// Soft-delete flag.
    pub deleted: bool,
}

/// Resolved status for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusOutcome {
    /// One of the four defined statuses.
    pub status: RecordStatus,
    /// Row projection, present only for verified COMPLETED create/update.
    pub data: Option<RowSnapshot>,
    /// Bypass note, stored error message, or inconsistency message.
    pub note: Option<String>,
}

impl StatusOutcome {
    fn new(status: RecordStatus) -> Self {
        StatusOutcome {
            status,
            data: None,
            note: None,
        }
    }

    fn with_note(status: RecordStatus, note: impl Into<String>) -> Self {
        StatusOutcome {
            status,
            data: None,
            note: Some(note.into()),
        }
    }
}

/// Classifies a stored ledger error message as one of the two bypass
/// conditions, returning the canonical note.
pub fn bypass_note(message: &str) -> Option<&'static str> {
    if message.contains(DUPLICATE_BYPASS_NOTE) || message.contains(LEGACY_DUPLICATE_PATTERN) {
        return Some(DUPLICATE_BYPASS_NOTE);
    }
    if message.contains(DELETE_BYPASS_NOTE) || message.contains(LEGACY_DELETE_PATTERN) {
        return Some(DELETE_BYPASS_NOTE);
    }
    None
}

/// Resolves one record's status from ledger and materialized-table state.
///
/// Pure function of its two inputs; callers fetch the row only for the
/// branches that consult it (ledger COMPLETED on create/update, or no ledger
/// entry at all).
///
/// 1. No ledger entry: row present is an anomaly (ERROR, resend to rebuild
///    history), row absent is NOT_FOUND.
/// 2. QUEUED or PROCESSING: PROCESSING.
/// 3. ERROR: bypass conditions reinterpret to COMPLETED with the note,
///    anything else is ERROR with the stored message.
/// 4. COMPLETED delete: COMPLETED, no row expected. COMPLETED create/update:
///    the row must exist; a missing row is a surfaced inconsistency.
pub fn resolve_status(entry: Option<&LedgerEntry>, row: Option<&RowSnapshot>) -> StatusOutcome {
    let Some(entry) = entry else {
        return match row {
            Some(_) => StatusOutcome::with_note(RecordStatus::Error, MISSING_LEDGER_MESSAGE),
            None => StatusOutcome::new(RecordStatus::NotFound),
        };
    };

    match entry.status {
        LedgerStatus::Queued | LedgerStatus::Processing => {
            StatusOutcome::new(RecordStatus::Processing)
        }
        LedgerStatus::Error => {
            let message = entry.error_message.as_deref().unwrap_or_default();
            match bypass_note(message) {
                Some(note) => StatusOutcome::with_note(RecordStatus::Completed, note),
                None if message.is_empty() => StatusOutcome::new(RecordStatus::Error),
                None => StatusOutcome::with_note(RecordStatus::Error, message),
            }
        }
        LedgerStatus::Completed => match entry.operation {
            Operation::Delete => StatusOutcome::new(RecordStatus::Completed),
            Operation::Create | Operation::Update => match row {
                Some(snapshot) => StatusOutcome {
                    status: RecordStatus::Completed,
                    data: Some(snapshot.clone()),
                    note: None,
                },
                None => StatusOutcome::with_note(RecordStatus::Error, MISSING_ROW_MESSAGE),
            },
        },
    }
}
