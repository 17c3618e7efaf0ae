//! Batch and record model, and batch preparation.
//!
//! A batch is the unit of delivery from the queue: one operation kind
//! applied to a list of records for one table, tenant and batch version.
//! Preparation splits each record into converted data fields and envelope
//! tags, extracting the record id; the result is what both storage backends
//! consume.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::convert;
use crate::error::{DomainError, DomainResult};
use crate::schema::TableSchema;
use crate::value::Value;

/// Envelope key attached to every record by the terminals.
pub const ENVELOPE_KEY: &str = "__meta";

/// Envelope tags that are transient and never persisted as columns.
pub const SKIPPED_ENVELOPE_KEYS: [&str; 2] = ["recno", "ref_date"];

/// Envelope tag carrying the optional content hash used to qualify
/// duplicate bypasses.
pub const HASH_ENVELOPE_KEY: &str = "hash";

/// Batch version applied when the caller does not send one.
pub const DEFAULT_BATCH_VERSION: &str = "1.0";

/// Operation kind of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Insert new rows.
    Create,
    /// Update existing rows in place.
    Update,
    /// Remove rows.
    Delete,
}

impl Operation {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Parses an operation kind, case-insensitively.
    pub fn parse(value: &str) -> DomainResult<Self> {
        match value.to_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            _ => Err(DomainError::InvalidOperation {
                value: value.to_string(),
            }),
        }
    }

    /// Parses a stored operation kind. Unknown values resolve to `Update`,
    /// the kind whose status read verifies the materialized row, so garbage
    /// in the ledger is surfaced rather than trusted.
    pub fn parse_lossy(value: &str) -> Self {
        Operation::parse(value).unwrap_or(Operation::Update)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One wire record: a field map that may carry an `__meta` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub serde_json::Map<String, JsonValue>);

impl RawRecord {
    /// Builds a record from a JSON value; non-objects yield an empty record.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => RawRecord(map),
            _ => RawRecord(serde_json::Map::new()),
        }
    }
}

/// One delivered unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Operation applied to every record.
    pub operation: Operation,
    /// Target logical table.
    pub table_name: String,
    /// Tenant identifier.
    pub client_id: String,
    /// Name of the envelope tag holding each record's id.
    pub field_id: String,
    /// Caller-supplied version tag partitioning the tenant's record space.
    pub batch_version: String,
    /// Records to apply.
    pub records: Vec<RawRecord>,
    /// Queue job id this batch was delivered under.
    pub job_id: String,
}

impl Batch {
    /// Partition key derived from the tenant id: the prefix before the first
    /// `_`, or the whole id when there is no separator.
    pub fn partition_key(&self) -> &str {
        match self.client_id.split_once('_') {
            Some((prefix, _)) => prefix,
            None => &self.client_id,
        }
    }
}

/// A record after conversion and envelope splitting.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRecord {
    /// Record id extracted from the envelope, if present.
    pub record_id: Option<String>,
    /// Converted data fields, keyed by the wire field name.
    pub fields: BTreeMap<String, Value>,
    /// Persisted envelope tags (skip-listed tags removed), keyed by tag name.
    pub meta: BTreeMap<String, String>,
}

impl PreparedRecord {
    /// The comparison hash tag, when the envelope carried one.
    pub fn hash_tag(&self) -> Option<&str> {
        self.meta.get(HASH_ENVELOPE_KEY).map(String::as_str)
    }
}

/// Converts and splits every record of a batch.
///
/// Conversion never fails (see [`crate::convert`]); a record without an id
/// tag yields `record_id: None` and is reported as a per-record error by the
/// engine rather than aborting the batch.
pub fn prepare_batch(batch: &Batch, schema: Option<&TableSchema>) -> Vec<PreparedRecord> {
    batch
        .records
        .iter()
        .map(|record| prepare_record(record, &batch.field_id, schema))
        .collect()
}

fn prepare_record(
    record: &RawRecord,
    field_id: &str,
    schema: Option<&TableSchema>,
) -> PreparedRecord {
    let mut fields = BTreeMap::new();
    let mut meta = BTreeMap::new();
    let mut record_id = None;

    for (key, value) in &record.0 {
        if key == ENVELOPE_KEY {
            let JsonValue::Object(tags) = value else {
                continue;
            };
            for (tag, tag_value) in tags {
                if SKIPPED_ENVELOPE_KEYS.contains(&tag.as_str()) {
                    continue;
                }
                let Some(normalized) = convert::normalize(tag_value) else {
                    continue;
                };
                let text = convert::scalar_text(normalized);
                if tag == field_id {
                    record_id = Some(text.clone());
                }
                meta.insert(tag.clone(), text);
            }
            continue;
        }
        let descriptor = schema.and_then(|s| s.field(key));
        fields.insert(key.clone(), convert::convert(value, descriptor));
    }

    PreparedRecord {
        record_id,
        fields,
        meta,
    }
}

/// Classification of a per-record failure, persisted to the error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Uniqueness/constraint violation.
    Constraint,
    /// Update/delete target missing.
    NotFound,
    /// Value could not be stored in the declared column type.
    Conversion,
    /// Connection or timeout failure, retriable by batch re-delivery.
    Transient,
    /// Malformed record shape (e.g. missing id).
    Validation,
    /// Anything else the store reported.
    Store,
}

impl ErrorKind {
    /// Class name recorded in the error sink.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Constraint => "ConstraintError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Conversion => "ConversionError",
            ErrorKind::Transient => "TransientStoreError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Store => "StoreError",
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Final outcome of one record's attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutcome {
    /// Record id, when the envelope carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// `success` or `error`; bypassed records are successes.
    #[serde(rename = "status", serialize_with = "serialize_status")]
    pub success: bool,
    /// Error message for real failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification for real failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    /// Bypass note for idempotent retries reported as success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Server-generated row id, for created rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_id: Option<i64>,
}

fn serialize_status<S: Serializer>(success: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *success { "success" } else { "error" })
}

impl RecordOutcome {
    /// Plain success.
    pub fn success(record_id: Option<String>) -> Self {
        RecordOutcome {
            record_id,
            success: true,
            error: None,
            error_type: None,
            note: None,
            generated_id: None,
        }
    }

    /// Success for a created row, carrying the generated server id.
    pub fn created(record_id: Option<String>, generated_id: i64) -> Self {
        RecordOutcome {
            generated_id: Some(generated_id),
            ..RecordOutcome::success(record_id)
        }
    }

    /// Idempotent retry reported as success with a note.
    pub fn bypassed(record_id: Option<String>, note: &str) -> Self {
        RecordOutcome {
            note: Some(note.to_string()),
            ..RecordOutcome::success(record_id)
        }
    }

    /// Real failure.
    pub fn failed(
        record_id: Option<String>,
        error_type: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        RecordOutcome {
            record_id,
            success: false,
            error: Some(message.into()),
            error_type: Some(error_type),
            note: None,
            generated_id: None,
        }
    }
}

/// Aggregated result of one applied batch, returned to the queue wrapper.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    /// True iff every record's final status is non-error.
    pub success: bool,
    /// Operation applied.
    pub operation: Operation,
    /// Target table.
    pub table: String,
    /// Total records in the batch.
    pub records_processed: usize,
    /// Records whose final status is success (bypasses included).
    pub saved_successfully: usize,
    /// Records whose final status is error.
    pub save_errors: usize,
    /// Per-record outcomes, in batch order.
    pub detailed_results: Vec<RecordOutcome>,
}

impl BatchSummary {
    /// Aggregates per-record outcomes into the batch contract.
    pub fn from_outcomes(batch: &Batch, detailed_results: Vec<RecordOutcome>) -> Self {
        let saved_successfully = detailed_results.iter().filter(|r| r.success).count();
        let save_errors = detailed_results.len() - saved_successfully;
        BatchSummary {
            success: save_errors == 0,
            operation: batch.operation,
            table: batch.table_name.clone(),
            records_processed: detailed_results.len(),
            saved_successfully,
            save_errors,
            detailed_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_batch(records: Vec<JsonValue>) -> Batch {
        Batch {
            operation: Operation::Create,
            table_name: "xcorte".to_string(),
            client_id: "ARAUC_XALAP".to_string(),
            field_id: "hash_id".to_string(),
            batch_version: "v1".to_string(),
            records: records.into_iter().map(RawRecord::from_json).collect(),
            job_id: "job-1".to_string(),
        }
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("create").unwrap(), Operation::Create);
        assert_eq!(Operation::parse("UPDATE").unwrap(), Operation::Update);
        assert_eq!(Operation::parse("Delete").unwrap(), Operation::Delete);
        assert!(Operation::parse("upsert").is_err());
    }

    #[test]
    fn test_operation_parse_lossy_defaults_to_update() {
        assert_eq!(Operation::parse_lossy("delete"), Operation::Delete);
        assert_eq!(Operation::parse_lossy("garbage"), Operation::Update);
    }

    #[test]
    fn test_partition_key_derivation() {
        let batch = test_batch(vec![]);
        assert_eq!(batch.partition_key(), "ARAUC");

        let mut plain = test_batch(vec![]);
        plain.client_id = "XALAP".to_string();
        assert_eq!(plain.partition_key(), "XALAP");
    }

    #[test]
    fn test_prepare_splits_envelope_and_extracts_id() {
        let batch = test_batch(vec![json!({
            "vta": "12.50",
            "descrip": "  caja  ",
            "__meta": {
                "hash_id": "r-1",
                "hash": "abc123",
                "recno": 7,
                "ref_date": "2025-01-01"
            }
        })]);
        let prepared = prepare_batch(&batch, None);
        assert_eq!(prepared.len(), 1);
        let record = &prepared[0];
        assert_eq!(record.record_id.as_deref(), Some("r-1"));
        assert_eq!(record.hash_tag(), Some("abc123"));
        // skip-listed tags never persist
        assert!(!record.meta.contains_key("recno"));
        assert!(!record.meta.contains_key("ref_date"));
        assert_eq!(record.meta.get("hash_id").map(String::as_str), Some("r-1"));
        // no schema: natural typing, strings kept as sent
        assert_eq!(
            record.fields.get("descrip"),
            Some(&Value::Text("  caja  ".to_string()))
        );
    }

    #[test]
    fn test_prepare_applies_schema_conversion() {
        use crate::schema::TableSchema;
        let schema = TableSchema::from_json(
            "xcorte",
            r#"{"table":"xcorte","fields":[
                {"name":"vta","type":"N","length":12,"decimal_places":4},
                {"name":"fecha","type":"D"}
            ]}"#,
        )
        .unwrap();
        let batch = test_batch(vec![json!({
            "vta": "3957.3300",
            "fecha": "25/09/2025",
            "__meta": {"hash_id": "r-1"}
        })]);
        let prepared = prepare_batch(&batch, Some(&schema));
        assert_eq!(prepared[0].fields.get("vta"), Some(&Value::Number(3957.33)));
        assert_eq!(
            prepared[0].fields.get("fecha").map(ToString::to_string),
            Some("2025-09-25".to_string())
        );
    }

    #[test]
    fn test_prepare_without_id_yields_none() {
        let batch = test_batch(vec![json!({"vta": "1", "__meta": {"other": "x"}})]);
        let prepared = prepare_batch(&batch, None);
        assert_eq!(prepared[0].record_id, None);
    }

    #[test]
    fn test_prepare_numeric_id_is_stringified() {
        let batch = test_batch(vec![json!({"__meta": {"hash_id": 42}})]);
        let prepared = prepare_batch(&batch, None);
        assert_eq!(prepared[0].record_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_summary_counts_and_success_flag() {
        let batch = test_batch(vec![]);
        let outcomes = vec![
            RecordOutcome::created(Some("a".into()), 1),
            RecordOutcome::bypassed(Some("b".into()), "duplicate bypassed"),
            RecordOutcome::failed(Some("c".into()), ErrorKind::NotFound, "missing"),
        ];
        let summary = BatchSummary::from_outcomes(&batch, outcomes);
        assert!(!summary.success);
        assert_eq!(summary.records_processed, 3);
        assert_eq!(summary.saved_successfully, 2);
        assert_eq!(summary.save_errors, 1);

        let all_ok = BatchSummary::from_outcomes(
            &batch,
            vec![RecordOutcome::success(Some("a".into()))],
        );
        assert!(all_ok.success);
    }

    #[test]
    fn test_outcome_serializes_status_label() {
        let ok = serde_json::to_value(RecordOutcome::success(Some("a".into()))).unwrap();
        assert_eq!(ok["status"], "success");
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(RecordOutcome::failed(
            Some("b".into()),
            ErrorKind::Constraint,
            "boom",
        ))
        .unwrap();
        assert_eq!(err["status"], "error");
        assert_eq!(err["error"], "boom");
        assert_eq!(err["error_type"], "ConstraintError");
    }
}
