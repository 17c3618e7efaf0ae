//! possync-domain: Core synchronization domain logic
//!
//! This crate contains the pure (I/O-free) core of possync:
//! - Field schema model and the on-disk schema file format
//! - The `Value` union and the type conversion layer
//! - Batch/record model and batch preparation
//! - Operations ledger entry model with deterministic truncation
//! - The five-step record status resolution function
//! - SQL identifier validation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               possync-domain                 │
//! ├─────────────────────────────────────────────┤
//! │  schema.rs  - Field schema & file format    │
//! │  value.rs   - Typed value union             │
//! │  convert.rs - Raw value -> Value conversion │
//! │  batch.rs   - Batch model & preparation     │
//! │  ledger.rs  - Ledger entry model            │
//! │  status.rs  - Status resolution             │
//! │  ident.rs   - SQL identifier validation     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod batch;
pub mod convert;
pub mod error;
pub mod ident;
pub mod ledger;
pub mod schema;
pub mod status;
pub mod value;

mod convert_proptest;

// Re-export commonly used types at the crate root
pub use batch::{
    prepare_batch, Batch, BatchSummary, ErrorKind, Operation, PreparedRecord, RawRecord,
    RecordOutcome, DEFAULT_BATCH_VERSION,
};
pub use error::{DomainError, DomainResult};
pub use ledger::{BatchStats, ErrorDetail, LedgerEntry, LedgerStatus};
pub use schema::{FieldSchema, FieldType, TableSchema};
pub use status::{resolve_status, RecordStatus, RowSnapshot, StatusOutcome};
pub use value::Value;
