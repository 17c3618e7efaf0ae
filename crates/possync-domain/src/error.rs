//! Domain error types for batch synchronization.

use thiserror::Error;

/// Domain-specific errors for batch synchronization operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A table, column or field name is not a safe SQL identifier.
    #[error("invalid sql identifier: {name}")]
    InvalidIdentifier { name: String },

    /// An operation kind string could not be parsed.
    #[error("invalid operation: {value}")]
    InvalidOperation { value: String },

    /// A record's envelope does not carry the id tag the batch names.
    #[error("record missing id tag '{field_id}'")]
    MissingRecordId { field_id: String },

    /// A batch was submitted with no records.
    #[error("batch contains no records")]
    EmptyBatch,

    /// A schema file could not be parsed.
    #[error("schema parse error for table '{table}': {message}")]
    SchemaParseError { table: String, message: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
