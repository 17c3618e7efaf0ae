//! Storage error types.

use possync_domain::{DomainError, ErrorKind};
use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection error.
    #[error("database connection error: {message}")]
    ConnectionError { message: String },

    /// Database query error.
    #[error("database query error: {message}")]
    QueryError { message: String },

    /// Transaction error.
    #[error("transaction error: {message}")]
    TransactionError { message: String },

    /// Query exceeded the configured timeout.
    #[error("query timeout after {timeout:?} in operation '{operation}'")]
    QueryTimeout {
        operation: String,
        timeout: std::time::Duration,
    },

    /// Unique key violation.
    #[error("duplicate key: {message}")]
    DuplicateKey { message: String },

    /// Row expected but not found.
    #[error("row not found: {message}")]
    RowNotFound { message: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    pub fn connection(message: impl Into<String>) -> Self {
        StorageError::ConnectionError {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        StorageError::QueryError {
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        StorageError::TransactionError {
            message: message.into(),
        }
    }

    pub fn duplicate_key(message: impl Into<String>) -> Self {
        StorageError::DuplicateKey {
            message: message.into(),
        }
    }

    pub fn row_not_found(message: impl Into<String>) -> Self {
        StorageError::RowNotFound {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        StorageError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        StorageError::InternalError {
            message: message.into(),
        }
    }

    /// True when retrying the same operation may succeed (connection loss,
    /// timeout, aborted transaction). The queue re-enqueues a batch only for
    /// transient apply failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionError { .. }
                | StorageError::QueryTimeout { .. }
                | StorageError::TransactionError { .. }
        )
    }

    /// Per-record failure classification recorded in the error sink.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::DuplicateKey { .. } => ErrorKind::Constraint,
            StorageError::RowNotFound { .. } => ErrorKind::NotFound,
            StorageError::InvalidInput { .. } => ErrorKind::Conversion,
            StorageError::ConnectionError { .. }
            | StorageError::QueryTimeout { .. }
            | StorageError::TransactionError { .. } => ErrorKind::Transient,
            StorageError::QueryError { .. } | StorageError::InternalError { .. } => {
                ErrorKind::Store
            }
        }
    }
}

impl From<DomainError> for StorageError {
    fn from(err: DomainError) -> Self {
        StorageError::InvalidInput {
            message: err.to_string(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::connection("refused").is_transient());
        assert!(StorageError::transaction("aborted").is_transient());
        assert!(StorageError::QueryTimeout {
            operation: "bulk_insert".to_string(),
            timeout: std::time::Duration::from_secs(30),
        }
        .is_transient());

        assert!(!StorageError::duplicate_key("(r-1)").is_transient());
        assert!(!StorageError::row_not_found("r-1").is_transient());
        assert!(!StorageError::invalid_input("bad column").is_transient());
        assert!(!StorageError::query("syntax").is_transient());
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            StorageError::duplicate_key("x").kind(),
            ErrorKind::Constraint
        );
        assert_eq!(StorageError::row_not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(
            StorageError::invalid_input("x").kind(),
            ErrorKind::Conversion
        );
        assert_eq!(StorageError::connection("x").kind(), ErrorKind::Transient);
        assert_eq!(StorageError::query("x").kind(), ErrorKind::Store);
    }

    #[test]
    fn test_domain_error_maps_to_invalid_input() {
        let err: StorageError = DomainError::InvalidIdentifier {
            name: "drop table".to_string(),
        }
        .into();
        assert!(matches!(err, StorageError::InvalidInput { .. }));
    }
}
