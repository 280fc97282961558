//! Error types for kyrodoc.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! specific failure and decide whether to correct input or retry.
//!
//! A `reject` decision is deliberately *not* an error: it is a legitimate,
//! non-mutating reconciliation outcome and is reported through
//! [`crate::reconcile::WriteOutcome`] and [`crate::reconcile::ReadOutcome`].

use thiserror::Error;

use crate::decision::OperationKind;
use crate::oracle::OracleError;
use crate::schema::SchemaError;
use crate::storage::StorageError;
use crate::transform::TransformError;

/// Validation errors for caller-supplied input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField { field: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong { field: String, max_length: usize },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Document at index {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("Document at index {index} has a non-string _id")]
    InvalidDocumentId { index: usize },

    #[error("Duplicate document id '{id}'")]
    DuplicateDocumentId { id: String },

    #[error("Batch of {actual} documents exceeds the maximum of {max}")]
    BatchTooLarge { actual: usize, max: usize },

    #[error("Invalid query parameter '{name}': {reason}")]
    InvalidQueryParam { name: String, reason: String },

    #[error("Invalid filter: {reason}")]
    InvalidFilter { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// What a `NotFound` error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingResource {
    Collection { name: String },
    Document { collection: String, id: String },
}

impl std::fmt::Display for MissingResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collection { name } => write!(f, "collection '{name}'"),
            Self::Document { collection, id } => {
                write!(f, "document '{id}' in collection '{collection}'")
            }
        }
    }
}

/// Top-level error type for kyrodoc.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Not found: {0}")]
    NotFound(MissingResource),

    #[error("Operation not allowed: {operation} ({reason})")]
    OperationNotAllowed {
        operation: OperationKind,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<StorageError> for DbError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::CollectionNotFound(name) => {
                Self::NotFound(MissingResource::Collection { name })
            }
            other => Self::Storage(other),
        }
    }
}

impl DbError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error for a collection.
    #[must_use]
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::NotFound(MissingResource::Collection { name: name.into() })
    }

    /// Creates a `NotFound` error for a document.
    #[must_use]
    pub fn document_not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound(MissingResource::Document {
            collection: collection.into(),
            id: id.into(),
        })
    }

    /// Returns true if this is a `NotFound` error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if the caller's allow-list blocked the resolved decision.
    #[must_use]
    pub const fn is_operation_not_allowed(&self) -> bool {
        matches!(self, Self::OperationNotAllowed { .. })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a transform error.
    #[must_use]
    pub const fn is_transform(&self) -> bool {
        matches!(self, Self::Transform(_))
    }

    /// Returns true if this is an oracle error.
    #[must_use]
    pub const fn is_oracle(&self) -> bool {
        matches!(self, Self::Oracle(_))
    }

    /// Returns true if this error may succeed when retried unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Oracle(e) => e.is_transient(),
            Self::Storage(e) => matches!(e, StorageError::Io(_)),
            _ => false,
        }
    }
}

/// Result type alias for kyrodoc operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::InvalidQueryParam {
            name: "limit".to_string(),
            reason: "not a number".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("limit"));
        assert!(msg.contains("not a number"));
    }

    #[test]
    fn test_not_found_display() {
        let err = DbError::document_not_found("albums", "abc");
        assert!(err.is_not_found());
        let msg = err.to_string();
        assert!(msg.contains("albums"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn test_storage_collection_not_found_maps_to_not_found() {
        let err: DbError = StorageError::CollectionNotFound("albums".to_string()).into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_operation_not_allowed() {
        let err = DbError::OperationNotAllowed {
            operation: OperationKind::IsSuperset,
            reason: "not in allow-list".to_string(),
        };
        assert!(err.is_operation_not_allowed());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("isSuperset"));
    }

    #[test]
    fn test_retryable() {
        let err: DbError = OracleError::Timeout { duration_ms: 10 }.into();
        assert!(err.is_retryable());

        let err: DbError = OracleError::InvalidResponse {
            reason: "garbage".to_string(),
        }
        .into();
        assert!(!err.is_retryable());

        let err: DbError = ValidationError::MissingField {
            field: "name".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }
}
