//! Abstract storage trait for kyrodoc.
//!
//! The reconciliation engine only needs whole-collection reads and batch
//! writes, so the contract is small:
//! - collection lifecycle (`create_collection`, `delete_collection`, ...)
//! - `get_all` / `get` for reads
//! - `set` (upsert by `_id`) and `remove` for writes
//!
//! Backends must treat each `set` and `remove` call as one logical unit.

use thiserror::Error;

use crate::document::Document;

/// Errors that can occur during storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Collection does not exist.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Collection already exists.
    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Storage trait for collections of documents.
///
/// # Safety Considerations
/// - `set` and `remove` must apply the whole batch or nothing
/// - Implementations should handle concurrent access safely
/// - Reads return documents in insertion order; an upsert keeps the
///   position of the document it replaces
pub trait DocumentStore: Send + Sync {
    /// Create an empty collection. Fails with `CollectionExists` if present.
    fn create_collection(&self, name: &str) -> Result<(), StorageError>;

    /// Returns true if the collection exists.
    fn collection_exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Names of all collections, in creation order.
    fn collection_names(&self) -> Result<Vec<String>, StorageError>;

    /// Delete a collection and all of its documents.
    fn delete_collection(&self, name: &str) -> Result<(), StorageError>;

    /// All documents of a collection.
    fn get_all(&self, collection: &str) -> Result<Vec<Document>, StorageError>;

    /// A single document by id.
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError>;

    /// Upsert a batch of documents by `_id`.
    fn set(&self, collection: &str, documents: Vec<Document>) -> Result<(), StorageError>;

    /// Remove documents by id. Unknown ids are ignored.
    ///
    /// Returns the number of documents actually removed.
    fn remove(&self, collection: &str, ids: &[String]) -> Result<usize, StorageError>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    fn create_collection(&self, name: &str) -> Result<(), StorageError> {
        (**self).create_collection(name)
    }

    fn collection_exists(&self, name: &str) -> Result<bool, StorageError> {
        (**self).collection_exists(name)
    }

    fn collection_names(&self) -> Result<Vec<String>, StorageError> {
        (**self).collection_names()
    }

    fn delete_collection(&self, name: &str) -> Result<(), StorageError> {
        (**self).delete_collection(name)
    }

    fn get_all(&self, collection: &str) -> Result<Vec<Document>, StorageError> {
        (**self).get_all(collection)
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError> {
        (**self).get(collection, id)
    }

    fn set(&self, collection: &str, documents: Vec<Document>) -> Result<(), StorageError> {
        (**self).set(collection, documents)
    }

    fn remove(&self, collection: &str, ids: &[String]) -> Result<usize, StorageError> {
        (**self).remove(collection, ids)
    }
}
