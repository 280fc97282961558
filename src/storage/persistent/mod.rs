//! Persistent storage backend for kyrodoc.
//!
//! This module provides a durable, crash-safe [`DocumentStore`] with:
//! - An append-only operation log, one entry per batch
//! - File locking for single-process access
//! - CRC32 checksums for corruption detection
//! - Log compaction into a snapshot (temp file + rename)
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   .kyrodoc.lock   exclusive lock held while open
//!   kyrodoc.log     KDOC header + codec-framed LogEntry records
//! ```
//!
//! [`DocumentStore`]: crate::storage::DocumentStore

mod codec;
mod file_lock;
mod log;
mod stores;

pub use file_lock::FileLock;
pub use log::{LogEntry, LogRecord, OperationLog, Replay};
pub use stores::{CompactionResult, PersistentDocumentStore};

use std::path::Path;

use crate::error::{DbResult, ValidationError};

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentConfig {
    /// Log size that triggers compaction (bytes).
    pub max_log_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_log_size: 64 * 1024 * 1024,
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// Smallest accepted `max_log_size`; smaller values compact on nearly every write.
    pub const MIN_LOG_SIZE: u64 = 4 * 1024;

    /// Checks the configuration, returning it unchanged if valid.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_log_size < Self::MIN_LOG_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_log_size must be at least {} bytes (got {})",
                    Self::MIN_LOG_SIZE,
                    self.max_log_size
                ),
            });
        }
        Ok(self)
    }
}

/// Open or create a persistent kyrodoc database in `path`.
///
/// # Errors
/// - `Validation` if the configuration is invalid
/// - `Storage` if the directory cannot be created, another process holds the
///   lock, or the log cannot be read
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use kyrodoc::storage::persistent::open_database;
/// use kyrodoc::{Database, EngineConfig, ReconciliationEngine, RejectingDecider};
///
/// let store = open_database("./music.kdoc", None)?;
/// let engine = ReconciliationEngine::new(Arc::new(RejectingDecider), EngineConfig::default())?;
/// let db = Database::new(Arc::new(store), engine);
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> DbResult<PersistentDocumentStore> {
    let config = config.unwrap_or_default().validate()?;
    Ok(PersistentDocumentStore::open(path.as_ref(), config)?)
}
