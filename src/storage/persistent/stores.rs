//! File-backed document store.
//!
//! State lives in memory (the same [`StoreState`] the in-memory backend
//! uses). Every mutation is validated against that state, appended to the
//! operation log, and only then applied, so the log never contains an entry
//! that replay could not apply.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info, warn};

use crate::document::Document;
use crate::storage::traits::{DocumentStore, StorageError};
use crate::storage::StoreState;

use super::file_lock::FileLock;
use super::log::{LogRecord, OperationLog};
use super::PersistentConfig;

const LOG_FILE_NAME: &str = "kyrodoc.log";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn apply(state: &mut StoreState, record: LogRecord) -> Result<(), StorageError> {
    match record {
        LogRecord::CreateCollection { name } => state.create(&name),
        LogRecord::DeleteCollection { name } => state.delete(&name),
        LogRecord::Put {
            collection,
            documents,
        } => {
            state.collection_mut(&collection)?.upsert(documents);
            Ok(())
        }
        LogRecord::Remove { collection, ids } => {
            state.collection_mut(&collection)?.remove(&ids);
            Ok(())
        }
    }
}

/// Outcome of a log compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Records in the compacted log.
    pub records_written: usize,
    /// Log size before compaction.
    pub log_size_before: u64,
    /// Log size after compaction.
    pub log_size_after: u64,
}

/// Durable [`DocumentStore`] backed by an operation log.
pub struct PersistentDocumentStore {
    dir: PathBuf,
    _lock: FileLock,
    log: OperationLog,
    state: RwLock<StoreState>,
    config: PersistentConfig,
}

impl std::fmt::Debug for PersistentDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentDocumentStore")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistentDocumentStore {
    /// Open or create a store in `dir`.
    ///
    /// Takes the directory lock, then replays the operation log.
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| {
            StorageError::Io(format!("failed to create database directory: {e}"))
        })?;
        let lock = FileLock::acquire(dir)
            .map_err(|e| StorageError::Io(format!("failed to acquire lock: {e}")))?;

        let (log, replay) = OperationLog::open(&dir.join(LOG_FILE_NAME), config.sync_on_write)
            .map_err(|e| StorageError::Io(format!("failed to open operation log: {e}")))?;

        let mut state = StoreState::default();
        let replayed = replay.entries.len();
        for entry in replay.entries {
            let sequence = entry.sequence;
            if let Err(e) = apply(&mut state, entry.record) {
                warn!(sequence, error = %e, "skipping inapplicable log entry");
            }
        }
        info!(
            dir = %dir.display(),
            replayed,
            discarded_bytes = replay.discarded_bytes,
            collections = state.names().len(),
            documents = state.document_count(),
            "persistent store opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            log,
            state: RwLock::new(state),
            config,
        })
    }

    /// The database directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current size of the operation log in bytes.
    pub fn log_size(&self) -> Result<u64, StorageError> {
        Ok(self.log.size_bytes()?)
    }

    /// Rewrite the log as a snapshot of the current state.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("compact"))?;
        self.compact_locked(&state)
    }

    fn compact_locked(&self, state: &StoreState) -> Result<CompactionResult, StorageError> {
        let log_size_before = self.log.size_bytes()?;
        let mut records = Vec::new();
        for name in state.names() {
            let documents = state.collection(&name)?.documents();
            records.push(LogRecord::CreateCollection { name: name.clone() });
            if !documents.is_empty() {
                records.push(LogRecord::Put {
                    collection: name,
                    documents,
                });
            }
        }
        let records_written = records.len();
        self.log.rewrite(records)?;
        let log_size_after = self.log.size_bytes()?;
        info!(
            records_written,
            log_size_before, log_size_after, "operation log compacted"
        );
        Ok(CompactionResult {
            records_written,
            log_size_before,
            log_size_after,
        })
    }

    /// Log `record`, apply it, and compact if the log has grown too large.
    fn commit(&self, state: &mut StoreState, record: LogRecord) -> Result<(), StorageError> {
        let sequence = self.log.append(record.clone())?;
        apply(state, record)?;
        debug!(sequence, "log entry committed");

        if self.log.size_bytes()? > self.config.max_log_size {
            if let Err(e) = self.compact_locked(state) {
                // The append above is already durable; compaction is retried
                // on the next write.
                warn!(error = %e, "operation log compaction failed");
            }
        }
        Ok(())
    }
}

impl DocumentStore for PersistentDocumentStore {
    fn create_collection(&self, name: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("collections.create"))?;
        if state.contains(name) {
            return Err(StorageError::CollectionExists(name.to_string()));
        }
        self.commit(
            &mut state,
            LogRecord::CreateCollection {
                name: name.to_string(),
            },
        )
    }

    fn collection_exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self
            .state
            .read()
            .map_err(|_| lock_err("collections.exists"))?
            .contains(name))
    }

    fn collection_names(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .state
            .read()
            .map_err(|_| lock_err("collections.names"))?
            .names())
    }

    fn delete_collection(&self, name: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("collections.delete"))?;
        if !state.contains(name) {
            return Err(StorageError::CollectionNotFound(name.to_string()));
        }
        self.commit(
            &mut state,
            LogRecord::DeleteCollection {
                name: name.to_string(),
            },
        )
    }

    fn get_all(&self, collection: &str) -> Result<Vec<Document>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("documents.get_all"))?;
        Ok(state.collection(collection)?.documents())
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("documents.get"))?;
        Ok(state.collection(collection)?.get(id).cloned())
    }

    fn set(&self, collection: &str, documents: Vec<Document>) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("documents.set"))?;
        state.collection(collection)?;
        if documents.is_empty() {
            return Ok(());
        }
        self.commit(
            &mut state,
            LogRecord::Put {
                collection: collection.to_string(),
                documents,
            },
        )
    }

    fn remove(&self, collection: &str, ids: &[String]) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("documents.remove"))?;
        let present: Vec<String> = {
            let docs = state.collection(collection)?;
            ids.iter()
                .filter(|id| docs.get(id).is_some())
                .cloned()
                .collect()
        };
        if present.is_empty() {
            return Ok(0);
        }
        let removed = present.len();
        self.commit(
            &mut state,
            LogRecord::Remove {
                collection: collection.to_string(),
                ids: present,
            },
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use tempfile::tempdir;

    fn doc(id: &str, n: i64) -> Document {
        let mut fields = Map::new();
        fields.insert("n".to_string(), Value::from(n));
        Document::new(id, fields)
    }

    fn config() -> PersistentConfig {
        PersistentConfig {
            sync_on_write: false,
            ..PersistentConfig::default()
        }
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = PersistentDocumentStore::open(dir.path(), config()).unwrap();
            store.create_collection("albums").unwrap();
            store.set("albums", vec![doc("a", 1), doc("b", 2)]).unwrap();
            store.set("albums", vec![doc("a", 10)]).unwrap();
            assert_eq!(store.remove("albums", &["b".to_string()]).unwrap(), 1);
        }

        let store = PersistentDocumentStore::open(dir.path(), config()).unwrap();
        let all = store.get_all("albums").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("n"), Some(&json!(10)));
    }

    #[test]
    fn test_invalid_mutations_are_not_logged() {
        let dir = tempdir().unwrap();
        let store = PersistentDocumentStore::open(dir.path(), config()).unwrap();
        store.create_collection("albums").unwrap();
        let before = store.log_size().unwrap();

        assert!(store.create_collection("albums").is_err());
        assert!(store.set("missing", vec![doc("a", 1)]).is_err());
        assert_eq!(store.remove("albums", &["nope".to_string()]).unwrap(), 0);
        assert_eq!(store.log_size().unwrap(), before);
    }

    #[test]
    fn test_compaction_shrinks_log() {
        let dir = tempdir().unwrap();
        let store = PersistentDocumentStore::open(dir.path(), config()).unwrap();
        store.create_collection("albums").unwrap();
        for i in 0..50 {
            store.set("albums", vec![doc("a", i)]).unwrap();
        }
        store.create_collection("scratch").unwrap();
        store.delete_collection("scratch").unwrap();

        let result = store.compact().unwrap();
        assert_eq!(result.records_written, 2);
        assert!(result.log_size_after < result.log_size_before);
        drop(store);

        let store = PersistentDocumentStore::open(dir.path(), config()).unwrap();
        assert_eq!(store.collection_names().unwrap(), vec!["albums"]);
        assert_eq!(store.get("albums", "a").unwrap().unwrap().get("n"), Some(&json!(49)));
    }

    #[test]
    fn test_automatic_compaction() {
        let dir = tempdir().unwrap();
        let store = PersistentDocumentStore::open(
            dir.path(),
            PersistentConfig {
                max_log_size: PersistentConfig::MIN_LOG_SIZE,
                sync_on_write: false,
            },
        )
        .unwrap();
        store.create_collection("albums").unwrap();
        for i in 0..200 {
            store.set("albums", vec![doc("a", i)]).unwrap();
        }
        assert!(store.log_size().unwrap() <= PersistentConfig::MIN_LOG_SIZE);
        assert_eq!(store.get_all("albums").unwrap().len(), 1);
    }
}
