//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! [`DocumentStore`]. It is intended for embedded usage, tests, and as the
//! index behind the persistent backend.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::storage::traits::{DocumentStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Documents of one collection in insertion order, indexed by id.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CollectionState {
    order: Vec<String>,
    by_id: HashMap<String, Document>,
}

impl CollectionState {
    pub(crate) fn documents(&self) -> Vec<Document> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Document> {
        self.by_id.get(id)
    }

    pub(crate) fn upsert(&mut self, documents: Vec<Document>) {
        for doc in documents {
            let id = doc.id().to_string();
            if self.by_id.insert(id.clone(), doc).is_none() {
                self.order.push(id);
            }
        }
    }

    pub(crate) fn remove(&mut self, ids: &[String]) -> usize {
        let mut removed = 0;
        for id in ids {
            if self.by_id.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            let by_id = &self.by_id;
            self.order.retain(|id| by_id.contains_key(id));
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

/// All collections, in creation order.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoreState {
    names: Vec<String>,
    collections: HashMap<String, CollectionState>,
}

impl StoreState {
    pub(crate) fn create(&mut self, name: &str) -> Result<(), StorageError> {
        if self.collections.contains_key(name) {
            return Err(StorageError::CollectionExists(name.to_string()));
        }
        self.collections
            .insert(name.to_string(), CollectionState::default());
        self.names.push(name.to_string());
        Ok(())
    }

    pub(crate) fn delete(&mut self, name: &str) -> Result<(), StorageError> {
        if self.collections.remove(name).is_none() {
            return Err(StorageError::CollectionNotFound(name.to_string()));
        }
        self.names.retain(|n| n != name);
        Ok(())
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.names.clone()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub(crate) fn collection(&self, name: &str) -> Result<&CollectionState, StorageError> {
        self.collections
            .get(name)
            .ok_or_else(|| StorageError::CollectionNotFound(name.to_string()))
    }

    pub(crate) fn collection_mut(
        &mut self,
        name: &str,
    ) -> Result<&mut CollectionState, StorageError> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| StorageError::CollectionNotFound(name.to_string()))
    }

    pub(crate) fn document_count(&self) -> usize {
        self.collections.values().map(CollectionState::len).sum()
    }
}

/// In-memory implementation of [`DocumentStore`].
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    state: RwLock<StoreState>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn create_collection(&self, name: &str) -> Result<(), StorageError> {
        self.state
            .write()
            .map_err(|_| lock_err("collections.create"))?
            .create(name)
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
        self.state
            .write()
            .map_err(|_| lock_err("collections.delete"))?
            .delete(name)
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
        state.collection_mut(collection)?.upsert(documents);
        Ok(())
    }

    fn remove(&self, collection: &str, ids: &[String]) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("documents.remove"))?;
        Ok(state.collection_mut(collection)?.remove(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn doc(id: &str, title: &str) -> Document {
        let mut fields = Map::new();
        fields.insert("title".to_string(), Value::String(title.to_string()));
        Document::new(id, fields)
    }

    #[test]
    fn test_collection_lifecycle() {
        let store = InMemoryDocumentStore::new();
        store.create_collection("albums").unwrap();
        store.create_collection("artists").unwrap();
        assert!(store.collection_exists("albums").unwrap());
        assert_eq!(store.collection_names().unwrap(), vec!["albums", "artists"]);

        let err = store.create_collection("albums").unwrap_err();
        assert_eq!(err, StorageError::CollectionExists("albums".to_string()));

        store.delete_collection("albums").unwrap();
        assert!(!store.collection_exists("albums").unwrap());
        assert_eq!(store.collection_names().unwrap(), vec!["artists"]);
        assert!(matches!(
            store.delete_collection("albums"),
            Err(StorageError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_upsert_keeps_position() {
        let store = InMemoryDocumentStore::new();
        store.create_collection("albums").unwrap();
        store
            .set("albums", vec![doc("a", "A"), doc("b", "B"), doc("c", "C")])
            .unwrap();
        store.set("albums", vec![doc("b", "B2")]).unwrap();

        let all = store.get_all("albums").unwrap();
        let ids: Vec<&str> = all.iter().map(Document::id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(all[1].get("title"), Some(&json!("B2")));
    }

    #[test]
    fn test_remove_ignores_unknown_ids() {
        let store = InMemoryDocumentStore::new();
        store.create_collection("albums").unwrap();
        store.set("albums", vec![doc("a", "A"), doc("b", "B")]).unwrap();

        let removed = store
            .remove("albums", &["a".to_string(), "zzz".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("albums", "a").unwrap().is_none());
        assert!(store.get("albums", "b").unwrap().is_some());
    }

    #[test]
    fn test_missing_collection() {
        let store = InMemoryDocumentStore::new();
        assert!(matches!(
            store.get_all("nope"),
            Err(StorageError::CollectionNotFound(_))
        ));
        assert!(matches!(
            store.set("nope", vec![doc("a", "A")]),
            Err(StorageError::CollectionNotFound(_))
        ));
    }
}
