//! The database facade.
//!
//! [`Database`] glues a [`DocumentStore`], the [`ReconciliationEngine`] and the
//! [`QueryEngine`] into the surface a transport layer exposes: collection
//! lifecycle, schema inspection, shaped queries and reconciled writes.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::decision::{AllowedOperations, QueryDecision};
use crate::document::{validate_collection_name, Collection, Document};
use crate::error::{DbError, DbResult, ValidationError};
use crate::oracle::Decider;
use crate::query::{Filter, QueryEngine, QueryParams};
use crate::reconcile::{ReconciliationEngine, WriteOutcome};
use crate::schema::SchemaFormat;
use crate::storage::{DocumentStore, InMemoryDocumentStore};

/// A shaped query.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Partial document naming the wanted fields.
    pub shape: Option<Map<String, Value>>,
    /// Equality filters, sort and limit.
    pub params: QueryParams,
    /// Predicate filter applied after the limit.
    pub filter: Option<Filter>,
    /// Decision kinds the caller accepts.
    pub allowed: Option<AllowedOperations>,
}

impl QueryRequest {
    /// An unshaped, unfiltered query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requested shape.
    #[must_use]
    pub fn with_shape(mut self, shape: Map<String, Value>) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Sets equality filters, sort and limit.
    #[must_use]
    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    /// Sets the predicate filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Restricts the decisions the query may apply.
    #[must_use]
    pub fn with_allowed(mut self, allowed: AllowedOperations) -> Self {
        self.allowed = Some(allowed);
        self
    }
}

/// Documents returned by a query, plus the decision applied to the shape.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Matching documents.
    pub documents: Vec<Document>,
    /// Decision applied to the shape, if any.
    pub decision: Option<QueryDecision>,
}

/// A schema-flexible document database.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn DocumentStore>,
    engine: ReconciliationEngine,
    query: QueryEngine,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Create a database over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, engine: ReconciliationEngine) -> Self {
        Self {
            store,
            engine,
            query: QueryEngine::new(),
        }
    }

    /// Create an in-memory database with the built-in collaborators.
    ///
    /// # Errors
    /// Returns `Validation` if `config` is invalid.
    pub fn in_memory(decider: Arc<dyn Decider>, config: EngineConfig) -> DbResult<Self> {
        let engine = ReconciliationEngine::new(decider, config)?;
        Ok(Self::new(Arc::new(InMemoryDocumentStore::new()), engine))
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// The reconciliation engine.
    #[must_use]
    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    // ------------------------------------------------------------------
    // Collections

    /// Create an empty collection.
    ///
    /// # Errors
    /// `Validation` for a bad name, `Storage` if the collection exists.
    pub fn create_collection(&self, name: &str) -> DbResult<Collection> {
        validate_collection_name(name)?;
        self.store.create_collection(name)?;
        info!(collection = name, "collection created");
        Ok(Collection {
            name: name.to_string(),
            documents: Vec::new(),
        })
    }

    /// Every collection with its documents, in creation order.
    ///
    /// # Errors
    /// `Storage` if the store cannot be read.
    pub fn list_collections(&self) -> DbResult<Vec<Collection>> {
        self.store
            .collection_names()?
            .into_iter()
            .map(|name| self.get_collection(&name))
            .collect()
    }

    /// A collection with its documents.
    ///
    /// # Errors
    /// `NotFound` if the collection does not exist.
    pub fn get_collection(&self, name: &str) -> DbResult<Collection> {
        let documents = self.store.get_all(name)?;
        Ok(Collection {
            name: name.to_string(),
            documents,
        })
    }

    /// Delete a collection and its documents.
    ///
    /// # Errors
    /// `NotFound` if the collection does not exist.
    pub fn delete_collection(&self, name: &str) -> DbResult<()> {
        self.ensure_collection(name)?;
        self.store.delete_collection(name)?;
        info!(collection = name, "collection deleted");
        Ok(())
    }

    /// The schema inferred from a collection's current documents, rendered in
    /// `format`.
    ///
    /// # Errors
    /// `NotFound` if the collection does not exist, `Schema` if inference fails.
    pub fn collection_schema(&self, name: &str, format: SchemaFormat) -> DbResult<Value> {
        let documents = self.store.get_all(name)?;
        let schema = self.engine.infer_schema(name, &documents)?;
        Ok(schema.render(name, format))
    }

    // ------------------------------------------------------------------
    // Reads

    /// Runs a shaped query.
    ///
    /// The shape is reconciled first; equality filters, sort, limit and the
    /// predicate filter then run over the reconciled documents, in that order.
    ///
    /// # Errors
    /// `NotFound` if the collection does not exist, plus any read-path
    /// reconciliation error (`OperationNotAllowed`, `Oracle`, `Transform`).
    pub fn query_documents(&self, name: &str, request: &QueryRequest) -> DbResult<QueryResult> {
        let documents = self.store.get_all(name)?;
        let outcome = self.engine.reconcile_read(
            name,
            documents,
            request.shape.as_ref(),
            request.allowed.as_ref(),
        )?;
        let documents = self
            .query
            .run(outcome.documents, &request.params, request.filter.as_ref());
        Ok(QueryResult {
            documents,
            decision: outcome.decision,
        })
    }

    /// A single document.
    ///
    /// # Errors
    /// `NotFound` if the collection or the document does not exist.
    pub fn get_document(&self, name: &str, id: &str) -> DbResult<Document> {
        self.store
            .get(name, id)?
            .ok_or_else(|| DbError::document_not_found(name, id))
    }

    // ------------------------------------------------------------------
    // Writes

    /// Adds one document. See [`Self::add_documents`].
    pub fn add_document(
        &self,
        name: &str,
        document: Value,
        allowed: Option<&AllowedOperations>,
    ) -> DbResult<WriteOutcome> {
        self.add_documents(name, vec![document], allowed)
    }

    /// Adds a batch of documents, reconciling the batch against the
    /// collection's current schema.
    ///
    /// Documents without `_id` get a fresh one. A rejected batch writes
    /// nothing and is reported through the outcome's decision.
    ///
    /// # Errors
    /// - `NotFound` if the collection does not exist
    /// - `Validation` for non-object documents, bad or duplicate ids, ids that
    ///   already exist, or an oversized batch
    /// - any reconciliation error; nothing is written in that case
    pub fn add_documents(
        &self,
        name: &str,
        documents: Vec<Value>,
        allowed: Option<&AllowedOperations>,
    ) -> DbResult<WriteOutcome> {
        let max = self.engine.config().max_batch_size;
        if documents.len() > max {
            return Err(ValidationError::BatchTooLarge {
                actual: documents.len(),
                max,
            }
            .into());
        }

        let existing = self.store.get_all(name)?;
        let incoming = documents
            .into_iter()
            .enumerate()
            .map(|(i, v)| Document::from_input(v, i))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen: HashSet<&str> = existing.iter().map(Document::id).collect();
        for doc in &incoming {
            if !seen.insert(doc.id()) {
                return Err(ValidationError::DuplicateDocumentId {
                    id: doc.id().to_string(),
                }
                .into());
            }
        }

        self.write(name, &existing, incoming, allowed)
    }

    /// Merges `data` onto a stored document and reconciles the result.
    ///
    /// # Errors
    /// `NotFound` if the collection or document does not exist, plus any
    /// reconciliation error.
    pub fn update_document(
        &self,
        name: &str,
        id: &str,
        data: Map<String, Value>,
        allowed: Option<&AllowedOperations>,
    ) -> DbResult<WriteOutcome> {
        let current = self.get_document(name, id)?;
        let mut fields = current.fields().clone();
        for (k, v) in data {
            fields.insert(k, v);
        }
        let updated = Document::new(id, fields);
        let others = self.others(name, id)?;
        self.write(name, &others, vec![updated], allowed)
    }

    /// Replaces a document's fields with `data`, keeping its id, and
    /// reconciles the result.
    ///
    /// # Errors
    /// `NotFound` if the collection does not exist, plus any reconciliation
    /// error.
    pub fn replace_document(
        &self,
        name: &str,
        id: &str,
        data: Map<String, Value>,
        allowed: Option<&AllowedOperations>,
    ) -> DbResult<WriteOutcome> {
        let others = self.others(name, id)?;
        self.write(name, &others, vec![Document::new(id, data)], allowed)
    }

    /// Deletes one document. Returns false if it did not exist.
    ///
    /// # Errors
    /// `NotFound` if the collection does not exist.
    pub fn delete_document(&self, name: &str, id: &str) -> DbResult<bool> {
        Ok(self.delete_documents(name, &[id.to_string()])? > 0)
    }

    /// Deletes documents by id, ignoring unknown ids. Returns how many were
    /// removed.
    ///
    /// # Errors
    /// `NotFound` if the collection does not exist, `Storage` if the removal
    /// cannot be persisted.
    pub fn delete_documents(&self, name: &str, ids: &[String]) -> DbResult<usize> {
        let removed = self.store.remove(name, ids)?;
        debug!(collection = name, requested = ids.len(), removed, "documents deleted");
        Ok(removed)
    }

    fn ensure_collection(&self, name: &str) -> DbResult<()> {
        if self.store.collection_exists(name)? {
            Ok(())
        } else {
            Err(DbError::collection_not_found(name))
        }
    }

    /// The collection's documents other than `id`.
    fn others(&self, name: &str, id: &str) -> DbResult<Vec<Document>> {
        let mut documents = self.store.get_all(name)?;
        documents.retain(|doc| doc.id() != id);
        Ok(documents)
    }

    fn write(
        &self,
        name: &str,
        existing: &[Document],
        incoming: Vec<Document>,
        allowed: Option<&AllowedOperations>,
    ) -> DbResult<WriteOutcome> {
        let outcome = self.engine.reconcile_write(name, existing, incoming, allowed)?;
        if !outcome.is_rejected() {
            let batch = outcome.persist_batch();
            if !batch.is_empty() {
                self.store.set(name, batch)?;
            }
        }
        Ok(outcome)
    }
}
