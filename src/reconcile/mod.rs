//! Schema reconciliation.
//!
//! The [`ReconciliationEngine`] decides how incoming documents (on write) or a
//! query shape (on read) relate to the current schema of a collection, asks the
//! [`Decider`] when the schemas diverge and applies the resulting [`Decision`].
//!
//! The engine never touches a store. It is handed the collection's current
//! documents and returns an outcome describing what must be persisted, so the
//! caller can write the batch as one logical unit.

mod read_path;
mod write_path;

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::config::EngineConfig;
use crate::decision::{AllowedOperations, Decision, OperationKind, QueryDecision};
use crate::document::{Document, ID_FIELD, ORIGINAL_FIELD};
use crate::error::{DbError, DbResult, ValidationError};
use crate::oracle::{Decider, OracleError};
use crate::schema::{Schema, SchemaInferer, StructuralInferer, SubsetChecker};
use crate::transform::{JqExecutor, TransformExecutor, TransformPool};

/// Result of reconciling a write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    /// Incoming documents as they must be stored (after any `map`).
    /// Empty when the write was rejected.
    pub documents: Vec<Document>,
    /// Existing documents rewritten by a `migrate` decision.
    pub migrated: Vec<Document>,
    /// The decision that was applied, if the schemas were not identical.
    pub decision: Option<Decision>,
}

impl WriteOutcome {
    fn pass_through(documents: Vec<Document>, decision: Option<Decision>) -> Self {
        Self {
            documents,
            migrated: Vec::new(),
            decision,
        }
    }

    fn rejected(decision: Decision) -> Self {
        Self {
            documents: Vec::new(),
            migrated: Vec::new(),
            decision: Some(decision),
        }
    }

    /// Returns true if the write was rejected and nothing must be stored.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.decision.as_ref().is_some_and(Decision::is_reject)
    }

    /// Every document to upsert, migrated ones first.
    #[must_use]
    pub fn persist_batch(&self) -> Vec<Document> {
        self.migrated
            .iter()
            .chain(self.documents.iter())
            .cloned()
            .collect()
    }
}

/// Result of reconciling a shaped read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    /// Documents to hand to the query pipeline.
    pub documents: Vec<Document>,
    /// The decision that was applied, if the shape was not accepted as-is.
    pub decision: Option<QueryDecision>,
}

/// Orchestrates inference, relation checks, the decider and transforms.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inferer: Arc<dyn SchemaInferer>,
    checker: SubsetChecker,
    transforms: TransformPool,
    decider: Arc<dyn Decider>,
    config: EngineConfig,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("checker", &self.checker)
            .field("transforms", &self.transforms)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    /// Create an engine with the built-in inferer, probes and jq executor.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn new(decider: Arc<dyn Decider>, config: EngineConfig) -> Result<Self, ValidationError> {
        let config = config.validate()?;
        let checker = Self::checker_for(SubsetChecker::new(config.probe_samples), &config);
        Ok(Self::with_collaborators(
            Arc::new(StructuralInferer::new()),
            checker,
            Arc::new(JqExecutor::new()),
            decider,
            config,
        ))
    }

    /// Create an engine with explicit collaborators.
    ///
    /// `checker` is used as given; `config.probe_samples` and
    /// `config.probe_seed` only apply to checkers built by [`Self::new`].
    #[must_use]
    pub fn with_collaborators(
        inferer: Arc<dyn SchemaInferer>,
        checker: SubsetChecker,
        executor: Arc<dyn TransformExecutor>,
        decider: Arc<dyn Decider>,
        config: EngineConfig,
    ) -> Self {
        let transforms = TransformPool::new(executor, config.transform_workers);
        Self {
            inferer,
            checker,
            transforms,
            decider,
            config,
        }
    }

    fn checker_for(checker: SubsetChecker, config: &EngineConfig) -> SubsetChecker {
        match config.probe_seed {
            Some(seed) => checker.seeded(seed),
            None => checker,
        }
    }

    /// The configured decider.
    pub fn decider(&self) -> &Arc<dyn Decider> {
        &self.decider
    }

    /// The configured schema inferer.
    pub fn inferer(&self) -> &Arc<dyn SchemaInferer> {
        &self.inferer
    }

    /// The relation checker.
    pub fn checker(&self) -> &SubsetChecker {
        &self.checker
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Infers the schema of a collection's documents.
    ///
    /// # Errors
    /// Returns `Schema` if the inferer fails.
    pub fn infer_schema(&self, collection: &str, documents: &[Document]) -> DbResult<Schema> {
        let samples: Vec<Value> = documents.iter().map(Document::to_value).collect();
        Ok(self.inferer.infer(collection, &samples)?)
    }
}

/// Fails with `OperationNotAllowed` if `kind` is excluded by `allowed`.
fn guard(
    allowed: Option<&AllowedOperations>,
    kind: OperationKind,
    reason: impl FnOnce() -> String,
) -> DbResult<()> {
    match allowed {
        Some(allowed) if !allowed.permits(kind) => {
            let reason = reason();
            warn!(operation = %kind, %reason, "decision blocked by allow-list");
            Err(DbError::OperationNotAllowed {
                operation: kind,
                reason,
            })
        }
        _ => Ok(()),
    }
}

fn invalid_decision(err: &ValidationError) -> DbError {
    DbError::Oracle(OracleError::InvalidResponse {
        reason: err.to_string(),
    })
}

/// Builds `{_id, _original, ...output}`; the output cannot override the
/// reserved fields.
fn with_provenance(id: &str, original: Value, output: Map<String, Value>) -> Document {
    let mut fields = Map::with_capacity(output.len() + 1);
    fields.insert(ORIGINAL_FIELD.to_string(), original);
    for (k, v) in output {
        if k != ID_FIELD && k != ORIGINAL_FIELD {
            fields.insert(k, v);
        }
    }
    Document::new(id, fields)
}
