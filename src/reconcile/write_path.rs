//! Write-path reconciliation.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::decision::{AllowedOperations, Decision, OperationKind};
use crate::document::Document;
use crate::error::DbResult;
use crate::schema::Schema;

use super::{guard, invalid_decision, with_provenance, ReconciliationEngine, WriteOutcome};

const SUBSET_NOT_ALLOWED: &str =
    "The input document's schema is a subset of the collection's schema, but subsets are not allowed";
const SUPERSET_NOT_ALLOWED: &str =
    "The input document's schema is a superset of the collection's schema, but supersets are not allowed";
const NOT_ALLOWED: &str = "Operation not allowed";

/// How the incoming shape relates to the collection's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Same,
    Subset,
    Superset,
    Divergent,
}

impl Relation {
    const fn classify(is_subset: bool, is_superset: bool) -> Self {
        match (is_subset, is_superset) {
            (true, true) => Self::Same,
            (true, false) => Self::Subset,
            (false, true) => Self::Superset,
            (false, false) => Self::Divergent,
        }
    }
}

impl ReconciliationEngine {
    /// Reconciles `incoming` against the `existing` documents of `collection`.
    ///
    /// Nothing is written here: the returned outcome lists the documents to
    /// persist. `incoming` documents must already carry their ids.
    ///
    /// # Errors
    /// - `OperationNotAllowed` if `allowed` excludes the resolved decision
    /// - `Oracle` if the decider fails or returns an invalid decision
    /// - `Transform` if a `map` or `migrate` program fails on any document
    /// - `Schema` if inference fails
    pub fn reconcile_write(
        &self,
        collection: &str,
        existing: &[Document],
        incoming: Vec<Document>,
        allowed: Option<&AllowedOperations>,
    ) -> DbResult<WriteOutcome> {
        if incoming.is_empty() || existing.is_empty() {
            debug!(collection, incoming = incoming.len(), "no existing schema to reconcile against");
            return Ok(WriteOutcome::pass_through(incoming, None));
        }

        let existing_schema = self.infer_schema(collection, existing)?;
        let new_schema = self.infer_schema(collection, &incoming)?;
        let relation = self.relate(&existing_schema, &new_schema);
        debug!(collection, ?relation, "classified incoming documents");

        match relation {
            Relation::Same => Ok(WriteOutcome::pass_through(incoming, None)),
            Relation::Subset => {
                guard(allowed, OperationKind::IsSubset, || SUBSET_NOT_ALLOWED.to_string())?;
                info!(collection, decision = %OperationKind::IsSubset, "writing documents as-is");
                Ok(WriteOutcome::pass_through(incoming, Some(Decision::IsSubset)))
            }
            Relation::Superset => {
                guard(allowed, OperationKind::IsSuperset, || SUPERSET_NOT_ALLOWED.to_string())?;
                info!(collection, decision = %OperationKind::IsSuperset, "writing documents as-is");
                Ok(WriteOutcome::pass_through(incoming, Some(Decision::IsSuperset)))
            }
            Relation::Divergent => {
                let decision = self
                    .decider
                    .decide_for_new_documents(&existing_schema, &incoming)?;
                decision.validate().map_err(|e| invalid_decision(&e))?;
                guard(allowed, decision.kind(), || NOT_ALLOWED.to_string())?;
                self.apply(collection, decision, existing, incoming, &existing_schema, &new_schema)
            }
        }
    }

    /// `is_subset` holds when the collection's documents already satisfy the
    /// incoming schema; `is_superset` when incoming documents satisfy the
    /// collection's schema.
    fn relate(&self, existing: &Schema, new: &Schema) -> Relation {
        let is_subset = self.checker.is_accepted_by(existing, new);
        let is_superset = self.checker.is_accepted_by(new, existing);
        Relation::classify(is_subset, is_superset)
    }

    fn apply(
        &self,
        collection: &str,
        decision: Decision,
        existing: &[Document],
        incoming: Vec<Document>,
        existing_schema: &Schema,
        new_schema: &Schema,
    ) -> DbResult<WriteOutcome> {
        match decision {
            Decision::Reject { ref message } => {
                warn!(collection, %message, rejected = incoming.len(), "write rejected");
                Ok(WriteOutcome::rejected(decision))
            }
            Decision::IsSubset | Decision::IsSuperset => {
                info!(collection, decision = %decision.kind(), "writing documents as-is");
                Ok(WriteOutcome::pass_through(incoming, Some(decision)))
            }
            Decision::Map { ref program } => {
                let documents = self.map_documents(program, &incoming)?;
                info!(collection, mapped = documents.len(), "applied map decision");
                Ok(WriteOutcome::pass_through(documents, Some(decision)))
            }
            Decision::Migrate { ref program, .. } => {
                if self.checker.is_accepted_by(new_schema, existing_schema) {
                    info!(collection, "migrate resolved to superset; existing documents untouched");
                    return Ok(WriteOutcome::pass_through(incoming, Some(Decision::IsSuperset)));
                }
                let migrated = self.migrate_documents(program, existing)?;
                info!(collection, migrated = migrated.len(), "applied migrate decision");
                Ok(WriteOutcome {
                    documents: incoming,
                    migrated,
                    decision: Some(decision),
                })
            }
        }
    }

    fn map_documents(&self, program: &str, incoming: &[Document]) -> DbResult<Vec<Document>> {
        let inputs: Vec<Value> = incoming.iter().map(Document::to_value).collect();
        let outputs = self.transforms.run_all(program, &inputs)?;
        Ok(incoming
            .iter()
            .zip(inputs)
            .zip(outputs)
            .map(|((doc, original), output)| with_provenance(doc.id(), original, output))
            .collect())
    }

    fn migrate_documents(&self, program: &str, existing: &[Document]) -> DbResult<Vec<Document>> {
        let inputs: Vec<Value> = existing.iter().map(Document::to_value).collect();
        let outputs = self.transforms.run_all(program, &inputs)?;
        Ok(existing
            .iter()
            .zip(inputs)
            .zip(outputs)
            .map(|((doc, original), mut output)| {
                // A null only counts as a value when the source had the field.
                output.retain(|field, value| !value.is_null() || doc.get(field).is_some());
                with_provenance(doc.id(), original, output)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::{json, Map};

    use super::*;
    use crate::config::EngineConfig;
    use crate::oracle::{OracleError, ScriptedDecider};
    use crate::schema::{InstanceValidator, RandomInstanceGenerator, SchemaError, StructuralInferer, SubsetChecker};
    use crate::transform::JqExecutor;

    fn docs(values: &[Value]) -> Vec<Document> {
        values
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, v)| Document::from_input(v, i).unwrap())
            .collect()
    }

    fn engine(decider: ScriptedDecider) -> (ReconciliationEngine, Arc<ScriptedDecider>) {
        let decider = Arc::new(decider);
        let config = EngineConfig::default().with_probe_seed(7);
        let engine = ReconciliationEngine::new(decider.clone(), config).unwrap();
        (engine, decider)
    }

    #[test]
    fn test_empty_collection_has_no_decision() {
        let (engine, decider) = engine(ScriptedDecider::new());
        let incoming = docs(&[json!({"title": "A"})]);
        let out = engine.reconcile_write("albums", &[], incoming.clone(), None).unwrap();
        assert_eq!(out.documents, incoming);
        assert!(out.decision.is_none());
        assert_eq!(decider.write_calls(), 0);
    }

    #[test]
    fn test_same_shape_has_no_decision() {
        let (engine, _) = engine(ScriptedDecider::new());
        let existing = docs(&[json!({"title": "A", "year": 1969})]);
        let incoming = docs(&[json!({"title": "B", "year": 1970})]);
        let out = engine.reconcile_write("albums", &existing, incoming, None).unwrap();
        assert!(out.decision.is_none());
        assert_eq!(out.documents.len(), 1);
    }

    #[test]
    fn test_superset_and_subset_resolve_locally() {
        let (engine, decider) = engine(ScriptedDecider::new());
        let existing = docs(&[json!({"title": "A"})]);
        let incoming = docs(&[json!({"title": "B", "year": 1970})]);
        let out = engine.reconcile_write("albums", &existing, incoming, None).unwrap();
        assert_eq!(out.decision, Some(Decision::IsSuperset));
        assert_eq!(out.documents[0].get("year"), Some(&json!(1970)));

        let existing = docs(&[json!({"title": "A", "artist": "X", "year": 1969})]);
        let incoming = docs(&[json!({"title": "B"})]);
        let out = engine.reconcile_write("albums", &existing, incoming, None).unwrap();
        assert_eq!(out.decision, Some(Decision::IsSubset));
        assert_eq!(decider.write_calls(), 0);
    }

    #[test]
    fn test_allow_list_blocks_local_decision() {
        let (engine, _) = engine(ScriptedDecider::new());
        let existing = docs(&[json!({"title": "A"})]);
        let incoming = docs(&[json!({"title": "B", "year": 1970})]);
        let allowed = AllowedOperations::new([OperationKind::IsSubset]);
        let err = engine
            .reconcile_write("albums", &existing, incoming, Some(&allowed))
            .unwrap_err();
        assert!(err.is_operation_not_allowed());
        assert!(err.to_string().contains("supersets are not allowed"));
    }

    #[test]
    fn test_reject_returns_no_documents() {
        let (engine, decider) = engine(ScriptedDecider::new().on_write(Decision::reject("nope")));
        let existing = docs(&[json!({"title": "A"})]);
        let incoming = docs(&[json!({"name": 1})]);
        let out = engine.reconcile_write("albums", &existing, incoming, None).unwrap();
        assert!(out.is_rejected());
        assert!(out.persist_batch().is_empty());
        assert_eq!(decider.write_calls(), 1);
    }

    #[test]
    fn test_map_keeps_id_and_original() {
        let (engine, _) = engine(
            ScriptedDecider::new().on_write(Decision::map("{title: .name, _id: \"hijack\"}")),
        );
        let existing = docs(&[json!({"title": "A"})]);
        let incoming = docs(&[json!({"_id": "n1", "name": "B"})]);
        let out = engine.reconcile_write("albums", &existing, incoming, None).unwrap();
        let doc = &out.documents[0];
        assert_eq!(doc.id(), "n1");
        assert_eq!(doc.get("title"), Some(&json!("B")));
        assert_eq!(doc.original(), Some(&json!({"_id": "n1", "name": "B"})));
        assert!(doc.get("name").is_none());
    }

    #[test]
    fn test_map_failure_fails_batch_with_index() {
        let (engine, _) = engine(ScriptedDecider::new().on_write(Decision::map("{title: (.name + 1)}")));
        let existing = docs(&[json!({"title": "A"})]);
        let incoming = docs(&[json!({"name": 1}), json!({"name": "x"})]);
        let err = engine.reconcile_write("albums", &existing, incoming, None).unwrap_err();
        match err {
            crate::error::DbError::Transform(e) => assert_eq!(e.document_index(), Some(1)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_migrate_rewrites_existing_and_drops_invented_nulls() {
        let program = "{name: .name, years: .years, year: .year}";
        let (engine, _) = engine(ScriptedDecider::new().on_write(Decision::migrate(program)));
        let existing = docs(&[json!({"_id": "1", "name": "A", "years": [1970]})]);
        let incoming = docs(&[json!({"_id": "2", "name": "B", "year": 1980})]);
        let out = engine.reconcile_write("albums", &existing, incoming, None).unwrap();
        assert_eq!(out.decision.as_ref().map(Decision::kind), Some(OperationKind::Migrate));
        assert_eq!(out.migrated.len(), 1);
        let migrated = &out.migrated[0];
        assert_eq!(migrated.id(), "1");
        assert!(migrated.get("year").is_none());
        assert_eq!(migrated.get("years"), Some(&json!([1970])));
        assert_eq!(migrated.original().and_then(|o| o.get("name")), Some(&json!("A")));
        assert_eq!(out.documents[0].id(), "2");
        assert_eq!(out.persist_batch().len(), 2);
    }

    #[test]
    fn test_delegated_decision_checked_against_allow_list() {
        let (engine, _) = engine(ScriptedDecider::new().on_write(Decision::map(".")));
        let existing = docs(&[json!({"title": "A"})]);
        let incoming = docs(&[json!({"name": "B"})]);
        let allowed = AllowedOperations::new([OperationKind::Migrate]);
        let err = engine
            .reconcile_write("albums", &existing, incoming, Some(&allowed))
            .unwrap_err();
        assert!(err.is_operation_not_allowed());
        assert!(err.to_string().contains("Operation not allowed"));
    }

    #[test]
    fn test_oracle_failure_and_invalid_decision() {
        let decider = ScriptedDecider::new().on_write(Decision::map("  "));
        decider.push_write(Err(OracleError::Timeout { duration_ms: 5 }));
        let (engine, _) = engine(decider);
        let existing = docs(&[json!({"title": "A"})]);

        let err = engine
            .reconcile_write("albums", &existing, docs(&[json!({"name": "B"})]), None)
            .unwrap_err();
        assert!(err.is_oracle());
        assert!(!err.is_retryable());

        let err = engine
            .reconcile_write("albums", &existing, docs(&[json!({"name": "B"})]), None)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    /// Rejects the first `failures` instances, then accepts everything.
    struct FlakyValidator {
        failures: usize,
        calls: AtomicUsize,
    }

    impl InstanceValidator for FlakyValidator {
        fn validate(&self, _: &Schema, _: &Value) -> Result<bool, SchemaError> {
            Ok(self.calls.fetch_add(1, Ordering::SeqCst) >= self.failures)
        }
    }

    #[test]
    fn test_migrate_becomes_superset_when_recheck_accepts() {
        let validator = Arc::new(FlakyValidator {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let checker = SubsetChecker::with_probes(Arc::new(RandomInstanceGenerator::new()), validator.clone(), 1);
        let decider = Arc::new(ScriptedDecider::new().on_write(Decision::migrate("{name: .name}")));
        let engine = ReconciliationEngine::with_collaborators(
            Arc::new(StructuralInferer::new()),
            checker,
            Arc::new(JqExecutor::new()),
            decider.clone(),
            EngineConfig::default(),
        );

        let existing = docs(&[json!({"_id": "1", "name": "A", "years": [1970]})]);
        let incoming = docs(&[json!({"_id": "2", "name": "B", "year": 1980})]);
        let out = engine
            .reconcile_write("albums", &existing, incoming.clone(), None)
            .unwrap();

        assert_eq!(out.decision, Some(Decision::IsSuperset));
        assert!(out.migrated.is_empty());
        assert_eq!(out.documents, incoming);
        assert_eq!(decider.write_calls(), 1);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_deeply_nested_repeat_write_has_no_decision() {
        let nested = |title: &str| {
            let mut doc = json!({"title": title});
            for level in 0..40 {
                let mut outer = Map::new();
                outer.insert(format!("level{level}"), doc);
                doc = Value::Object(outer);
            }
            doc
        };
        let (engine, decider) = engine(ScriptedDecider::new());
        let existing = docs(&[nested("A")]);
        let incoming = docs(&[nested("B")]);
        let out = engine.reconcile_write("albums", &existing, incoming, None).unwrap();
        assert!(out.decision.is_none());
        assert_eq!(decider.write_calls(), 0);
    }

    #[test]
    fn test_relation_table() {
        assert_eq!(Relation::classify(true, true), Relation::Same);
        assert_eq!(Relation::classify(true, false), Relation::Subset);
        assert_eq!(Relation::classify(false, true), Relation::Superset);
        assert_eq!(Relation::classify(false, false), Relation::Divergent);
    }
}
