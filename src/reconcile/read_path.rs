//! Read-path reconciliation for shaped queries.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::decision::{AllowedOperations, Decision, QueryDecision};
use crate::document::{is_reserved_field, Document};
use crate::error::DbResult;

use super::{guard, invalid_decision, ReconciliationEngine, ReadOutcome};

impl ReconciliationEngine {
    /// Reconciles a query `shape` against the stored `documents`.
    ///
    /// Without a shape, or with an empty one, the documents pass through
    /// untouched. A shape accepted by the collection schema is a plain
    /// projection onto `_id` and the shape's non-reserved fields, so a shape
    /// naming only reserved fields returns bare ids. Otherwise the decider
    /// chooses between `map` and `reject`.
    ///
    /// # Errors
    /// - `OperationNotAllowed` if `allowed` excludes `map`
    /// - `Oracle` if the decider fails or returns an invalid decision
    /// - `Transform` if the mapping program fails on any document
    pub fn reconcile_read(
        &self,
        collection: &str,
        documents: Vec<Document>,
        shape: Option<&Map<String, Value>>,
        allowed: Option<&AllowedOperations>,
    ) -> DbResult<ReadOutcome> {
        let shape = match shape {
            Some(shape) if !shape.is_empty() && !documents.is_empty() => shape,
            _ => {
                return Ok(ReadOutcome {
                    documents,
                    decision: None,
                })
            }
        };
        let fields: Vec<&str> = shape
            .keys()
            .map(String::as_str)
            .filter(|k| !is_reserved_field(k))
            .collect();

        let shape_value = Value::Object(shape.clone());
        let shape_schema = self.inferer.infer(collection, &[shape_value])?;
        let collection_schema = self.infer_schema(collection, &documents)?;

        if self.checker.is_accepted_by(&collection_schema, &shape_schema) {
            debug!(collection, ?fields, "shape accepted; projecting");
            let documents = documents.iter().map(|doc| doc.project(&fields)).collect();
            return Ok(ReadOutcome {
                documents,
                decision: None,
            });
        }

        let decision = self
            .decider
            .decide_for_query(&collection_schema, &shape_schema)?;
        Decision::from(decision.clone())
            .validate()
            .map_err(|e| invalid_decision(&e))?;
        guard(allowed, decision.kind(), || "Operation not allowed".to_string())?;

        match decision {
            QueryDecision::Reject { ref message } => {
                warn!(collection, %message, "query rejected");
                Ok(ReadOutcome {
                    documents: Vec::new(),
                    decision: Some(decision),
                })
            }
            QueryDecision::Map { ref program } => {
                let inputs: Vec<Value> = documents.iter().map(Document::to_value).collect();
                let outputs = self.transforms.run_all(program, &inputs)?;
                let mapped = documents
                    .iter()
                    .zip(outputs)
                    .map(|(doc, output)| Document::new(doc.id(), output).project(&fields))
                    .collect::<Vec<_>>();
                info!(collection, mapped = mapped.len(), "applied query map decision");
                Ok(ReadOutcome {
                    documents: mapped,
                    decision: Some(decision),
                })
            }
        }
    }
}
