//! Structured requests to an external oracle service.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::decision::{Decision, OperationKind, QueryDecision};
use crate::document::Document;
use crate::schema::Schema;

use super::{Decider, OracleError};

/// Which question an [`OracleRequest`] asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// New documents do not match the collection schema.
    NewDocuments,
    /// A query shape does not match the collection schema.
    Query,
}

/// Everything an oracle needs to propose a decision.
///
/// Schemas are rendered as JSON Schema. Documents have their reserved
/// `_id`/`_original` fields removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub kind: RequestKind,
    /// Schema of the collection as stored.
    pub input_schema: Value,
    /// Schema of the query shape (query requests only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_schema: Option<Value>,
    /// Incoming documents (new-document requests only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Value>,
    /// Decision kinds the reply may use.
    pub allowed_decisions: Vec<OperationKind>,
}

/// Transport to an oracle service.
///
/// Implementations own prompt construction, model choice and networking. The
/// reply is either `{"decision": {...}}` or a bare decision object.
pub trait OracleClient: Send + Sync {
    /// Sends `request` and returns the raw JSON reply.
    fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError>;
}

/// Decider backed by an [`OracleClient`], validating every reply.
pub struct OracleDecider<C: OracleClient> {
    client: C,
    schema_name: String,
}

impl<C: OracleClient> OracleDecider<C> {
    /// Wraps `client`.
    pub fn new(client: C) -> Self {
        Self {
            client,
            schema_name: "Collection".to_string(),
        }
    }

    /// Sets the definition name used when rendering schemas.
    #[must_use]
    pub fn with_schema_name(mut self, name: impl Into<String>) -> Self {
        self.schema_name = name.into();
        self
    }

    /// Builds the request for a write-path decision.
    #[must_use]
    pub fn new_documents_request(&self, existing: &Schema, new_documents: &[Document]) -> OracleRequest {
        OracleRequest {
            kind: RequestKind::NewDocuments,
            input_schema: existing.to_json_schema(&self.schema_name),
            target_schema: None,
            documents: new_documents
                .iter()
                .map(|d| Value::Object(d.body()))
                .collect(),
            allowed_decisions: vec![
                OperationKind::Reject,
                OperationKind::IsSubset,
                OperationKind::IsSuperset,
                OperationKind::Map,
                OperationKind::Migrate,
            ],
        }
    }

    /// Builds the request for a query-path decision.
    #[must_use]
    pub fn query_request(&self, collection: &Schema, shape: &Schema) -> OracleRequest {
        OracleRequest {
            kind: RequestKind::Query,
            input_schema: collection.to_json_schema(&self.schema_name),
            target_schema: Some(shape.to_json_schema(&self.schema_name)),
            documents: Vec::new(),
            allowed_decisions: vec![OperationKind::Reject, OperationKind::Map],
        }
    }
}

/// Parses and validates a raw oracle reply into a decision.
pub fn parse_decision(reply: Value) -> Result<Decision, OracleError> {
    let body = match reply {
        Value::Object(mut map) if map.contains_key("decision") => {
            map.remove("decision").unwrap_or(Value::Null)
        }
        other => other,
    };
    let decision: Decision =
        serde_json::from_value(body).map_err(|e| OracleError::InvalidResponse {
            reason: e.to_string(),
        })?;
    decision
        .validate()
        .map_err(|e| OracleError::InvalidResponse {
            reason: e.to_string(),
        })?;
    Ok(decision)
}

impl<C: OracleClient> Decider for OracleDecider<C> {
    fn decide_for_new_documents(
        &self,
        existing: &Schema,
        new_documents: &[Document],
    ) -> Result<Decision, OracleError> {
        let request = self.new_documents_request(existing, new_documents);
        let decision = parse_decision(self.client.complete(&request)?)?;
        debug!(kind = %decision.kind(), "oracle decided for new documents");
        Ok(decision)
    }

    fn decide_for_query(
        &self,
        collection: &Schema,
        shape: &Schema,
    ) -> Result<QueryDecision, OracleError> {
        let request = self.query_request(collection, shape);
        let decision = parse_decision(self.client.complete(&request)?)?;
        debug!(kind = %decision.kind(), "oracle decided for query");
        QueryDecision::try_from(decision).map_err(|kind| OracleError::UnexpectedDecision {
            kind,
            context: "a query",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaInferer, StructuralInferer};
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedClient {
        reply: Value,
        seen: Mutex<Vec<OracleRequest>>,
    }

    impl CannedClient {
        fn new(reply: Value) -> Self {
            Self {
                reply,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl OracleClient for CannedClient {
        fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }
    }

    fn schema() -> Schema {
        StructuralInferer::new()
            .infer("albums", &[json!({"title": "a"})])
            .unwrap()
    }

    #[test]
    fn test_wrapped_reply_is_parsed() {
        let client = CannedClient::new(json!({
            "decision": {"type": "map", "jqMappingCommandPerDocument": "{title: .name}"}
        }));
        let decider = OracleDecider::new(client).with_schema_name("albums");
        let doc = Document::from_input(json!({"name": "x"}), 0).unwrap();
        let decision = decider
            .decide_for_new_documents(&schema(), std::slice::from_ref(&doc))
            .unwrap();
        assert_eq!(decision, Decision::map("{title: .name}"));

        let seen = decider.client.seen.lock().unwrap();
        assert_eq!(seen[0].kind, RequestKind::NewDocuments);
        assert_eq!(seen[0].documents, vec![json!({"name": "x"})]);
        assert_eq!(seen[0].input_schema["$ref"], "#/definitions/Albums");
    }

    #[test]
    fn test_bare_reply_is_parsed() {
        let decision = parse_decision(json!({"type": "reject", "message": "nope"})).unwrap();
        assert!(decision.is_reject());
    }

    #[test]
    fn test_garbage_reply_is_invalid() {
        let err = parse_decision(json!({"decision": {"type": "explode"}})).unwrap_err();
        assert!(matches!(err, OracleError::InvalidResponse { .. }));
        let err = parse_decision(json!({"type": "map", "jqMappingCommandPerDocument": ""})).unwrap_err();
        assert!(matches!(err, OracleError::InvalidResponse { .. }));
    }

    #[test]
    fn test_query_reply_restricted_to_map_or_reject() {
        let decider = OracleDecider::new(CannedClient::new(json!({"type": "isSubset"})));
        let err = decider.decide_for_query(&schema(), &schema()).unwrap_err();
        assert_eq!(
            err,
            OracleError::UnexpectedDecision {
                kind: OperationKind::IsSubset,
                context: "a query",
            }
        );
    }
}
