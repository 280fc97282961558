//! End-to-end query tests: shape reconciliation followed by the query pipeline.

use std::sync::Arc;

use kyrodoc::schema::SchemaFormat;
use kyrodoc::{
    AllowedOperations, Database, EngineConfig, Filter, OperationKind, QueryDecision, QueryParams,
    QueryRequest, ScriptedDecider, SortOrder,
};
use serde_json::{json, Map, Value};

fn shape(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn seeded(decider: ScriptedDecider) -> (Database, Arc<ScriptedDecider>) {
    let decider = Arc::new(decider);
    let db = Database::in_memory(decider.clone(), EngineConfig::default().with_probe_seed(9)).unwrap();
    db.create_collection("albums").unwrap();
    db.add_documents(
        "albums",
        vec![
            json!({"_id": "c", "title": "Let It Be", "year": 1970}),
            json!({"_id": "a", "title": "Abbey Road", "year": 1969}),
            json!({"_id": "d", "title": "Help!", "year": 1965}),
            json!({"_id": "b", "title": "Rubber Soul", "year": 1965}),
        ],
        None,
    )
    .unwrap();
    (db, decider)
}

fn values(result: &kyrodoc::QueryResult) -> Vec<Value> {
    result.documents.iter().map(kyrodoc::Document::to_value).collect()
}

#[test]
fn test_projection_returns_only_requested_fields() {
    let (db, decider) = seeded(ScriptedDecider::new());
    let request = QueryRequest::new().with_shape(shape(json!({"title": ""})));
    let result = db.query_documents("albums", &request).unwrap();
    assert!(result.decision.is_none());
    for doc in &result.documents {
        let keys: Vec<_> = doc.fields().keys().cloned().collect();
        assert_eq!(keys, vec!["_id", "title"]);
    }
    assert_eq!(decider.query_calls(), 0);
}

#[test]
fn test_equality_sort_and_limit() {
    let (db, _) = seeded(ScriptedDecider::new());
    let params = QueryParams::from_pairs([("year", "1965"), ("sort", "desc"), ("limit", "1")]).unwrap();
    let result = db
        .query_documents("albums", &QueryRequest::new().with_params(params))
        .unwrap();
    assert_eq!(values(&result), vec![json!({"_id": "d", "title": "Help!", "year": 1965})]);
}

#[test]
fn test_predicate_filter_runs_after_limit() {
    let (db, _) = seeded(ScriptedDecider::new());
    let params = QueryParams::new().with_sort(SortOrder::Ascending).with_limit(2);
    let filter = Filter::parse(&json!({"year": {"$gte": 1970}})).unwrap();
    let result = db
        .query_documents("albums", &QueryRequest::new().with_params(params).with_filter(filter))
        .unwrap();
    // "a" and "b" survive the limit and neither is from 1970 or later.
    assert!(result.documents.is_empty());

    let filter = Filter::parse(&json!({"$or": [{"year": 1965}, {"title": {"$regex": "^abbey", "$options": "i"}}]}))
        .unwrap();
    let result = db
        .query_documents("albums", &QueryRequest::new().with_filter(filter))
        .unwrap();
    let ids: Vec<_> = result.documents.iter().map(|d| d.id().to_string()).collect();
    assert_eq!(ids, vec!["a", "d", "b"]);
}

#[test]
fn test_divergent_shape_is_mapped() {
    let (db, decider) = seeded(ScriptedDecider::new().on_query(QueryDecision::Map {
        program: "{name: (.title | no_such_builtin)}".to_string(),
    }));
    let request = QueryRequest::new().with_shape(shape(json!({"name": ""})));
    let err = db.query_documents("albums", &request).unwrap_err();
    assert!(err.is_transform());
    assert_eq!(decider.query_calls(), 1);

    decider.push_query(Ok(QueryDecision::Map {
        program: "{name: .title}".to_string(),
    }));
    let request = request.with_params(QueryParams::new().with_sort(SortOrder::Ascending));
    let result = db.query_documents("albums", &request).unwrap();
    assert!(matches!(result.decision, Some(QueryDecision::Map { .. })));
    assert_eq!(values(&result)[0], json!({"_id": "a", "name": "Abbey Road"}));
    assert_eq!(result.documents.len(), 4);
}

#[test]
fn test_rejected_shape_returns_nothing() {
    let (db, _) = seeded(ScriptedDecider::new().on_query(QueryDecision::Reject {
        message: "no such data".to_string(),
    }));
    let request = QueryRequest::new().with_shape(shape(json!({"temperature": 0})));
    let result = db.query_documents("albums", &request).unwrap();
    assert!(result.documents.is_empty());
    assert!(matches!(result.decision, Some(QueryDecision::Reject { .. })));
}

#[test]
fn test_query_allow_list() {
    let (db, _) = seeded(ScriptedDecider::new().on_query(QueryDecision::Map {
        program: "{name: .title}".to_string(),
    }));
    let request = QueryRequest::new()
        .with_shape(shape(json!({"name": ""})))
        .with_allowed(AllowedOperations::new([OperationKind::IsSubset]));
    let err = db.query_documents("albums", &request).unwrap_err();
    assert!(err.is_operation_not_allowed());
}

#[test]
fn test_schema_accepts_its_own_documents() {
    let (db, _) = seeded(ScriptedDecider::new());
    let collection = db.get_collection("albums").unwrap();
    let schema = db.engine().infer_schema("albums", &collection.documents).unwrap();
    assert!(db.engine().checker().is_accepted_by(&schema, &schema));

    let summary = db.collection_schema("albums", SchemaFormat::Summary).unwrap();
    assert!(summary.to_string().contains("title"));
}
