//! Post-reconciliation query pipeline.
//!
//! Runs after the read path has produced the reconciled document set.
//! Stages always execute in this order:
//!
//! 1. equality filters on every parameter other than `limit`/`sort`
//! 2. sort by `_id` (only when a sort was requested)
//! 3. limit
//! 4. the structured predicate filter
//!
//! The predicate filter runs *after* the limit, so `limit=10` with a filter
//! can return fewer than ten documents even when more would match.

mod filter;
mod params;

use tracing::debug;

use crate::document::Document;

pub use filter::Filter;
pub use params::{js_string, QueryParams, SortOrder, LIMIT_PARAM, SORT_PARAM};

/// Applies [`QueryParams`] and an optional [`Filter`] to a document set.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryEngine;

impl QueryEngine {
    /// Create a query engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Runs the pipeline over `documents`.
    #[must_use]
    pub fn run(
        &self,
        mut documents: Vec<Document>,
        params: &QueryParams,
        filter: Option<&Filter>,
    ) -> Vec<Document> {
        let total = documents.len();

        for (field, expected) in params.filters() {
            documents.retain(|doc| {
                doc.get(field)
                    .and_then(js_string)
                    .is_some_and(|actual| actual == *expected)
            });
        }

        if let Some(order) = params.sort() {
            documents.sort_by(|a, b| match order {
                SortOrder::Ascending => a.id().cmp(b.id()),
                SortOrder::Descending => b.id().cmp(a.id()),
            });
        }

        if let Some(limit) = params.limit() {
            documents.truncate(limit);
        }

        if let Some(filter) = filter {
            documents.retain(|doc| filter.matches(&doc.to_value()));
        }

        debug!(total, returned = documents.len(), "query pipeline applied");
        documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<Document> {
        [
            json!({"_id": "b", "title": "B", "year": 1970}),
            json!({"_id": "a", "title": "A", "year": 1969}),
            json!({"_id": "c", "title": "C", "year": 1970}),
            json!({"_id": "d", "title": "D", "year": null}),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, v)| Document::from_input(v, i).unwrap())
        .collect()
    }

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(Document::id).collect()
    }

    #[test]
    fn test_no_params_is_identity() {
        let out = QueryEngine::new().run(docs(), &QueryParams::new(), None);
        assert_eq!(ids(&out), vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn test_equality_compares_strings() {
        let params = QueryParams::new().with_filter("year", "1970");
        let out = QueryEngine::new().run(docs(), &params, None);
        assert_eq!(ids(&out), vec!["b", "c"]);

        let params = QueryParams::new().with_filter("year", "null");
        assert!(QueryEngine::new().run(docs(), &params, None).is_empty());
    }

    #[test]
    fn test_sort_and_limit() {
        let params = QueryParams::new()
            .with_sort(SortOrder::Descending)
            .with_limit(2);
        let out = QueryEngine::new().run(docs(), &params, None);
        assert_eq!(ids(&out), vec!["d", "c"]);
    }

    #[test]
    fn test_filter_runs_after_limit() {
        let params = QueryParams::new()
            .with_sort(SortOrder::Ascending)
            .with_limit(2);
        let filter = Filter::parse(&json!({"year": 1970})).unwrap();
        let out = QueryEngine::new().run(docs(), &params, Some(&filter));
        // Only "a" and "b" survive the limit; "c" would match but was cut.
        assert_eq!(ids(&out), vec!["b"]);
    }

    #[test]
    fn test_filter_sees_id() {
        let filter = Filter::parse(&json!({"_id": {"$in": ["a", "d"]}})).unwrap();
        let out = QueryEngine::new().run(docs(), &QueryParams::new(), Some(&filter));
        assert_eq!(ids(&out), vec!["a", "d"]);
    }
}
