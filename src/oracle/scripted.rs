//! Decider that replays queued answers.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::decision::{Decision, QueryDecision};
use crate::document::Document;
use crate::schema::Schema;

use super::{Decider, OracleError};

#[derive(Debug, Default)]
struct Script {
    writes: VecDeque<Result<Decision, OracleError>>,
    queries: VecDeque<Result<QueryDecision, OracleError>>,
    write_calls: usize,
    query_calls: usize,
}

/// Replays pre-recorded decisions in order.
///
/// An exhausted queue answers with `OracleError::Unavailable`, so a test that
/// unexpectedly reaches the oracle fails loudly.
#[derive(Debug, Default)]
pub struct ScriptedDecider {
    script: Mutex<Script>,
}

impl ScriptedDecider {
    /// Create a decider with empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer for the next write-path request.
    #[must_use]
    pub fn on_write(self, decision: Decision) -> Self {
        self.push_write(Ok(decision));
        self
    }

    /// Queue an answer for the next query-path request.
    #[must_use]
    pub fn on_query(self, decision: QueryDecision) -> Self {
        self.push_query(Ok(decision));
        self
    }

    /// Queue a write-path answer.
    pub fn push_write(&self, answer: Result<Decision, OracleError>) {
        self.script().writes.push_back(answer);
    }

    /// Queue a query-path answer.
    pub fn push_query(&self, answer: Result<QueryDecision, OracleError>) {
        self.script().queries.push_back(answer);
    }

    /// Number of write-path requests seen.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.script().write_calls
    }

    /// Number of query-path requests seen.
    #[must_use]
    pub fn query_calls(&self) -> usize {
        self.script().query_calls
    }

    // Every update leaves the queues consistent, so a panic elsewhere while
    // the lock was held does not invalidate them.
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn exhausted() -> OracleError {
    OracleError::Unavailable {
        message: "no scripted decision left".to_string(),
    }
}

impl Decider for ScriptedDecider {
    fn decide_for_new_documents(&self, _: &Schema, _: &[Document]) -> Result<Decision, OracleError> {
        let mut script = self.script();
        script.write_calls += 1;
        script.writes.pop_front().unwrap_or_else(|| Err(exhausted()))
    }

    fn decide_for_query(&self, _: &Schema, _: &Schema) -> Result<QueryDecision, OracleError> {
        let mut script = self.script();
        script.query_calls += 1;
        script.queries.pop_front().unwrap_or_else(|| Err(exhausted()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replays_in_order_then_errors() {
        let d = ScriptedDecider::new()
            .on_write(Decision::IsSubset)
            .on_write(Decision::map("."));
        let s = Schema::empty_object();
        assert_eq!(d.decide_for_new_documents(&s, &[]).unwrap(), Decision::IsSubset);
        assert_eq!(d.decide_for_new_documents(&s, &[]).unwrap(), Decision::map("."));
        assert!(d.decide_for_new_documents(&s, &[]).is_err());
        assert_eq!(d.write_calls(), 3);
        assert_eq!(d.query_calls(), 0);
    }

    #[test]
    fn test_keeps_working_after_a_panic_while_locked() {
        let d = std::sync::Arc::new(ScriptedDecider::new());
        let held = std::sync::Arc::clone(&d);
        let joined = std::thread::spawn(move || {
            let _guard = held.script.lock();
            panic!("panic while holding the script lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(d.script.is_poisoned());

        d.push_query(Ok(QueryDecision::Reject {
            message: "no".to_string(),
        }));
        let s = Schema::empty_object();
        assert!(matches!(
            d.decide_for_query(&s, &s).unwrap(),
            QueryDecision::Reject { .. }
        ));
        assert_eq!(d.query_calls(), 1);
    }
}
