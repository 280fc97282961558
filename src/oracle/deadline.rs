//! Latency bound for slow deciders.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::warn;

use crate::decision::{Decision, QueryDecision};
use crate::document::Document;
use crate::schema::Schema;

use super::{Decider, OracleError};

/// Runs another decider on a helper thread and gives up after a deadline.
///
/// A request that misses the deadline is abandoned, not cancelled: the inner
/// decider keeps running and its late answer is dropped.
pub struct DeadlineDecider<D: Decider + 'static> {
    inner: Arc<D>,
    deadline: Duration,
}

impl<D: Decider + 'static> DeadlineDecider<D> {
    /// Wraps `inner` with the given deadline.
    pub fn new(inner: D, deadline: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            deadline,
        }
    }

    /// The configured deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    fn run<T, F>(&self, what: &'static str, call: F) -> Result<T, OracleError>
    where
        T: Send + 'static,
        F: FnOnce(&D) -> Result<T, OracleError> + Send + 'static,
    {
        let (tx, rx) = bounded::<Result<T, OracleError>>(1);
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name(format!("kyrodoc-oracle-{what}"))
            .spawn(move || {
                let _ = tx.send(call(&inner));
            })
            .map_err(|e| OracleError::Unavailable {
                message: format!("failed to spawn oracle thread: {e}"),
            })?;

        rx.recv_timeout(self.deadline).map_err(|err| match err {
            RecvTimeoutError::Timeout => {
                let duration_ms = u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX);
                warn!(request = what, duration_ms, "oracle deadline exceeded");
                OracleError::Timeout { duration_ms }
            }
            RecvTimeoutError::Disconnected => OracleError::Unavailable {
                message: "oracle thread exited without answering".to_string(),
            },
        })?
    }
}

impl<D: Decider + 'static> Decider for DeadlineDecider<D> {
    fn decide_for_new_documents(
        &self,
        existing: &Schema,
        new_documents: &[Document],
    ) -> Result<Decision, OracleError> {
        let existing = existing.clone();
        let new_documents = new_documents.to_vec();
        self.run("write", move |d| {
            d.decide_for_new_documents(&existing, &new_documents)
        })
    }

    fn decide_for_query(
        &self,
        collection: &Schema,
        shape: &Schema,
    ) -> Result<QueryDecision, OracleError> {
        let collection = collection.clone();
        let shape = shape.clone();
        self.run("query", move |d| d.decide_for_query(&collection, &shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedDecider;

    struct SlowDecider(Duration);

    impl Decider for SlowDecider {
        fn decide_for_new_documents(&self, _: &Schema, _: &[Document]) -> Result<Decision, OracleError> {
            thread::sleep(self.0);
            Ok(Decision::IsSubset)
        }

        fn decide_for_query(&self, _: &Schema, _: &Schema) -> Result<QueryDecision, OracleError> {
            thread::sleep(self.0);
            Ok(QueryDecision::Map {
                program: ".".to_string(),
            })
        }
    }

    #[test]
    fn test_fast_decider_passes_through() {
        let d = DeadlineDecider::new(
            ScriptedDecider::new().on_write(Decision::IsSuperset),
            Duration::from_secs(5),
        );
        let out = d
            .decide_for_new_documents(&Schema::empty_object(), &[])
            .unwrap();
        assert_eq!(out, Decision::IsSuperset);
    }

    #[test]
    fn test_slow_decider_times_out() {
        let d = DeadlineDecider::new(SlowDecider(Duration::from_millis(500)), Duration::from_millis(20));
        let err = d
            .decide_for_query(&Schema::empty_object(), &Schema::empty_object())
            .unwrap_err();
        assert_eq!(err, OracleError::Timeout { duration_ms: 20 });
        assert!(err.is_transient());
    }
}
