//! Batch execution of a transformation program.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use serde_json::{Map, Value};

use super::{json_type_name, TransformError, TransformExecutor};

/// Runs one program over a batch of documents.
///
/// Work is spread over up to `workers` scoped threads fed by a bounded
/// channel. Results are reassembled in input order, and the error of the
/// lowest failing index wins so a failing batch reports the same document
/// regardless of scheduling.
#[derive(Clone)]
pub struct TransformPool {
    executor: Arc<dyn TransformExecutor>,
    workers: usize,
}

impl std::fmt::Debug for TransformPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformPool")
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl TransformPool {
    /// Create a pool around `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn TransformExecutor>, workers: usize) -> Self {
        Self {
            executor,
            workers: workers.max(1),
        }
    }

    /// The underlying executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<dyn TransformExecutor> {
        &self.executor
    }

    /// Runs `program` on every document; each output must be a JSON object.
    ///
    /// Fails as a whole if the program is malformed or any document fails.
    pub fn run_all(
        &self,
        program: &str,
        documents: &[Value],
    ) -> Result<Vec<Map<String, Value>>, TransformError> {
        self.executor.check(program)?;

        let workers = self.workers.min(documents.len());
        if workers <= 1 {
            return documents
                .iter()
                .enumerate()
                .map(|(i, doc)| self.run_one(program, doc).map_err(|e| e.at_document(i)))
                .collect();
        }

        let (job_tx, job_rx) = bounded::<(usize, &Value)>(documents.len());
        let (res_tx, res_rx) = bounded::<(usize, Result<Map<String, Value>, TransformError>)>(documents.len());
        for job in documents.iter().enumerate() {
            job_tx
                .send(job)
                .map_err(|e| TransformError::Worker { reason: e.to_string() })?;
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let res_tx = res_tx.clone();
                scope.spawn(move || {
                    while let Ok((index, doc)) = job_rx.recv() {
                        let result = self.run_one(program, doc);
                        if res_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(res_tx);

        let mut slots: Vec<Option<Map<String, Value>>> = vec![None; documents.len()];
        let mut first_error: Option<(usize, TransformError)> = None;
        for (index, result) in res_rx.iter() {
            match result {
                Ok(out) => slots[index] = Some(out),
                Err(e) => {
                    if first_error.as_ref().map_or(true, |(i, _)| index < *i) {
                        first_error = Some((index, e));
                    }
                }
            }
        }
        if let Some((index, e)) = first_error {
            return Err(e.at_document(index));
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| TransformError::Worker {
                    reason: format!("no result for document {i}"),
                })
            })
            .collect()
    }

    fn run_one(&self, program: &str, doc: &Value) -> Result<Map<String, Value>, TransformError> {
        match self.executor.run(program, doc)? {
            Value::Object(map) => Ok(map),
            other => Err(TransformError::NonObjectOutput {
                kind: json_type_name(&other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::JqExecutor;
    use serde_json::json;

    fn pool(workers: usize) -> TransformPool {
        TransformPool::new(Arc::new(JqExecutor::new()), workers)
    }

    #[test]
    fn test_results_keep_input_order() {
        let docs: Vec<Value> = (0..50).map(|i| json!({"n": i})).collect();
        let out = pool(4).run_all("{m: (.n * 2)}", &docs).unwrap();
        assert_eq!(out.len(), 50);
        for (i, m) in out.iter().enumerate() {
            assert_eq!(m["m"], json!(i * 2));
        }
    }

    #[test]
    fn test_lowest_failing_index_reported() {
        let docs = vec![json!({"n": 1}), json!({"n": "x"}), json!({"n": 3}), json!({"n": "y"})];
        for workers in [1, 3] {
            let err = pool(workers).run_all("{m: (.n + 1)}", &docs).unwrap_err();
            assert_eq!(err.document_index(), Some(1));
        }
    }

    #[test]
    fn test_malformed_program_fails_batch() {
        let err = pool(2).run_all("{m: ", &[json!({})]).unwrap_err();
        assert!(matches!(err, TransformError::InvalidProgram { .. }));
    }

    #[test]
    fn test_non_object_output_rejected() {
        let err = pool(1).run_all(".n", &[json!({"n": 1})]).unwrap_err();
        assert_eq!(err.document_index(), Some(0));
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn test_empty_batch() {
        assert!(pool(4).run_all(".", &[]).unwrap().is_empty());
    }
}
