//! Per-document transformation programs.
//!
//! `map` and `migrate` decisions carry a small program that turns one document
//! into another. A [`TransformExecutor`] runs such a program; [`TransformPool`]
//! applies it to a whole batch, optionally on several worker threads, and
//! reassembles the results in input order.

mod jq;
mod pool;

use thiserror::Error;
use serde_json::Value;

pub use jq::JqExecutor;
pub use pool::TransformPool;

/// Errors raised while running a transformation program.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    #[error("Invalid program: {reason}")]
    InvalidProgram { reason: String },

    #[error("Execution failed: {reason}")]
    Execution { reason: String },

    #[error("Program produced {kind} instead of an object")]
    NonObjectOutput { kind: &'static str },

    #[error("Program produced no output")]
    NoOutput,

    #[error("Document {index}: {source}")]
    AtDocument {
        index: usize,
        #[source]
        source: Box<TransformError>,
    },

    #[error("Transform worker failed: {reason}")]
    Worker { reason: String },
}

impl TransformError {
    /// Attaches the batch position of the failing document.
    #[must_use]
    pub fn at_document(self, index: usize) -> Self {
        match self {
            already @ Self::AtDocument { .. } => already,
            other => Self::AtDocument {
                index,
                source: Box::new(other),
            },
        }
    }

    /// Batch position of the failing document, if known.
    #[must_use]
    pub const fn document_index(&self) -> Option<usize> {
        match self {
            Self::AtDocument { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Applies a mapping program to a single document.
///
/// Implementations must be pure: the input is never mutated and the same
/// program and input give the same output.
pub trait TransformExecutor: Send + Sync {
    /// Runs `program` against `document`.
    fn run(&self, program: &str, document: &Value) -> Result<Value, TransformError>;

    /// Checks that `program` is well formed without running it.
    fn check(&self, program: &str) -> Result<(), TransformError> {
        let _ = program;
        Ok(())
    }
}

/// Short name of a JSON value's type, for error messages.
pub(crate) const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
