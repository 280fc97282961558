//! Decision oracles.
//!
//! When two schemas diverge, the reconciliation engine asks a [`Decider`] what
//! to do. Deciders are external and possibly non-deterministic (in production
//! usually a language-model service). This module holds the trait plus
//! adapters that are independent of any particular service:
//!
//! - [`ScriptedDecider`]: replays queued answers (tests, embedding).
//! - [`DeadlineDecider`]: bounds the latency of another decider.
//! - [`OracleDecider`]: builds structured requests for an [`OracleClient`] and
//!   validates its raw JSON replies.
//!
//! Prompt wording and model selection belong to the `OracleClient`
//! implementation and never to this crate.

mod deadline;
mod scripted;
mod structured;

use thiserror::Error;

use crate::decision::{Decision, OperationKind, QueryDecision};
use crate::document::Document;
use crate::schema::Schema;

pub use deadline::DeadlineDecider;
pub use scripted::ScriptedDecider;
pub use structured::{parse_decision, OracleClient, OracleDecider, OracleRequest, RequestKind};

/// Errors raised while obtaining a decision.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("Oracle unavailable: {message}")]
    Unavailable { message: String },

    #[error("Oracle timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Oracle returned an unparseable response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Oracle returned '{kind}', which is not applicable to {context}")]
    UnexpectedDecision {
        kind: OperationKind,
        context: &'static str,
    },
}

impl OracleError {
    /// Returns true if asking again may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Chooses a reconciliation strategy when schemas diverge.
pub trait Decider: Send + Sync {
    /// Decides how `new_documents` relate to a collection whose current schema
    /// is `existing`. May return any decision kind.
    fn decide_for_new_documents(
        &self,
        existing: &Schema,
        new_documents: &[Document],
    ) -> Result<Decision, OracleError>;

    /// Decides how to answer a query whose shape (`shape`) is not accepted by
    /// the collection schema (`collection`).
    fn decide_for_query(
        &self,
        collection: &Schema,
        shape: &Schema,
    ) -> Result<QueryDecision, OracleError>;
}

impl<D: Decider + ?Sized> Decider for std::sync::Arc<D> {
    fn decide_for_new_documents(
        &self,
        existing: &Schema,
        new_documents: &[Document],
    ) -> Result<Decision, OracleError> {
        (**self).decide_for_new_documents(existing, new_documents)
    }

    fn decide_for_query(
        &self,
        collection: &Schema,
        shape: &Schema,
    ) -> Result<QueryDecision, OracleError> {
        (**self).decide_for_query(collection, shape)
    }
}

/// A decider that always rejects. Useful where divergent data must never be
/// reconciled automatically.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingDecider;

impl Decider for RejectingDecider {
    fn decide_for_new_documents(&self, _: &Schema, _: &[Document]) -> Result<Decision, OracleError> {
        Ok(Decision::reject(
            "incoming documents do not match the collection schema",
        ))
    }

    fn decide_for_query(&self, _: &Schema, _: &Schema) -> Result<QueryDecision, OracleError> {
        Ok(QueryDecision::Reject {
            message: "query shape does not match the collection schema".to_string(),
        })
    }
}
