//! # kyrodoc - a schema-flexible document store
//!
//! kyrodoc accepts heterogeneous JSON documents into named collections without
//! a fixed schema. Every write and every shaped read is *reconciled* against
//! the schema inferred from the collection's current documents.
//!
//! ## Core Concepts
//!
//! - **Document**: an ordered JSON object with a string `_id`
//! - **Schema**: inferred from documents on demand, never stored
//! - **Decision**: how incoming data relates to a collection (`isSubset`,
//!   `isSuperset`, `map`, `migrate`, `reject`)
//! - **Decider**: an external oracle consulted when schemas diverge
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kyrodoc::{Database, EngineConfig, ScriptedDecider};
//! use serde_json::json;
//!
//! let db = Database::in_memory(Arc::new(ScriptedDecider::new()), EngineConfig::default())?;
//! db.create_collection("albums")?;
//! db.add_document("albums", json!({"title": "Abbey Road"}), None)?;
//!
//! // A broader shape is accepted as a superset without asking the oracle.
//! let outcome = db.add_document("albums", json!({"title": "Help!", "year": 1965}), None)?;
//! assert_eq!(outcome.decision, Some(kyrodoc::Decision::IsSuperset));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod decision;
pub mod document;
pub mod error;

// Reconciliation pipeline
pub mod oracle;
pub mod reconcile;
pub mod schema;
pub mod transform;

// Storage, queries and the facade
pub mod database;
pub mod query;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use config::EngineConfig;
pub use database::{Database, QueryRequest, QueryResult};
pub use decision::{AllowedOperations, Decision, OperationKind, QueryDecision};
pub use document::{Collection, Document, ID_FIELD, ORIGINAL_FIELD};
pub use error::{DbError, DbResult, MissingResource, ValidationError};
pub use oracle::{
    Decider, DeadlineDecider, OracleClient, OracleDecider, OracleError, RejectingDecider,
    ScriptedDecider,
};
pub use query::{Filter, QueryEngine, QueryParams, SortOrder};
pub use reconcile::{ReadOutcome, ReconciliationEngine, WriteOutcome};
pub use schema::{Schema, SchemaError, SchemaFormat, SchemaInferer, StructuralInferer, SubsetChecker};
pub use storage::{DocumentStore, InMemoryDocumentStore, StorageError};
pub use transform::{JqExecutor, TransformError, TransformExecutor, TransformPool};

#[cfg(feature = "persistent")]
pub use storage::persistent::{open_database, PersistentConfig, PersistentDocumentStore};
