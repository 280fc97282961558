//! Storage backends for kyrodoc.
//!
//! [`DocumentStore`] is the abstract interface the reconciliation pipeline
//! writes through. [`InMemoryDocumentStore`] is always available; the
//! `persistent` feature adds a file-backed store with an operation log.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryDocumentStore;
pub use traits::{DocumentStore, StorageError};

#[cfg(feature = "persistent")]
pub(crate) use memory::StoreState;
