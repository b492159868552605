// ============================================================================
// docmodel Library
// ============================================================================
//
// Model layer over a document database: identifiers, lifecycle hooks,
// collection resolution and a session transaction runner.
//
// ============================================================================

extern crate self as docmodel;

pub mod core;
pub mod model;
pub mod collection;
pub mod connection;
pub mod storage;
pub mod transaction;
pub mod prelude;

// Re-export main types for convenience
pub use core::{Context, ContextError, ExecutionContext, ModelError, Result};
pub use model::{
    DateFields, DefaultModel, Hooks, IdField, Identifiable, Model, now_millis, prepare_id,
};
pub use collection::Collection;
pub use connection::{Database, ModelConfig};
pub use storage::{Backend, BackendSession, MemoryBackend, Namespace, StorageError};
pub use transaction::{Session, SessionContext};

pub use bson;
pub use docmodel_derive::Model;
