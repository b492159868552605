//! Recommended imports grouped by abstraction level.
//!
//! `dx` covers application code: model derives, field groups, the database
//! handle and the transaction runner. `advanced` exposes the storage contract
//! for custom backends.

pub mod dx {
    //! Everyday surface for application models.
    //!
    //! Intended usage:
    //! - `#[derive(Model)]` over structs embedding `DefaultModel`,
    //! - `Database::coll` for CRUD,
    //! - `Database::transaction` for atomic multi-step work.
    pub use crate::bson::{Bson, Document, doc, oid::ObjectId};
    pub use crate::{
        Collection, Context, Database, DateFields, DefaultModel, ExecutionContext, Hooks, IdField,
        Identifiable, Model, ModelConfig, ModelError, Session, SessionContext,
    };
}

pub mod advanced {
    //! Storage contract and built-in backends.
    pub use crate::storage::{
        Backend, BackendSession, MemoryBackend, MemorySession, Namespace, StorageError,
        StorageResult,
    };

    #[cfg(feature = "mongodb")]
    pub use crate::storage::{MongoBackend, MongoSession};
}
