// ============================================================================
// Storage Collaborator Contract
// ============================================================================
//
// The model layer never talks to a database directly. Everything it needs
// from the document store goes through `Backend` (collection operations) and
// `BackendSession` (session-scoped transactions).
//
// Implementations:
// - `memory::MemoryBackend`: in-process store with snapshot-isolated sessions
// - `mongo::MongoBackend`: official driver adapter (feature = "mongodb")
//
// ============================================================================

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

pub use memory::{MemoryBackend, MemorySession};
#[cfg(feature = "mongodb")]
pub use mongo::{MongoBackend, MongoSession};

use crate::core::{Context, ContextError};
use async_trait::async_trait;
use bson::Document;
use bson::oid::ObjectId;
use std::any::Any;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Duplicate key {id} in '{namespace}'")]
    DuplicateKey { namespace: String, id: ObjectId },

    #[error("Write conflict on {id} in '{namespace}'")]
    WriteConflict { namespace: String, id: ObjectId },

    #[error("Transaction already in progress")]
    TransactionInProgress,

    #[error("No transaction started")]
    NoTransaction,

    #[error("Session closed")]
    SessionClosed,

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[cfg(feature = "mongodb")]
    #[error("Driver error: {0}")]
    Driver(#[from] mongodb::error::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Fully qualified collection address: database plus collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Document-store operations consumed by the model layer.
///
/// Every operation takes the caller's [`Context`] and, optionally, the
/// session it must run under. A session that belongs to a different backend
/// is rejected with [`StorageError::Backend`].
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Opens a new session. The caller is responsible for ending it.
    async fn start_session(&self, ctx: &Context) -> StorageResult<Box<dyn BackendSession>>;

    /// Inserts `doc`, generating an `_id` when it has none. Returns the id.
    async fn insert_one(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        doc: Document,
    ) -> StorageResult<ObjectId>;

    /// Replaces the document with `_id == id`. Returns the matched count.
    async fn replace_one(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        id: ObjectId,
        doc: Document,
    ) -> StorageResult<u64>;

    /// Deletes the document with `_id == id`. Returns the deleted count.
    async fn delete_one(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        id: ObjectId,
    ) -> StorageResult<u64>;

    async fn find_one(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<Option<Document>>;

    async fn find(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<Vec<Document>>;

    async fn count_documents(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<u64>;
}

/// A backend session. At most one transaction is active at a time.
#[async_trait]
pub trait BackendSession: Send + Any {
    fn in_transaction(&self) -> bool;

    async fn start_transaction(&mut self, ctx: &Context) -> StorageResult<()>;

    async fn commit_transaction(&mut self, ctx: &Context) -> StorageResult<()>;

    /// Backends whose abort cannot block may ignore `ctx`.
    async fn abort_transaction(&mut self, ctx: &Context) -> StorageResult<()>;

    /// Releases the session, aborting a transaction that is still active.
    async fn end_session(&mut self, ctx: &Context);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
