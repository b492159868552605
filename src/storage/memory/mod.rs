// ============================================================================
// In-Memory Document Backend
// ============================================================================
//
// Documents live in persistent (structurally shared) maps, so a transaction
// snapshot is an O(1) clone of the whole store. Sessions run transactions
// with snapshot isolation and first-committer-wins conflict detection:
// every committed write stamps its key with the store version, and a commit
// fails if any key it touches was stamped after its snapshot was taken.
//
// Filters are top-level equality matches only.
//
// ============================================================================

mod change;
mod session;

pub use change::Change;
pub use session::{MemorySession, TransactionState};

use super::{Backend, BackendSession, Namespace, StorageError, StorageResult};
use crate::core::Context;
use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Ordered map key for a document id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct DocKey([u8; 12]);

impl From<ObjectId> for DocKey {
    fn from(id: ObjectId) -> Self {
        DocKey(id.bytes())
    }
}

type Documents = im::OrdMap<DocKey, Document>;

#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    collections: im::HashMap<String, Documents>,
    versions: im::HashMap<(String, DocKey), u64>,
    version: u64,
}

impl Store {
    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    /// Version at which `id` in `namespace` was last written (0 if never).
    pub(crate) fn last_write(&self, namespace: &str, id: ObjectId) -> u64 {
        self.versions
            .get(&(namespace.to_string(), DocKey::from(id)))
            .copied()
            .unwrap_or(0)
    }

    fn get(&self, namespace: &str, id: ObjectId) -> Option<&Document> {
        self.collections
            .get(namespace)
            .and_then(|docs| docs.get(&DocKey::from(id)))
    }

    fn scan(&self, namespace: &str, filter: &Document) -> Vec<Document> {
        if let Some(Bson::ObjectId(id)) = filter.get("_id") {
            if filter.len() == 1 {
                return self.get(namespace, *id).cloned().into_iter().collect();
            }
        }
        self.collections
            .get(namespace)
            .map(|docs| {
                docs.values()
                    .filter(|doc| matches_filter(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn count(&self, namespace: &str, filter: &Document) -> u64 {
        if filter.is_empty() {
            return self
                .collections
                .get(namespace)
                .map(|docs| docs.len() as u64)
                .unwrap_or(0);
        }
        self.scan(namespace, filter).len() as u64
    }

    pub(crate) fn apply(&mut self, change: &Change) -> StorageResult<()> {
        let namespace = change.namespace();
        let key = DocKey::from(change.id());
        let mut docs = self.collections.get(namespace).cloned().unwrap_or_default();

        match change {
            Change::Insert { id, doc, .. } => {
                if docs.contains_key(&key) {
                    return Err(StorageError::DuplicateKey {
                        namespace: namespace.to_string(),
                        id: *id,
                    });
                }
                docs.insert(key, doc.clone());
            }
            Change::Replace { doc, .. } => {
                if docs.contains_key(&key) {
                    docs.insert(key, doc.clone());
                }
            }
            Change::Delete { .. } => {
                docs.remove(&key);
            }
        }

        self.collections.insert(namespace.to_string(), docs);
        self.version += 1;
        self.versions
            .insert((namespace.to_string(), key), self.version);
        Ok(())
    }
}

pub(crate) fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, value)| doc.get(key) == Some(value))
}

/// In-process document store implementing the full [`Backend`] contract.
///
/// Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    store: Arc<RwLock<Store>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses every further operation, including new sessions.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of committed writes so far.
    pub async fn version(&self) -> u64 {
        self.store.read().await.version()
    }

    fn ensure_open(&self, ctx: &Context) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Backend("memory backend is shut down".into()));
        }
        ctx.check()?;
        Ok(())
    }

    fn own_session<'a>(
        &self,
        session: Option<&'a mut dyn BackendSession>,
    ) -> StorageResult<Option<&'a mut MemorySession>> {
        let Some(session) = session else {
            return Ok(None);
        };
        match session.as_any_mut().downcast_mut::<MemorySession>() {
            Some(session) if session.belongs_to(&self.store) => Ok(Some(session)),
            _ => Err(StorageError::Backend(
                "session was not started by this backend".into(),
            )),
        }
    }

    /// Plans a write against the visible state and applies it either to the
    /// session transaction's working copy or directly to the shared store.
    async fn write<F>(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        plan: F,
    ) -> StorageResult<Option<ObjectId>>
    where
        F: FnOnce(&Store) -> StorageResult<Option<Change>> + Send,
    {
        self.ensure_open(ctx)?;
        let session = self.own_session(session)?;
        if let Some(session) = session {
            if let Some(txn) = session.active_transaction()? {
                return match plan(txn.working())? {
                    Some(change) => {
                        let id = change.id();
                        txn.record(change)?;
                        Ok(Some(id))
                    }
                    None => Ok(None),
                };
            }
        }

        let mut store = self.store.write().await;
        match plan(&store)? {
            Some(change) => {
                store.apply(&change)?;
                Ok(Some(change.id()))
            }
            None => Ok(None),
        }
    }

    async fn read<T, F>(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        view: F,
    ) -> StorageResult<T>
    where
        F: FnOnce(&Store) -> T + Send,
    {
        self.ensure_open(ctx)?;
        let session = self.own_session(session)?;
        if let Some(session) = session {
            if let Some(txn) = session.active_transaction()? {
                return Ok(view(txn.working()));
            }
        }
        let store = self.store.read().await;
        Ok(view(&store))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn start_session(&self, ctx: &Context) -> StorageResult<Box<dyn BackendSession>> {
        self.ensure_open(ctx)?;
        Ok(Box::new(MemorySession::new(self.store.clone())))
    }

    async fn insert_one(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        mut doc: Document,
    ) -> StorageResult<ObjectId> {
        let id = match doc.get("_id") {
            Some(Bson::ObjectId(id)) => *id,
            Some(other) => {
                return Err(StorageError::InvalidDocument(format!(
                    "_id must be an ObjectId, got {:?}",
                    other.element_type()
                )));
            }
            None => {
                let id = ObjectId::new();
                doc.insert("_id", id);
                id
            }
        };
        let ns = namespace.to_string();

        let inserted = self
            .write(ctx, session, move |store| {
                if store.get(&ns, id).is_some() {
                    return Err(StorageError::DuplicateKey { namespace: ns, id });
                }
                Ok(Some(Change::Insert { namespace: ns, id, doc }))
            })
            .await?;
        Ok(inserted.unwrap_or(id))
    }

    async fn replace_one(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        id: ObjectId,
        mut doc: Document,
    ) -> StorageResult<u64> {
        doc.insert("_id", id);
        let ns = namespace.to_string();
        let replaced = self
            .write(ctx, session, move |store| {
                if store.get(&ns, id).is_none() {
                    return Ok(None);
                }
                Ok(Some(Change::Replace { namespace: ns, id, doc }))
            })
            .await?;
        Ok(replaced.map_or(0, |_| 1))
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        id: ObjectId,
    ) -> StorageResult<u64> {
        let ns = namespace.to_string();
        let deleted = self
            .write(ctx, session, move |store| {
                if store.get(&ns, id).is_none() {
                    return Ok(None);
                }
                Ok(Some(Change::Delete { namespace: ns, id }))
            })
            .await?;
        Ok(deleted.map_or(0, |_| 1))
    }

    async fn find_one(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<Option<Document>> {
        let ns = namespace.to_string();
        self.read(ctx, session, move |store| {
            store.scan(&ns, &filter).into_iter().next()
        })
        .await
    }

    async fn find(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<Vec<Document>> {
        let ns = namespace.to_string();
        self.read(ctx, session, move |store| store.scan(&ns, &filter))
            .await
    }

    async fn count_documents(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<u64> {
        let ns = namespace.to_string();
        self.read(ctx, session, move |store| store.count(&ns, &filter))
            .await
    }
}
