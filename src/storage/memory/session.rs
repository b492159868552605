// ============================================================================
// Memory Session & Transaction State
// ============================================================================
//
// State transitions of a session transaction:
//
//   (none) ──start──> Active ──commit──> Committed
//                        │
//                        └──abort / end_session / conflict──> Aborted
//
// A session may run any number of transactions one after another, never two
// at once.
//
// ============================================================================

use super::{Change, Store};
use crate::core::Context;
use crate::storage::{BackendSession, StorageError, StorageResult};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is open and accepts operations
    Active,

    /// Transaction has been successfully committed
    Committed,

    /// Transaction has been aborted/rolled back
    Aborted,
}

/// Open transaction: a private snapshot of the store plus the writes made on it.
#[derive(Debug)]
pub(crate) struct MemoryTxn {
    base_version: u64,
    working: Store,
    changes: Vec<Change>,
}

impl MemoryTxn {
    fn new(snapshot: Store) -> Self {
        Self {
            base_version: snapshot.version(),
            working: snapshot,
            changes: Vec::new(),
        }
    }

    pub(crate) fn working(&self) -> &Store {
        &self.working
    }

    pub(crate) fn record(&mut self, change: Change) -> StorageResult<()> {
        self.working.apply(&change)?;
        self.changes.push(change);
        Ok(())
    }
}

/// Session handed out by [`MemoryBackend`](super::MemoryBackend).
#[derive(Debug)]
pub struct MemorySession {
    id: Uuid,
    store: Arc<RwLock<Store>>,
    txn: Option<MemoryTxn>,
    last_state: Option<TransactionState>,
    closed: bool,
}

impl MemorySession {
    pub(crate) fn new(store: Arc<RwLock<Store>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            txn: None,
            last_state: None,
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// State of the current or most recent transaction, if any ran.
    pub fn transaction_state(&self) -> Option<TransactionState> {
        self.last_state
    }

    /// Writes recorded by the open transaction.
    pub fn pending_changes(&self) -> usize {
        self.txn.as_ref().map_or(0, |txn| txn.changes.len())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn belongs_to(&self, store: &Arc<RwLock<Store>>) -> bool {
        Arc::ptr_eq(&self.store, store)
    }

    pub(crate) fn active_transaction(&mut self) -> StorageResult<Option<&mut MemoryTxn>> {
        if self.closed {
            return Err(StorageError::SessionClosed);
        }
        Ok(self.txn.as_mut())
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::SessionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl BackendSession for MemorySession {
    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    async fn start_transaction(&mut self, ctx: &Context) -> StorageResult<()> {
        self.ensure_open()?;
        ctx.check()?;
        if self.txn.is_some() {
            return Err(StorageError::TransactionInProgress);
        }
        let snapshot = self.store.read().await.clone();
        self.txn = Some(MemoryTxn::new(snapshot));
        self.last_state = Some(TransactionState::Active);
        Ok(())
    }

    async fn commit_transaction(&mut self, ctx: &Context) -> StorageResult<()> {
        self.ensure_open()?;
        ctx.check()?;
        let txn = self.txn.take().ok_or(StorageError::NoTransaction)?;

        let mut store = self.store.write().await;
        for change in &txn.changes {
            if store.last_write(change.namespace(), change.id()) > txn.base_version {
                self.last_state = Some(TransactionState::Aborted);
                return Err(StorageError::WriteConflict {
                    namespace: change.namespace().to_string(),
                    id: change.id(),
                });
            }
        }

        let mut next = store.clone();
        for change in &txn.changes {
            if let Err(err) = next.apply(change) {
                self.last_state = Some(TransactionState::Aborted);
                return Err(err);
            }
        }
        *store = next;
        self.last_state = Some(TransactionState::Committed);
        Ok(())
    }

    /// Does not consult `ctx`: dropping the working copy never waits on
    /// anything, so an abort under a cancelled context still succeeds.
    async fn abort_transaction(&mut self, _ctx: &Context) -> StorageResult<()> {
        self.ensure_open()?;
        self.txn.take().ok_or(StorageError::NoTransaction)?;
        self.last_state = Some(TransactionState::Aborted);
        Ok(())
    }

    async fn end_session(&mut self, _ctx: &Context) {
        if self.txn.take().is_some() {
            self.last_state = Some(TransactionState::Aborted);
        }
        self.closed = true;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
