use crate::core::{Context, ExecutionContext, ModelError, Result};
use crate::storage::{BackendSession, StorageError, StorageResult};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

type Slot = Option<Box<dyn BackendSession>>;

struct SessionInner {
    id: Uuid,
    slot: Mutex<Slot>,
}

/// Handle to a backend session owned by a transaction runner.
///
/// Clones share the same session. Once the runner releases it, every
/// operation fails with [`ModelError::SessionEnded`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(backend_session: Box<dyn BackendSession>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                slot: Mutex::new(Some(backend_session)),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub async fn start_transaction<C>(&self, ctx: &C) -> Result<()>
    where
        C: ExecutionContext + ?Sized,
    {
        let mut slot = self.inner.slot.lock().await;
        let session = slot.as_mut().ok_or(ModelError::SessionEnded)?;
        session.start_transaction(ctx.context()).await?;
        tracing::debug!(session = %self.inner.id, "transaction started");
        Ok(())
    }

    pub async fn commit_transaction<C>(&self, ctx: &C) -> Result<()>
    where
        C: ExecutionContext + ?Sized,
    {
        let mut slot = self.inner.slot.lock().await;
        let session = slot.as_mut().ok_or(ModelError::SessionEnded)?;
        session.commit_transaction(ctx.context()).await?;
        tracing::debug!(session = %self.inner.id, "transaction committed");
        Ok(())
    }

    pub async fn abort_transaction<C>(&self, ctx: &C) -> Result<()>
    where
        C: ExecutionContext + ?Sized,
    {
        let mut slot = self.inner.slot.lock().await;
        let session = slot.as_mut().ok_or(ModelError::SessionEnded)?;
        session.abort_transaction(ctx.context()).await?;
        tracing::debug!(session = %self.inner.id, "transaction aborted");
        Ok(())
    }

    /// Commits under a background context.
    pub async fn commit(&self) -> Result<()> {
        self.commit_transaction(&Context::background()).await
    }

    /// Aborts under a background context.
    pub async fn abort(&self) -> Result<()> {
        self.abort_transaction(&Context::background()).await
    }

    pub async fn in_transaction(&self) -> bool {
        let slot = self.inner.slot.lock().await;
        slot.as_ref().is_some_and(|session| session.in_transaction())
    }

    pub async fn is_ended(&self) -> bool {
        self.inner.slot.lock().await.is_none()
    }

    pub(crate) async fn begin(&self, ctx: &Context) -> StorageResult<()> {
        let mut slot = self.inner.slot.lock().await;
        let session = slot.as_mut().ok_or(StorageError::SessionClosed)?;
        session.start_transaction(ctx).await
    }

    /// Ends the backend session and empties the slot. Returns whether a
    /// transaction was still active.
    pub(crate) async fn end(&self, ctx: &Context) -> bool {
        let Some(mut session) = self.inner.slot.lock().await.take() else {
            return false;
        };
        let unfinished = session.in_transaction();
        session.end_session(ctx).await;
        unfinished
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.inner.id).finish()
    }
}

/// Execution context that binds collection operations to a session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    session: Session,
    ctx: Context,
}

impl SessionContext {
    pub(crate) fn new(session: Session, ctx: Context) -> Self {
        Self { session, ctx }
    }
}

impl ExecutionContext for SessionContext {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn session(&self) -> Option<&Session> {
        Some(&self.session)
    }
}

/// Exclusive access to the backend session, if the context carries one,
/// for the duration of a single collection operation.
pub(crate) struct SessionLock<'a> {
    guard: Option<MutexGuard<'a, Slot>>,
}

impl<'a> SessionLock<'a> {
    pub(crate) async fn acquire<C>(ctx: &'a C) -> Result<Self>
    where
        C: ExecutionContext + ?Sized,
    {
        let Some(session) = ctx.session() else {
            return Ok(Self { guard: None });
        };
        let guard = session.inner.slot.lock().await;
        if guard.is_none() {
            return Err(ModelError::SessionEnded);
        }
        Ok(Self { guard: Some(guard) })
    }

    pub(crate) fn backend_session(&mut self) -> Option<&mut dyn BackendSession> {
        let boxed = self.guard.as_mut()?.as_mut()?;
        let session: &mut dyn BackendSession = &mut **boxed;
        Some(session)
    }
}
