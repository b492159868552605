// ============================================================================
// Typed Collection Handle
// ============================================================================
//
// `Collection<M>` is the persistence-operation wrapper: it fires the model's
// lifecycle hooks, converts the model to a BSON document and hands it to the
// backend, optionally bound to the session carried by the execution context.
//
// Every `*_with_ctx` operation has a plain variant that runs under a fresh
// context with the database's default timeout.
//
// ============================================================================

mod naming;

pub use naming::{snake_case, type_collection_name};

use crate::core::{Context, ExecutionContext, ModelError, Result};
use crate::model::{self, Identifiable, Model};
use crate::storage::{Backend, Namespace};
use crate::transaction::SessionLock;
use bson::{Bson, Document, doc};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

pub struct Collection<M> {
    namespace: Namespace,
    backend: Arc<dyn Backend>,
    ctx_timeout: Duration,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Collection<M> {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            backend: self.backend.clone(),
            ctx_timeout: self.ctx_timeout,
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for Collection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<M: Model> Collection<M> {
    pub(crate) fn new(namespace: Namespace, backend: Arc<dyn Backend>, ctx_timeout: Duration) -> Self {
        Self {
            namespace,
            backend,
            ctx_timeout,
            _model: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.namespace.collection
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn default_ctx(&self) -> Context {
        Context::background().with_timeout(self.ctx_timeout)
    }

    /// Inserts a new model. Fires `creating` then `saving`, and assigns the
    /// identifier once the insert succeeds. A model that already has an
    /// identifier is rejected before any hook runs.
    pub async fn create(&self, model: &mut M) -> Result<()> {
        self.create_with_ctx(&self.default_ctx(), model).await
    }

    pub async fn create_with_ctx<C>(&self, ctx: &C, model: &mut M) -> Result<()>
    where
        C: ExecutionContext + ?Sized,
    {
        if let Some(id) = model.get_id() {
            return Err(ModelError::AlreadyCreated(id));
        }
        model::before_create(model)?;
        let doc = bson::to_document(model)?;

        let mut lock = SessionLock::acquire(ctx).await?;
        let id = self
            .backend
            .insert_one(ctx.context(), lock.backend_session(), &self.namespace, doc)
            .await?;
        drop(lock);

        model.set_id(id)?;
        tracing::debug!(collection = %self.namespace, id = %id, "document created");
        Ok(())
    }

    /// Replaces the stored document with the model. Fires `updating` then
    /// `saving`. Returns whether a stored document matched.
    pub async fn update(&self, model: &mut M) -> Result<bool> {
        self.update_with_ctx(&self.default_ctx(), model).await
    }

    pub async fn update_with_ctx<C>(&self, ctx: &C, model: &mut M) -> Result<bool>
    where
        C: ExecutionContext + ?Sized,
    {
        let id = model.get_id().ok_or(ModelError::MissingIdentifier)?;
        model::before_update(model)?;
        let doc = bson::to_document(model)?;

        let mut lock = SessionLock::acquire(ctx).await?;
        let matched = self
            .backend
            .replace_one(ctx.context(), lock.backend_session(), &self.namespace, id, doc)
            .await?;
        tracing::debug!(collection = %self.namespace, id = %id, matched, "document updated");
        Ok(matched > 0)
    }

    /// Deletes the stored document. Fires `deleting`. Returns whether a
    /// document was removed.
    pub async fn delete(&self, model: &mut M) -> Result<bool> {
        self.delete_with_ctx(&self.default_ctx(), model).await
    }

    pub async fn delete_with_ctx<C>(&self, ctx: &C, model: &mut M) -> Result<bool>
    where
        C: ExecutionContext + ?Sized,
    {
        let id = model.get_id().ok_or(ModelError::MissingIdentifier)?;
        model::before_delete(model)?;

        let mut lock = SessionLock::acquire(ctx).await?;
        let deleted = self
            .backend
            .delete_one(ctx.context(), lock.backend_session(), &self.namespace, id)
            .await?;
        tracing::debug!(collection = %self.namespace, id = %id, deleted, "document deleted");
        Ok(deleted > 0)
    }

    /// Looks a model up by identifier; `id` may be a hex string or an `ObjectId`.
    pub async fn find_by_id(&self, id: impl Into<Bson>) -> Result<Option<M>> {
        self.find_by_id_with_ctx(&self.default_ctx(), id).await
    }

    pub async fn find_by_id_with_ctx<C>(&self, ctx: &C, id: impl Into<Bson>) -> Result<Option<M>>
    where
        C: ExecutionContext + ?Sized,
    {
        let id = model::prepare_id(id)?;
        self.first_with_ctx(ctx, doc! { "_id": id }).await
    }

    /// First document matching `filter`.
    pub async fn first(&self, filter: Document) -> Result<Option<M>> {
        self.first_with_ctx(&self.default_ctx(), filter).await
    }

    pub async fn first_with_ctx<C>(&self, ctx: &C, filter: Document) -> Result<Option<M>>
    where
        C: ExecutionContext + ?Sized,
    {
        let mut lock = SessionLock::acquire(ctx).await?;
        let found = self
            .backend
            .find_one(ctx.context(), lock.backend_session(), &self.namespace, filter)
            .await?;
        tracing::trace!(collection = %self.namespace, found = found.is_some(), "first");
        found.map(decode).transpose()
    }

    /// All documents matching `filter`, in storage order.
    pub async fn find(&self, filter: Document) -> Result<Vec<M>> {
        self.find_with_ctx(&self.default_ctx(), filter).await
    }

    pub async fn find_with_ctx<C>(&self, ctx: &C, filter: Document) -> Result<Vec<M>>
    where
        C: ExecutionContext + ?Sized,
    {
        let mut lock = SessionLock::acquire(ctx).await?;
        let docs = self
            .backend
            .find(ctx.context(), lock.backend_session(), &self.namespace, filter)
            .await?;
        tracing::trace!(collection = %self.namespace, found = docs.len(), "find");
        docs.into_iter().map(decode).collect()
    }

    pub async fn count(&self, filter: Document) -> Result<u64> {
        self.count_documents(&self.default_ctx(), filter).await
    }

    pub async fn count_documents<C>(&self, ctx: &C, filter: Document) -> Result<u64>
    where
        C: ExecutionContext + ?Sized,
    {
        let mut lock = SessionLock::acquire(ctx).await?;
        let count = self
            .backend
            .count_documents(ctx.context(), lock.backend_session(), &self.namespace, filter)
            .await?;
        Ok(count)
    }
}

// Stored documents go back through `set_id` so the cached hex form is in
// sync even for hand-written `Identifiable` impls.
fn decode<M: Model>(doc: Document) -> Result<M> {
    let mut model: M = bson::from_document(doc)?;
    if let Some(id) = model.get_id() {
        model.set_id(id)?;
    }
    Ok(model)
}
