use async_trait::async_trait;
use docmodel::bson::oid::ObjectId;
use docmodel::bson::{Document, doc};
use docmodel::storage::{Backend, BackendSession, MemoryBackend, Namespace, StorageResult};
use docmodel::{
    Context, Database, DefaultModel, Identifiable, Model, ModelConfig, ModelError, StorageError,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize, Model)]
struct Book {
    #[serde(flatten)]
    #[model(base)]
    base: DefaultModel,
    name: String,
    pages: i32,
}

impl Book {
    fn new(name: &str, pages: i32) -> Self {
        Self {
            base: DefaultModel::new(),
            name: name.to_string(),
            pages,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("out of stock")]
    OutOfStock,

    #[error(transparent)]
    Model(#[from] ModelError),
}

#[tokio::test]
async fn test_commit_persists() {
    let db = Database::memory("mgm_lab");
    let coll = db.coll_for::<Book>();

    db.transaction(|session, sc| {
        let coll = coll.clone();
        async move {
            let mut book = Book::new("Dune", 412);
            coll.create_with_ctx(&sc, &mut book).await?;
            assert!(!book.is_new());
            session.commit_transaction(&sc).await
        }
    })
    .await
    .unwrap();

    assert_eq!(coll.count(doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn test_abort_discards() {
    let db = Database::memory("mgm_lab");
    let coll = db.coll_for::<Book>();

    db.transaction(|session, sc| {
        let coll = coll.clone();
        async move {
            coll.create_with_ctx(&sc, &mut Book::new("Dune", 412)).await?;
            assert_eq!(coll.count_documents(&sc, doc! {}).await?, 1);
            session.abort_transaction(&sc).await
        }
    })
    .await
    .unwrap();

    assert_eq!(coll.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn test_with_ctx_leaves_parent_context_alive() {
    let db = Database::memory("mgm_lab");
    let coll = db.coll_for::<Book>();
    let parent = Context::background();
    let mut seen_child = None;

    db.transaction_with_ctx(&parent, |session, sc| {
        let coll = coll.clone();
        seen_child = Some(docmodel::ExecutionContext::context(&sc).clone());
        async move {
            coll.create_with_ctx(&sc, &mut Book::new("Dune", 412)).await?;
            session.abort_transaction(&sc).await
        }
    })
    .await
    .unwrap();

    assert_eq!(coll.count(doc! {}).await.unwrap(), 0);
    assert!(parent.err().is_none());
    assert!(seen_child.unwrap().is_cancelled());
}

#[tokio::test]
async fn test_writes_invisible_outside_until_commit() {
    let db = Database::memory("mgm_lab");
    let coll = db.coll_for::<Book>();

    db.transaction(|session, sc| {
        let coll = coll.clone();
        async move {
            coll.create_with_ctx(&sc, &mut Book::new("Dune", 412)).await?;
            assert_eq!(coll.count(doc! {}).await?, 0);
            session.commit_transaction(&sc).await?;
            assert_eq!(coll.count(doc! {}).await?, 1);
            Ok::<_, ModelError>(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_body_error_returned_unchanged() {
    let db = Database::memory("mgm_lab");
    let coll = db.coll_for::<Book>();

    let result: Result<(), AppError> = db
        .transaction(|_session, sc| {
            let coll = coll.clone();
            async move {
                coll.create_with_ctx(&sc, &mut Book::new("Dune", 412)).await?;
                Err(AppError::OutOfStock)
            }
        })
        .await;

    assert!(matches!(result, Err(AppError::OutOfStock)));
    assert_eq!(coll.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn test_returns_body_value() {
    let db = Database::memory("mgm_lab");
    let coll = db.coll_for::<Book>();

    let id = db
        .transaction(|session, sc| {
            let coll = coll.clone();
            async move {
                let mut book = Book::new("Dune", 412);
                coll.create_with_ctx(&sc, &mut book).await?;
                session.commit_transaction(&sc).await?;
                Ok::<_, ModelError>(book.get_id())
            }
        })
        .await
        .unwrap();

    assert!(coll.find_by_id(id.unwrap()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_panic_releases_session() {
    let db = Database::memory("mgm_lab");
    let coll = db.coll_for::<Book>();
    let leaked = Arc::new(Mutex::new(None));

    let outcome = AssertUnwindSafe(db.transaction(|session, sc| {
        let coll = coll.clone();
        let leaked = leaked.clone();
        async move {
            *leaked.lock().unwrap() = Some((session, sc.clone()));
            coll.create_with_ctx(&sc, &mut Book::new("Dune", 412)).await?;
            if coll.count_documents(&sc, doc! {}).await? == 1 {
                panic!("boom");
            }
            Ok::<_, ModelError>(())
        }
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert_eq!(coll.count(doc! {}).await.unwrap(), 0);

    let (session, sc) = leaked.lock().unwrap().take().unwrap();
    assert!(session.is_ended().await);
    assert!(matches!(
        coll.create_with_ctx(&sc, &mut Book::new("Emma", 300)).await,
        Err(ModelError::SessionEnded)
    ));
}

#[tokio::test]
async fn test_unfinished_transaction_is_aborted() {
    let db = Database::memory("mgm_lab");
    let coll = db.coll_for::<Book>();

    db.transaction(|_session, sc| {
        let coll = coll.clone();
        async move {
            coll.create_with_ctx(&sc, &mut Book::new("Dune", 412)).await?;
            Ok::<_, ModelError>(())
        }
    })
    .await
    .unwrap();

    assert_eq!(coll.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn test_double_commit_reported() {
    let db = Database::memory("mgm_lab");

    let err = db
        .transaction(|session, sc| async move {
            session.commit_transaction(&sc).await?;
            session.commit_transaction(&sc).await
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::Storage(StorageError::NoTransaction)));
}

#[tokio::test]
async fn test_session_acquisition_failure() {
    let backend = Arc::new(MemoryBackend::new());
    let db = Database::with_backend(ModelConfig::memory("mgm_lab"), backend.clone());
    backend.shutdown();

    let mut ran = false;
    let err = db
        .transaction(|_session, _sc| {
            ran = true;
            async move { Ok::<_, ModelError>(()) }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::SessionAcquisition(_)));
    assert!(!ran);
}

#[tokio::test]
async fn test_cancelled_parent_fails_acquisition() {
    let db = Database::memory("mgm_lab");
    let parent = Context::background();
    parent.cancel();

    let err = db
        .transaction_with_ctx(&parent, |_session, _sc| async move { Ok::<_, ModelError>(()) })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ModelError::SessionAcquisition(StorageError::Context(_))
    ));
}

/// Backend whose sessions refuse to start transactions, like a standalone
/// server without replica set.
#[derive(Default)]
struct NoTxnBackend {
    inner: MemoryBackend,
    ended: Arc<Mutex<usize>>,
}

struct NoTxnSession {
    ended: Arc<Mutex<usize>>,
}

#[async_trait]
impl BackendSession for NoTxnSession {
    fn in_transaction(&self) -> bool {
        false
    }

    async fn start_transaction(&mut self, _ctx: &Context) -> StorageResult<()> {
        Err(StorageError::Backend("transactions are not supported".into()))
    }

    async fn commit_transaction(&mut self, _ctx: &Context) -> StorageResult<()> {
        Err(StorageError::NoTransaction)
    }

    async fn abort_transaction(&mut self, _ctx: &Context) -> StorageResult<()> {
        Err(StorageError::NoTransaction)
    }

    async fn end_session(&mut self, _ctx: &Context) {
        *self.ended.lock().unwrap() += 1;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[async_trait]
impl Backend for NoTxnBackend {
    async fn start_session(&self, _ctx: &Context) -> StorageResult<Box<dyn BackendSession>> {
        Ok(Box::new(NoTxnSession {
            ended: self.ended.clone(),
        }))
    }

    async fn insert_one(
        &self,
        ctx: &Context,
        _session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        doc: Document,
    ) -> StorageResult<ObjectId> {
        self.inner.insert_one(ctx, None, namespace, doc).await
    }

    async fn replace_one(
        &self,
        ctx: &Context,
        _session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        id: ObjectId,
        doc: Document,
    ) -> StorageResult<u64> {
        self.inner.replace_one(ctx, None, namespace, id, doc).await
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        _session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        id: ObjectId,
    ) -> StorageResult<u64> {
        self.inner.delete_one(ctx, None, namespace, id).await
    }

    async fn find_one(
        &self,
        ctx: &Context,
        _session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<Option<Document>> {
        self.inner.find_one(ctx, None, namespace, filter).await
    }

    async fn find(
        &self,
        ctx: &Context,
        _session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<Vec<Document>> {
        self.inner.find(ctx, None, namespace, filter).await
    }

    async fn count_documents(
        &self,
        ctx: &Context,
        _session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<u64> {
        self.inner.count_documents(ctx, None, namespace, filter).await
    }
}

#[tokio::test]
async fn test_transaction_start_failure_still_ends_session() {
    let backend = Arc::new(NoTxnBackend::default());
    let db = Database::with_backend(ModelConfig::memory("mgm_lab"), backend.clone());

    let mut ran = false;
    let err = db
        .transaction(|_session, _sc| {
            ran = true;
            async move { Ok::<_, ModelError>(()) }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::TransactionStart(StorageError::Backend(_))));
    assert!(!ran);
    assert_eq!(*backend.ended.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_nested_transactions_are_independent() {
    let db = Database::memory("mgm_lab");
    let coll = db.coll_for::<Book>();

    let outer_db = db.clone();
    db.transaction(|outer, outer_sc| {
        let coll = coll.clone();
        async move {
            coll.create_with_ctx(&outer_sc, &mut Book::new("Dune", 412)).await?;

            outer_db
                .transaction(|inner, inner_sc| {
                    let coll = coll.clone();
                    async move {
                        assert_eq!(coll.count_documents(&inner_sc, doc! {}).await?, 0);
                        coll.create_with_ctx(&inner_sc, &mut Book::new("Emma", 300)).await?;
                        inner.commit_transaction(&inner_sc).await
                    }
                })
                .await?;

            outer.abort_transaction(&outer_sc).await
        }
    })
    .await
    .unwrap();

    let left = coll.find(doc! {}).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].name, "Emma");
}
