//! Adapter for the official MongoDB driver.
//!
//! Transactions need a replica set or sharded cluster; against a standalone
//! `mongod` the server rejects `start_transaction`.

use super::{Backend, BackendSession, Namespace, StorageError, StorageResult};
use crate::core::Context;
use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::options::ClientOptions;
use mongodb::{Client, ClientSession};
use std::any::Any;

#[derive(Clone)]
pub struct MongoBackend {
    client: Client,
}

impl MongoBackend {
    /// Connects to `uri`, reporting `app_name` to the server when given.
    pub async fn connect(uri: &str, app_name: Option<&str>) -> StorageResult<Self> {
        let options = client_options(uri, app_name).await?;
        let client = Client::with_options(options)?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn collection(&self, namespace: &Namespace) -> mongodb::Collection<Document> {
        self.client
            .database(&namespace.database)
            .collection::<Document>(&namespace.collection)
    }

    fn own_session<'a>(
        session: Option<&'a mut dyn BackendSession>,
    ) -> StorageResult<Option<&'a mut ClientSession>> {
        let Some(session) = session else {
            return Ok(None);
        };
        match session.as_any_mut().downcast_mut::<MongoSession>() {
            Some(session) => session.inner().map(Some),
            None => Err(StorageError::Backend(
                "session was not started by the mongodb backend".into(),
            )),
        }
    }
}

async fn client_options(uri: &str, app_name: Option<&str>) -> StorageResult<ClientOptions> {
    let mut options = ClientOptions::parse(uri).await?;
    if let Some(app_name) = app_name {
        options.app_name = Some(app_name.to_string());
    }
    Ok(options)
}

#[async_trait]
impl Backend for MongoBackend {
    async fn start_session(&self, ctx: &Context) -> StorageResult<Box<dyn BackendSession>> {
        let session = ctx.run(self.client.start_session(None)).await??;
        Ok(Box::new(MongoSession {
            session: Some(session),
            in_transaction: false,
        }))
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

        let coll = self.collection(namespace);
        match Self::own_session(session)? {
            Some(session) => {
                ctx.run(coll.insert_one_with_session(doc, None, session))
                    .await??;
            }
            None => {
                ctx.run(coll.insert_one(doc, None)).await??;
            }
        }
        Ok(id)
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
        let coll = self.collection(namespace);
        let result = match Self::own_session(session)? {
            Some(session) => {
                ctx.run(coll.replace_one_with_session(doc! { "_id": id }, doc, None, session))
                    .await??
            }
            None => ctx.run(coll.replace_one(doc! { "_id": id }, doc, None)).await??,
        };
        Ok(result.matched_count)
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        id: ObjectId,
    ) -> StorageResult<u64> {
        let coll = self.collection(namespace);
        let result = match Self::own_session(session)? {
            Some(session) => {
                ctx.run(coll.delete_one_with_session(doc! { "_id": id }, None, session))
                    .await??
            }
            None => ctx.run(coll.delete_one(doc! { "_id": id }, None)).await??,
        };
        Ok(result.deleted_count)
    }

    async fn find_one(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<Option<Document>> {
        let coll = self.collection(namespace);
        let found = match Self::own_session(session)? {
            Some(session) => {
                ctx.run(coll.find_one_with_session(filter, None, session))
                    .await??
            }
            None => ctx.run(coll.find_one(filter, None)).await??,
        };
        Ok(found)
    }

    async fn find(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<Vec<Document>> {
        let coll = self.collection(namespace);
        let docs = match Self::own_session(session)? {
            Some(session) => {
                ctx.run(async {
                    let mut cursor = coll.find_with_session(filter, None, session).await?;
                    cursor.stream(session).try_collect::<Vec<_>>().await
                })
                .await??
            }
            None => {
                ctx.run(async {
                    let cursor = coll.find(filter, None).await?;
                    cursor.try_collect::<Vec<_>>().await
                })
                .await??
            }
        };
        Ok(docs)
    }

    async fn count_documents(
        &self,
        ctx: &Context,
        session: Option<&mut dyn BackendSession>,
        namespace: &Namespace,
        filter: Document,
    ) -> StorageResult<u64> {
        let coll = self.collection(namespace);
        let count = match Self::own_session(session)? {
            Some(session) => {
                ctx.run(coll.count_documents_with_session(filter, None, session))
                    .await??
            }
            None => ctx.run(coll.count_documents(filter, None)).await??,
        };
        Ok(count)
    }
}

pub struct MongoSession {
    session: Option<ClientSession>,
    in_transaction: bool,
}

impl MongoSession {
    fn inner(&mut self) -> StorageResult<&mut ClientSession> {
        self.session.as_mut().ok_or(StorageError::SessionClosed)
    }
}

#[async_trait]
impl BackendSession for MongoSession {
    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn start_transaction(&mut self, ctx: &Context) -> StorageResult<()> {
        if self.in_transaction {
            return Err(StorageError::TransactionInProgress);
        }
        let session = self.inner()?;
        ctx.run(session.start_transaction(None)).await??;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit_transaction(&mut self, ctx: &Context) -> StorageResult<()> {
        if !self.in_transaction {
            return Err(StorageError::NoTransaction);
        }
        let session = self.inner()?;
        ctx.run(session.commit_transaction()).await??;
        self.in_transaction = false;
        Ok(())
    }

    async fn abort_transaction(&mut self, ctx: &Context) -> StorageResult<()> {
        if !self.in_transaction {
            return Err(StorageError::NoTransaction);
        }
        let session = self.inner()?;
        ctx.run(session.abort_transaction()).await??;
        self.in_transaction = false;
        Ok(())
    }

    async fn end_session(&mut self, _ctx: &Context) {
        if let Some(mut session) = self.session.take() {
            if self.in_transaction {
                // The server also aborts it once the session is dropped.
                let _ = session.abort_transaction().await;
            }
        }
        self.in_transaction = false;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
