pub mod config;

pub use config::ModelConfig;

use crate::collection::{Collection, type_collection_name};
use crate::core::{Context, ModelError, Result};
use crate::model::Model;
use crate::storage::{Backend, MemoryBackend, Namespace};
use std::fmt;
use std::sync::Arc;

/// Database handle
///
/// Pairs a storage backend with a default database name and the process
/// configuration. Cheap to clone; every clone shares the same backend.
///
/// Resolves the collection a model lives in ([`Database::coll`]) and runs
/// session transactions ([`Database::transaction`]).
#[derive(Clone)]
pub struct Database {
    name: String,
    backend: Arc<dyn Backend>,
    config: Arc<ModelConfig>,
}

impl Database {
    /// Connect using the backend selected by the URI scheme
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let db = Database::connect(ModelConfig::memory("mgm_lab")).await?;
    /// ```
    pub async fn connect(config: ModelConfig) -> Result<Self> {
        config.validate().map_err(ModelError::Config)?;

        let backend: Arc<dyn Backend> = match config.scheme() {
            "memory" => Arc::new(MemoryBackend::new()),
            #[cfg(feature = "mongodb")]
            "mongodb" | "mongodb+srv" => {
                let backend = crate::storage::MongoBackend::connect(
                    &config.uri,
                    config.app_name.as_deref(),
                )
                .await
                .map_err(|err| ModelError::Config(err.to_string()))?;
                Arc::new(backend)
            }
            other => {
                return Err(ModelError::Config(format!(
                    "unsupported connection scheme '{}'",
                    other
                )));
            }
        };

        tracing::debug!(
            url = %config.to_url(),
            database = %config.database,
            app_name = config.app_name.as_deref().unwrap_or_default(),
            "database connected"
        );
        Ok(Self::with_backend(config, backend))
    }

    /// Wrap an already constructed backend
    pub fn with_backend(config: ModelConfig, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: config.database.clone(),
            backend,
            config: Arc::new(config),
        }
    }

    /// Fresh in-memory database
    pub fn memory(database: &str) -> Self {
        Self::with_backend(ModelConfig::memory(database), Arc::new(MemoryBackend::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Context carrying the configured default timeout
    pub fn ctx(&self) -> Context {
        Context::background().with_timeout(self.config.ctx_timeout)
    }

    /// Another database on the same backend
    pub fn sibling(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            backend: self.backend.clone(),
            config: self.config.clone(),
        }
    }

    /// Collection handle with an explicit name
    pub fn collection<M: Model>(&self, name: &str) -> Collection<M> {
        Collection::new(
            Namespace::new(self.name.as_str(), name),
            self.backend.clone(),
            self.config.ctx_timeout,
        )
    }

    /// Collection the given model lives in
    ///
    /// Resolution order: the model's custom handle, then its custom name,
    /// then the snake_case type name.
    pub fn coll<M: Model>(&self, model: &M) -> Collection<M> {
        match model.collection(self) {
            Some(collection) => collection,
            None => self.coll_for::<M>(),
        }
    }

    /// Collection for a model type, skipping the per-instance handle
    pub fn coll_for<M: Model>(&self) -> Collection<M> {
        match M::collection_name() {
            Some(name) => self.collection(name),
            None => self.collection(&type_collection_name::<M>()),
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
