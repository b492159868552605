use crate::storage::StorageError;
use bson::oid::ObjectId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Identifier already set to {current}, refusing to replace it with {attempted}")]
    IdentifierReassigned {
        current: ObjectId,
        attempted: ObjectId,
    },

    #[error("Model has no identifier; create it before updating or deleting")]
    MissingIdentifier,

    #[error("Model {0} was already created; update it instead")]
    AlreadyCreated(ObjectId),

    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("Failed to acquire session: {0}")]
    SessionAcquisition(#[source] StorageError),

    #[error("Failed to start transaction: {0}")]
    TransactionStart(#[source] StorageError),

    #[error("Session has already ended")]
    SessionEnded,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] bson::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] bson::de::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ModelError {
    /// Builds the error a lifecycle hook returns to veto the pending write.
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

impl From<rmp_serde::encode::Error> for ModelError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ModelError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
