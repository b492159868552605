// ============================================================================
// Model Contracts
// ============================================================================
//
// A model is any serde type that can report and accept its identifier
// (`Identifiable`), optionally reacts to persistence events (`Hooks`), and
// optionally chooses where it is stored (`Model`).
//
// `#[derive(Model)]` wires all three up from embedded field groups such as
// `DefaultModel`, `IdField` and `DateFields`.
//
// ============================================================================

pub mod codec;
mod fields;
mod identifier;

pub use fields::{DateFields, DefaultModel, now_millis};
pub use identifier::{IdField, prepare_id};

use crate::collection::Collection;
use crate::connection::Database;
use crate::core::{ModelError, Result};
use bson::Bson;
use bson::oid::ObjectId;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Identifier access for a model.
pub trait Identifiable {
    /// Current identifier, `None` while the model is new.
    fn get_id(&self) -> Option<ObjectId>;

    /// Stores `id` and caches its hex form. Fails if a different
    /// identifier is already set.
    fn set_id(&mut self, id: ObjectId) -> Result<()>;

    /// Hex form of the identifier, empty while unset.
    fn get_id_str(&self) -> &str;

    fn prepare_id(&self, raw: impl Into<Bson>) -> Result<ObjectId>
    where
        Self: Sized,
    {
        prepare_id(raw)
    }

    /// Setter for dynamically typed values. Only an `ObjectId` is accepted;
    /// on error the model is left untouched.
    fn try_set_id(&mut self, raw: Bson) -> Result<()> {
        match raw {
            Bson::ObjectId(id) => self.set_id(id),
            other => Err(ModelError::InvalidIdentifier(format!(
                "expected an ObjectId, got {:?}",
                other.element_type()
            ))),
        }
    }

    fn is_new(&self) -> bool {
        self.get_id().is_none()
    }
}

/// Lifecycle hooks fired by [`Collection`] before it touches storage.
///
/// Every hook defaults to a no-op; implement only the ones you need. An
/// error returned from a hook cancels the pending write and is handed back
/// to the caller as-is.
///
/// | operation | hooks, in order        |
/// |-----------|------------------------|
/// | create    | `creating`, `saving`   |
/// | update    | `updating`, `saving`   |
/// | delete    | `deleting`             |
pub trait Hooks {
    fn creating(&mut self) -> Result<()> {
        Ok(())
    }

    fn saving(&mut self) -> Result<()> {
        Ok(())
    }

    fn updating(&mut self) -> Result<()> {
        Ok(())
    }

    fn deleting(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A persistable document type.
pub trait Model:
    Identifiable + Hooks + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Collection name override. Resolved against the default database.
    fn collection_name() -> Option<&'static str> {
        None
    }

    /// Custom collection handle; wins over [`Model::collection_name`].
    fn collection(&self, _db: &Database) -> Option<Collection<Self>> {
        None
    }
}

pub(crate) fn before_create<M: Hooks>(model: &mut M) -> Result<()> {
    model.creating()?;
    model.saving()
}

pub(crate) fn before_update<M: Hooks>(model: &mut M) -> Result<()> {
    model.updating()?;
    model.saving()
}

pub(crate) fn before_delete<M: Hooks>(model: &mut M) -> Result<()> {
    model.deleting()
}
