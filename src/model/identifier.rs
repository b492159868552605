// ============================================================================
// Identifier
// ============================================================================
//
// The canonical identifier is the store's native `ObjectId` (12 bytes). Its
// external form is 24 lowercase hex characters. Conversion from the external
// form is strict: wrong length or a non-hex symbol is an error, never a
// truncation.
//
// ============================================================================

use super::{Hooks, Identifiable};
use crate::core::{ModelError, Result};
use bson::Bson;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Converts a raw identifier into canonical form.
///
/// - a hex string is decoded,
/// - an `ObjectId` is returned unchanged,
/// - anything else is rejected.
pub fn prepare_id(raw: impl Into<Bson>) -> Result<ObjectId> {
    match raw.into() {
        Bson::ObjectId(id) => Ok(id),
        Bson::String(hex) => parse_hex(&hex),
        other => Err(ModelError::InvalidIdentifier(format!(
            "unsupported identifier type {:?}",
            other.element_type()
        ))),
    }
}

fn parse_hex(hex: &str) -> Result<ObjectId> {
    ObjectId::parse_str(hex)
        .map_err(|err| ModelError::InvalidIdentifier(format!("'{}': {}", hex, err)))
}

/// Identifier field group: the canonical id plus its cached hex form.
///
/// Embed it with `#[serde(flatten)]`. The id is stored as `_id` and omitted
/// while unset, so the store assigns one on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IdFieldRepr")]
pub struct IdField {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    #[serde(skip)]
    id_str: String,
}

#[derive(Deserialize)]
struct IdFieldRepr {
    #[serde(rename = "_id", default)]
    id: Option<ObjectId>,
}

impl From<IdFieldRepr> for IdField {
    fn from(repr: IdFieldRepr) -> Self {
        let mut field = IdField::default();
        if let Some(id) = repr.id {
            field.assign(id);
        }
        field
    }
}

impl IdField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: ObjectId) -> Self {
        let mut field = Self::default();
        field.assign(id);
        field
    }

    fn assign(&mut self, id: ObjectId) {
        self.id = Some(id);
        self.id_str = id.to_hex();
    }
}

impl Identifiable for IdField {
    fn get_id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) -> Result<()> {
        match self.id {
            Some(current) if current != id => Err(ModelError::IdentifierReassigned {
                current,
                attempted: id,
            }),
            Some(_) => Ok(()),
            None => {
                self.assign(id);
                Ok(())
            }
        }
    }

    fn get_id_str(&self) -> &str {
        &self.id_str
    }
}

impl Hooks for IdField {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_id_round_trips_hex() {
        let hex = "507f1f77bcf86cd799439011";
        let id = prepare_id(hex).unwrap();

        let mut field = IdField::new();
        field.set_id(id).unwrap();

        assert_eq!(field.get_id(), Some(id));
        assert_eq!(field.get_id_str(), hex);
    }

    #[test]
    fn test_prepare_id_passes_object_id_through() {
        let id = ObjectId::new();
        assert_eq!(prepare_id(id).unwrap(), id);
    }

    #[test]
    fn test_prepare_id_rejects_malformed_strings() {
        for bad in [
            "",
            "507f1f77bcf86cd79943901",   // 23 chars
            "507f1f77bcf86cd7994390111", // 25 chars
            "507f1f77bcf86cd79943901z",  // non-hex symbol
            "not an identifier at all",
        ] {
            let err = prepare_id(bad).unwrap_err();
            assert!(
                matches!(err, ModelError::InvalidIdentifier(_)),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_prepare_id_rejects_other_types() {
        assert!(matches!(
            prepare_id(42i32),
            Err(ModelError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            prepare_id(Bson::Null),
            Err(ModelError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_identifier_is_immutable_once_set() {
        let first = ObjectId::new();
        let mut field = IdField::with_id(first);

        field.set_id(first).unwrap();
        let err = field.set_id(ObjectId::new()).unwrap_err();

        assert!(matches!(err, ModelError::IdentifierReassigned { .. }));
        assert_eq!(field.get_id(), Some(first));
        assert_eq!(field.get_id_str(), first.to_hex());
    }

    #[test]
    fn test_try_set_id_requires_canonical_form() {
        let mut field = IdField::new();

        let err = field
            .try_set_id(Bson::String("507f1f77bcf86cd799439011".into()))
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidIdentifier(_)));
        assert!(field.is_new());
        assert_eq!(field.get_id_str(), "");

        let id = ObjectId::new();
        field.try_set_id(Bson::ObjectId(id)).unwrap();
        assert_eq!(field.get_id(), Some(id));
    }

    #[test]
    fn test_deserialized_field_caches_hex() {
        let id = ObjectId::new();
        let field: IdField = bson::from_document(bson::doc! { "_id": id }).unwrap();
        assert_eq!(field.get_id_str(), id.to_hex());

        let empty: IdField = bson::from_document(bson::doc! {}).unwrap();
        assert!(empty.is_new());
        assert!(bson::to_document(&empty).unwrap().is_empty());
    }
}
