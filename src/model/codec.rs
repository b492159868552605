//! MessagePack encoding of [`DefaultModel`] for caches and transport.
//!
//! The wire form is a map keyed by `id`, `create_time` and
//! `last_modify_time`. Unknown keys are skipped when decoding, missing keys
//! leave the field at its zero value.

use super::{DateFields, DefaultModel, IdField, Identifiable, prepare_id};
use crate::core::Result;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct WireRef<'a> {
    id: &'a str,
    create_time: i64,
    last_modify_time: i64,
}

#[derive(Deserialize)]
struct Wire {
    #[serde(default)]
    id: String,
    #[serde(default)]
    create_time: i64,
    #[serde(default)]
    last_modify_time: i64,
}

// map header + three fixstr keys
const KEYS_SIZE: usize = 1 + 3 + 12 + 17;
const STR_PREFIX_SIZE: usize = 5;
const INT64_SIZE: usize = 9;

impl DefaultModel {
    pub fn encode_msg(&self) -> Result<Vec<u8>> {
        let wire = WireRef {
            id: self.get_id_str(),
            create_time: self.created_at(),
            last_modify_time: self.updated_at(),
        };
        Ok(rmp_serde::to_vec_named(&wire)?)
    }

    pub fn decode_msg(bytes: &[u8]) -> Result<Self> {
        let wire: Wire = rmp_serde::from_slice(bytes)?;
        let id = if wire.id.is_empty() {
            IdField::new()
        } else {
            IdField::with_id(prepare_id(wire.id)?)
        };
        Ok(DefaultModel::from_parts(
            id,
            DateFields::new(wire.create_time, wire.last_modify_time),
        ))
    }

    /// Upper bound on the encoded size in bytes.
    pub fn msg_size(&self) -> usize {
        KEYS_SIZE + STR_PREFIX_SIZE + self.get_id_str().len() + 2 * INT64_SIZE
    }
}
