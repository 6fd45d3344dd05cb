//! Durable persistence for graph entities and parameter state.
//!
//! A single ACID key-value store (redb) holds everything, namespaced by key
//! prefix. Every acknowledged upsert and every applied parameter adjustment
//! is committed here before the call returns, so a crash immediately after
//! acknowledgment loses no state.

pub mod durable;

use crate::error::StoreError;
use crate::knowledge::{ConceptId, PatternId, RelationshipKey};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key layout for the durable store.
///
/// Numeric ids are zero-padded so that lexicographic prefix scans return
/// entities in id order.
pub mod keys {
    use super::*;

    /// Prefix under which all concepts live.
    pub const CONCEPT_PREFIX: &[u8] = b"concept/";
    /// Prefix under which all relationships live.
    pub const RELATIONSHIP_PREFIX: &[u8] = b"rel/";
    /// Prefix under which all patterns live.
    pub const PATTERN_PREFIX: &[u8] = b"pattern/";
    /// Key holding the serialized parameter state.
    pub const PARAMETER_STATE: &[u8] = b"params/state";

    /// Key for a concept record.
    pub fn concept(id: ConceptId) -> Vec<u8> {
        format!("concept/{:020}", id.get()).into_bytes()
    }

    /// Key for a pattern record.
    pub fn pattern(id: PatternId) -> Vec<u8> {
        format!("pattern/{:020}", id.get()).into_bytes()
    }

    /// Key for a relationship record.
    pub fn relationship(key: &RelationshipKey) -> Vec<u8> {
        format!(
            "rel/{:020}/{:020}/{}",
            key.source.get(),
            key.target.get(),
            key.rel_type
        )
        .into_bytes()
    }
}

/// Serialize a value for storage.
pub fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization {
        message: format!("encode failed: {e}"),
    })
}

/// Deserialize a stored value.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: format!("decode failed: {e}"),
    })
}
