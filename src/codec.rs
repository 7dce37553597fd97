//! Binary encoding of payloads shipped between nodes.
//!
//! Anything `serde`-serializable travels; chunks carry their interval next to
//! the elements in index order, and are re-validated when decoded.

use {
    super::{ChunkError, ChunkResult},
    serde::{Serialize, de::DeserializeOwned},
};

/// Encodes a value into its wire form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> ChunkResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ChunkError::Serialization(e.to_string()))
}

/// Decodes a value from its wire form.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ChunkResult<T> {
    bincode::deserialize(bytes).map_err(|e| ChunkError::Serialization(e.to_string()))
}
