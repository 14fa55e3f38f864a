//! Serialization utilities: bincode for log records and snapshots, JSON for
//! manifests and configuration.

use crate::error::{Result, VectorTableError};
use crate::store::Tables;
use serde::{Deserialize, Serialize};

/// Full store state as of a given log sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    /// Sequence number of the last commit included in `tables`.
    pub sequence: u64,
    pub tables: Tables,
}

/// Encode data to bincode bytes.
pub fn to_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| VectorTableError::SerializationError(e.to_string()))
}

/// Decode data from bincode bytes.
pub fn from_bincode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| VectorTableError::SerializationError(e.to_string()))
}

/// Encode data to pretty-printed JSON bytes.
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| VectorTableError::SerializationError(e.to_string()))
}

/// Decode data from JSON bytes.
pub fn from_json<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| VectorTableError::SerializationError(e.to_string()))
}
