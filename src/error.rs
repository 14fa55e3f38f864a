//! Error types for the vector table

use thiserror::Error;

/// Result type alias for vector table operations
pub type Result<T> = std::result::Result<T, VectorTableError>;

/// Error types that can occur in vector table operations
#[derive(Error, Debug)]
pub enum VectorTableError {
    /// A vector (or its encoding) does not have the table's dimension.
    /// For byte decoding both fields are measured in bytes.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector not found: {id}")]
    NotFound { id: u64 },

    #[error("Vector id already exists: {id}")]
    DuplicateId { id: u64 },

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Concurrency conflict: centroid version expected {expected}, found {actual}")]
    ConcurrencyConflict { expected: u64, actual: u64 },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for VectorTableError {
    fn from(err: std::io::Error) -> Self {
        VectorTableError::TransportError(err.to_string())
    }
}
