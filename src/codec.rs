//! Fixed-size binary encoding of vectors.
//!
//! A vector of dimension `d` encodes to exactly `d * 8` bytes: one
//! little-endian IEEE-754 double per component, in order. The layout is the
//! same on every platform and is never mixed with another byte order.

use crate::error::{Result, VectorTableError};
use crate::vector::Vector;

/// Bytes used by a single component.
pub const BYTES_PER_COMPONENT: usize = 8;

/// Encoded size of a vector with the given dimension.
pub fn encoded_len(dimension: usize) -> usize {
    dimension * BYTES_PER_COMPONENT
}

/// Encode `vector`, which must have exactly `dimension` components.
pub fn encode(vector: &Vector, dimension: usize) -> Result<Vec<u8>> {
    vector.ensure_dimension(dimension)?;

    let mut bytes = Vec::with_capacity(encoded_len(dimension));
    for &val in vector.as_slice() {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    Ok(bytes)
}

/// Decode `bytes` produced by [`encode`] for the same dimension.
pub fn decode(bytes: &[u8], dimension: usize) -> Result<Vector> {
    if bytes.len() != encoded_len(dimension) {
        return Err(VectorTableError::DimensionMismatch {
            expected: encoded_len(dimension),
            actual: bytes.len(),
        });
    }

    let data = bytes
        .chunks_exact(BYTES_PER_COMPONENT)
        .map(|chunk| {
            let mut buf = [0u8; BYTES_PER_COMPONENT];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect();
    Ok(Vector::new(data))
}
