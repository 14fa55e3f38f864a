//! Similarity functions used for centroid assignment and ranking.
//!
//! Vectors are stored exactly as given. Ranking uses cosine similarity
//! computed at query time, so the score of a vector against itself is 1.0
//! regardless of its magnitude. A zero-norm operand has cosine similarity 0.0
//! with everything.

use crate::error::{Result, VectorTableError};
use crate::store::RowId;
use crate::vector::Vector;
use std::str::FromStr;

/// One side of a similarity call: a stored record or a literal vector.
///
/// Ids are resolved with a single store read when the call starts.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    ById(RowId),
    ByVector(Vector),
}

impl From<RowId> for Operand {
    fn from(id: RowId) -> Self {
        Operand::ById(id)
    }
}

impl From<Vector> for Operand {
    fn from(vector: Vector) -> Self {
        Operand::ByVector(vector)
    }
}

/// Parses `id:N` as a stored id, anything else as a comma-separated vector.
impl FromStr for Operand {
    type Err = VectorTableError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().strip_prefix("id:") {
            Some(id) => id
                .trim()
                .parse::<RowId>()
                .map(Operand::ById)
                .map_err(|_| VectorTableError::InvalidVector {
                    reason: format!("Invalid id: {}", id),
                }),
            None => Ok(Operand::ByVector(s.parse()?)),
        }
    }
}

fn check_same_dimension(v1: &Vector, v2: &Vector) -> Result<()> {
    if v1.dimension() != v2.dimension() {
        return Err(VectorTableError::DimensionMismatch {
            expected: v1.dimension(),
            actual: v2.dimension(),
        });
    }
    Ok(())
}

/// Compute the dot product of two vectors
pub fn dot_product(v1: &Vector, v2: &Vector) -> Result<f64> {
    check_same_dimension(v1, v2)?;
    Ok(dot(v1.as_slice(), v2.as_slice()))
}

/// Compute cosine similarity `dot(a, b) / (|a| * |b|)`.
pub fn cosine_similarity(v1: &Vector, v2: &Vector) -> Result<f64> {
    check_same_dimension(v1, v2)?;
    Ok(cosine_with_norms(
        v1.as_slice(),
        v2.as_slice(),
        v1.norm(),
        v2.norm(),
    ))
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity with both norms already known. Callers guarantee equal
/// lengths.
pub(crate) fn cosine_with_norms(a: &[f64], b: &[f64], norm_a: f64, norm_b: f64) -> f64 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    // Normalize per component so huge magnitudes cannot overflow the product
    a.iter()
        .zip(b)
        .map(|(x, y)| (x / norm_a) * (y / norm_b))
        .sum()
}
