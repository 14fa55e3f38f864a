//! Fixed-length vector type

use crate::error::{Result, VectorTableError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// An ordered sequence of `f64` components.
///
/// The length is the vector's dimension. A table checks it against its own
/// dimension every time a vector crosses into the codec, the centroid index or
/// the similarity functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vector {
    data: Vec<f64>,
}

impl Vector {
    /// Create a new vector from a Vec<f64>
    pub fn new(data: Vec<f64>) -> Self {
        Self { data }
    }

    /// A vector of `dimension` zeros.
    pub fn zeros(dimension: usize) -> Self {
        Self {
            data: vec![0.0; dimension],
        }
    }

    /// Get the dimension of the vector
    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    /// Get the underlying data as a slice
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.data
    }

    /// Compute the L2 norm (magnitude) of the vector
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Fail with `DimensionMismatch` unless this vector has `expected` components.
    pub fn ensure_dimension(&self, expected: usize) -> Result<()> {
        if self.dimension() != expected {
            return Err(VectorTableError::DimensionMismatch {
                expected,
                actual: self.dimension(),
            });
        }
        Ok(())
    }

    /// Fail with `InvalidVector` if any component is NaN or infinite, or if
    /// the magnitude overflows.
    pub fn ensure_finite(&self) -> Result<()> {
        if let Some(index) = self.data.iter().position(|x| !x.is_finite()) {
            return Err(VectorTableError::InvalidVector {
                reason: format!("component {} is {}", index, self.data[index]),
            });
        }
        if !self.norm().is_finite() {
            return Err(VectorTableError::InvalidVector {
                reason: "magnitude overflows f64".to_string(),
            });
        }
        Ok(())
    }

    /// Dimension and finiteness checks applied to every vector a table
    /// accepts from a caller.
    pub fn validate(&self, expected: usize) -> Result<()> {
        self.ensure_dimension(expected)?;
        self.ensure_finite()
    }
}

impl From<Vec<f64>> for Vector {
    fn from(data: Vec<f64>) -> Self {
        Vector::new(data)
    }
}

/// Parses a comma-separated list such as `"1.0, 2.0, 3.0"`.
impl FromStr for Vector {
    type Err = VectorTableError;

    fn from_str(s: &str) -> Result<Self> {
        let data: Result<Vec<f64>> = s
            .split(',')
            .map(|x| {
                x.trim()
                    .parse::<f64>()
                    .map_err(|_| VectorTableError::InvalidVector {
                        reason: format!("Invalid float: {}", x),
                    })
            })
            .collect();
        Ok(Vector::new(data?))
    }
}
