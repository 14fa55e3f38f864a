//! Table naming and metadata.

use crate::store::RowId;
use serde::{Deserialize, Serialize};

/// Version of the on-store layout written by `initialize`.
pub const SCHEMA_VERSION: u32 = 1;

/// Physical names of the four tables that make up one vector table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    /// `vector_values_<name>`: one row per vector.
    pub values: String,
    /// `vector_meta_<name>`: dimension, centroid count and counters.
    pub meta: String,
    /// `centroids_vector_values_<name>`: centroid values and member counts.
    pub centroid_values: String,
    /// `centroids_vector_meta_<name>`: centroid version.
    pub centroid_meta: String,
}

impl TableNames {
    pub fn for_table(name: &str) -> Self {
        let values = format!("vector_values_{}", name);
        let meta = format!("vector_meta_{}", name);
        Self {
            centroid_values: format!("centroids_{}", values),
            centroid_meta: format!("centroids_{}", meta),
            values,
            meta,
        }
    }

    pub fn all(&self) -> [&str; 4] {
        [
            &self.values,
            &self.meta,
            &self.centroid_values,
            &self.centroid_meta,
        ]
    }
}

/// Contents of the metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub dimension: usize,
    pub centroid_count: usize,
    pub schema_version: u32,
    /// Next id handed out to an insert without a caller-supplied id. Never decreases.
    pub next_id: RowId,
    /// Bumped by every centroid rewrite.
    pub centroid_version: u64,
}

impl TableMeta {
    pub fn new(name: impl Into<String>, dimension: usize, centroid_count: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            centroid_count,
            schema_version: SCHEMA_VERSION,
            next_id: 1,
            centroid_version: 0,
        }
    }

    /// Whether a table with this metadata can serve a handle configured with
    /// the given shape.
    pub fn is_compatible(&self, dimension: usize, centroid_count: usize) -> bool {
        self.dimension == dimension
            && self.centroid_count == centroid_count
            && self.schema_version == SCHEMA_VERSION
    }
}
