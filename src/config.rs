//! Table configuration.

use crate::error::{Result, VectorTableError};
use crate::persistence::serialization;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What `delete` does when the id is not present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMiss {
    /// Fail with `NotFound`.
    #[default]
    Error,
    /// Do nothing and report that nothing was removed.
    Ignore,
}

/// Configuration for one vector table.
///
/// `name`, `dimension` and `centroid_count` are fixed once the table is
/// initialized; the remaining fields only shape how operations run and may
/// differ between handles on the same table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub name: String,
    pub dimension: usize,
    pub centroid_count: usize,
    /// Number of best-matching centroids a search scans. `None` scans every
    /// centroid, which makes search exhaustive.
    pub probes: Option<usize>,
    pub delete_miss: DeleteMiss,
    /// Upper bound on k-means iterations in one rebalance.
    pub max_rebalance_iterations: usize,
    /// Seed for the initial centroid values.
    pub seed: u64,
    /// Rows fetched per page by `select_all`.
    pub scan_batch_size: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            dimension: 384,
            centroid_count: 20,
            probes: None,
            delete_miss: DeleteMiss::Error,
            max_rebalance_iterations: 10,
            seed: 42,
            scan_batch_size: 256,
        }
    }
}

impl TableConfig {
    pub fn new(name: impl Into<String>, dimension: usize, centroid_count: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            centroid_count,
            ..Self::default()
        }
    }

    pub fn with_probes(mut self, probes: usize) -> Self {
        self.probes = Some(probes);
        self
    }

    pub fn with_delete_miss(mut self, policy: DeleteMiss) -> Self {
        self.delete_miss = policy;
        self
    }

    pub fn with_max_rebalance_iterations(mut self, iterations: usize) -> Self {
        self.max_rebalance_iterations = iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_scan_batch_size(mut self, batch_size: usize) -> Self {
        self.scan_batch_size = batch_size;
        self
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serialization::from_json(&bytes)
    }

    /// Reject configurations no table can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(VectorTableError::SchemaError(format!(
                "table name must be non-empty and use only [A-Za-z0-9_], got {:?}",
                self.name
            )));
        }
        if self.dimension == 0 {
            return Err(VectorTableError::SchemaError(
                "dimension must be at least 1".to_string(),
            ));
        }
        if self.centroid_count == 0 || self.centroid_count > u32::MAX as usize {
            return Err(VectorTableError::SchemaError(format!(
                "centroid count must be between 1 and {}, got {}",
                u32::MAX,
                self.centroid_count
            )));
        }
        if self.probes == Some(0) {
            return Err(VectorTableError::SchemaError(
                "probes must be at least 1".to_string(),
            ));
        }
        if self.scan_batch_size == 0 {
            return Err(VectorTableError::SchemaError(
                "scan batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
