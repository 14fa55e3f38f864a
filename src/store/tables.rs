//! In-memory table engine shared by the bundled stores.
//!
//! Every mutation is a [`TableOp`]. Applying an op returns its inverse, which
//! is what transactions keep as their undo log; the ops themselves are what
//! the durable store writes to its log.

use crate::error::{Result, VectorTableError};
use crate::schema::{TableMeta, TableNames};
use crate::store::{CentroidId, RowId, StoredCentroid, StoredRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Row {
    bytes: Vec<u8>,
    centroid_id: CentroidId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CentroidRow {
    bytes: Vec<u8>,
    member_count: u64,
}

/// Everything stored for one vector table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableState {
    names: TableNames,
    meta: TableMeta,
    rows: BTreeMap<RowId, Row>,
    centroids: Vec<CentroidRow>,
}

impl TableState {
    pub fn new(names: TableNames, meta: TableMeta, centroids: Vec<Vec<u8>>) -> Result<Self> {
        if centroids.len() != meta.centroid_count {
            return Err(VectorTableError::SchemaError(format!(
                "expected {} centroids, got {}",
                meta.centroid_count,
                centroids.len()
            )));
        }
        Ok(Self {
            names,
            meta,
            rows: BTreeMap::new(),
            centroids: centroids
                .into_iter()
                .map(|bytes| CentroidRow {
                    bytes,
                    member_count: 0,
                })
                .collect(),
        })
    }

    pub fn names(&self) -> &TableNames {
        &self.names
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn check_centroid(&self, centroid_id: CentroidId) -> Result<()> {
        if centroid_id as usize >= self.centroids.len() {
            return Err(VectorTableError::SchemaError(format!(
                "centroid id {} out of range for {} centroids",
                centroid_id,
                self.centroids.len()
            )));
        }
        Ok(())
    }
}

/// A single invertible mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableOp {
    CreateTable {
        state: Box<TableState>,
    },
    DropTable {
        table: String,
    },
    PutRow {
        table: String,
        id: RowId,
        bytes: Vec<u8>,
        centroid_id: CentroidId,
    },
    RemoveRow {
        table: String,
        id: RowId,
    },
    SetNextId {
        table: String,
        next_id: RowId,
    },
    SetCentroids {
        table: String,
        centroids: Vec<Vec<u8>>,
        version: u64,
    },
}

/// All tables of a store, keyed by values table name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    tables: BTreeMap<String, TableState>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table(&self, table: &str) -> Result<&TableState> {
        self.tables
            .get(table)
            .ok_or_else(|| VectorTableError::SchemaError(format!("table {} does not exist", table)))
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut TableState> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| VectorTableError::SchemaError(format!("table {} does not exist", table)))
    }

    /// Iterate over every stored table.
    pub fn iter(&self) -> impl Iterator<Item = &TableState> {
        self.tables.values()
    }

    /// Apply `op` and return the op that undoes it. Fails without changing
    /// anything when the op does not fit the current state.
    pub fn apply(&mut self, op: &TableOp) -> Result<TableOp> {
        match op {
            TableOp::CreateTable { state } => {
                let table = state.names.values.clone();
                if self.tables.contains_key(&table) {
                    return Err(VectorTableError::SchemaError(format!(
                        "table {} already exists",
                        table
                    )));
                }
                self.tables.insert(table.clone(), (**state).clone());
                Ok(TableOp::DropTable { table })
            }
            TableOp::DropTable { table } => {
                let state = self.tables.remove(table).ok_or_else(|| {
                    VectorTableError::SchemaError(format!("table {} does not exist", table))
                })?;
                Ok(TableOp::CreateTable {
                    state: Box::new(state),
                })
            }
            TableOp::PutRow {
                table,
                id,
                bytes,
                centroid_id,
            } => {
                let state = self.table_mut(table)?;
                state.check_centroid(*centroid_id)?;

                let previous = state.rows.insert(
                    *id,
                    Row {
                        bytes: bytes.clone(),
                        centroid_id: *centroid_id,
                    },
                );
                if let Some(prev) = &previous {
                    state.centroids[prev.centroid_id as usize].member_count -= 1;
                }
                state.centroids[*centroid_id as usize].member_count += 1;

                Ok(match previous {
                    Some(prev) => TableOp::PutRow {
                        table: table.clone(),
                        id: *id,
                        bytes: prev.bytes,
                        centroid_id: prev.centroid_id,
                    },
                    None => TableOp::RemoveRow {
                        table: table.clone(),
                        id: *id,
                    },
                })
            }
            TableOp::RemoveRow { table, id } => {
                let state = self.table_mut(table)?;
                let row = state
                    .rows
                    .remove(id)
                    .ok_or(VectorTableError::NotFound { id: *id })?;
                state.centroids[row.centroid_id as usize].member_count -= 1;

                Ok(TableOp::PutRow {
                    table: table.clone(),
                    id: *id,
                    bytes: row.bytes,
                    centroid_id: row.centroid_id,
                })
            }
            TableOp::SetNextId { table, next_id } => {
                let state = self.table_mut(table)?;
                let previous = std::mem::replace(&mut state.meta.next_id, *next_id);
                Ok(TableOp::SetNextId {
                    table: table.clone(),
                    next_id: previous,
                })
            }
            TableOp::SetCentroids {
                table,
                centroids,
                version,
            } => {
                let state = self.table_mut(table)?;
                if centroids.len() != state.centroids.len() {
                    return Err(VectorTableError::SchemaError(format!(
                        "expected {} centroids, got {}",
                        state.centroids.len(),
                        centroids.len()
                    )));
                }
                let previous: Vec<Vec<u8>> = state
                    .centroids
                    .iter_mut()
                    .zip(centroids.iter())
                    .map(|(slot, bytes)| std::mem::replace(&mut slot.bytes, bytes.clone()))
                    .collect();
                let previous_version =
                    std::mem::replace(&mut state.meta.centroid_version, *version);

                Ok(TableOp::SetCentroids {
                    table: table.clone(),
                    centroids: previous,
                    version: previous_version,
                })
            }
        }
    }

    pub fn meta(&self, table: &str) -> Option<&TableMeta> {
        self.tables.get(table).map(|state| &state.meta)
    }

    pub fn row(&self, table: &str, id: RowId) -> Result<Option<StoredRow>> {
        let state = self.table(table)?;
        Ok(state.rows.get(&id).map(|row| StoredRow {
            id,
            bytes: row.bytes.clone(),
            centroid_id: row.centroid_id,
        }))
    }

    pub fn rows_by_centroid(
        &self,
        table: &str,
        centroid_ids: &BTreeSet<CentroidId>,
    ) -> Result<Vec<StoredRow>> {
        let state = self.table(table)?;
        Ok(state
            .rows
            .iter()
            .filter(|(_, row)| centroid_ids.contains(&row.centroid_id))
            .map(|(&id, row)| StoredRow {
                id,
                bytes: row.bytes.clone(),
                centroid_id: row.centroid_id,
            })
            .collect())
    }

    pub fn rows_after(
        &self,
        table: &str,
        after: Option<RowId>,
        limit: usize,
    ) -> Result<Vec<StoredRow>> {
        use std::ops::Bound;

        let state = self.table(table)?;
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(state
            .rows
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(&id, row)| StoredRow {
                id,
                bytes: row.bytes.clone(),
                centroid_id: row.centroid_id,
            })
            .collect())
    }

    pub fn count(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.rows.len())
    }

    pub fn centroids(&self, table: &str) -> Result<Vec<StoredCentroid>> {
        let state = self.table(table)?;
        Ok(state
            .centroids
            .iter()
            .enumerate()
            .map(|(id, c)| StoredCentroid {
                id: id as CentroidId,
                bytes: c.bytes.clone(),
                member_count: c.member_count,
            })
            .collect())
    }
}
