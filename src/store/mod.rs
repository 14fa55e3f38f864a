//! Backing store interface.
//!
//! The core never owns data. Every operation receives a store handle and does
//! its reads and writes through one [`StoreTransaction`]. Two implementations
//! ship with the crate: [`MemoryStore`] and the durable
//! [`FileStore`](crate::persistence::engine::FileStore).

pub mod memory;
pub mod tables;

pub use memory::{CommitLog, LockedTransaction, MemoryStore, TableStore, Volatile};
pub use tables::{TableOp, TableState, Tables};

use crate::error::Result;
use crate::schema::{TableMeta, TableNames};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of a vector record.
pub type RowId = u64;

/// Identifier of a centroid, `0..centroid_count`.
pub type CentroidId = u32;

/// A row of the values table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: RowId,
    pub bytes: Vec<u8>,
    pub centroid_id: CentroidId,
}

/// A row of the centroid table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCentroid {
    pub id: CentroidId,
    pub bytes: Vec<u8>,
    pub member_count: u64,
}

/// Row-level operations available inside a transaction.
///
/// `table` is always the values table name; a store locates the metadata and
/// centroid tables that belong to it.
pub trait StoreTransaction {
    /// Create all four tables. `centroids` holds the encoded seed of each centroid.
    fn create_schema(
        &mut self,
        names: &TableNames,
        meta: TableMeta,
        centroids: Vec<Vec<u8>>,
    ) -> Result<()>;

    /// Remove all four tables.
    fn drop_schema(&mut self, table: &str) -> Result<()>;

    /// Metadata of the table, or `None` when it does not exist.
    fn get_meta(&self, table: &str) -> Result<Option<TableMeta>>;

    /// Insert a row. Without an id the next value of the table's counter is
    /// used; a supplied id moves the counter past it.
    fn insert_row(
        &mut self,
        table: &str,
        id: Option<RowId>,
        bytes: Vec<u8>,
        centroid_id: CentroidId,
    ) -> Result<RowId>;

    fn update_row(
        &mut self,
        table: &str,
        id: RowId,
        bytes: Vec<u8>,
        centroid_id: CentroidId,
    ) -> Result<()>;

    fn delete_row(&mut self, table: &str, id: RowId) -> Result<()>;

    fn get_row(&self, table: &str, id: RowId) -> Result<Option<StoredRow>>;

    fn get_rows_by_centroid(
        &self,
        table: &str,
        centroid_ids: &BTreeSet<CentroidId>,
    ) -> Result<Vec<StoredRow>>;

    /// One page of the full row stream: up to `limit` rows with id greater
    /// than `after`, ordered by id.
    fn get_all_rows(
        &self,
        table: &str,
        after: Option<RowId>,
        limit: usize,
    ) -> Result<Vec<StoredRow>>;

    fn count(&self, table: &str) -> Result<usize>;

    /// Centroids ordered by id.
    fn get_centroids(&self, table: &str) -> Result<Vec<StoredCentroid>>;

    /// Replace every centroid value, provided the table's centroid version is
    /// still `expected_version`. Returns the new version.
    fn set_centroids(
        &mut self,
        table: &str,
        centroids: Vec<Vec<u8>>,
        expected_version: u64,
    ) -> Result<u64>;

    /// Make every write of this transaction visible and durable.
    fn commit(self) -> Result<()>
    where
        Self: Sized;

    /// Discard every write of this transaction.
    fn rollback(self)
    where
        Self: Sized;
}

/// A store that hands out transactions.
pub trait BackingStore {
    type Transaction<'a>: StoreTransaction
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Transaction<'_>>;

    /// Run `operation` in a fresh transaction: commit when it returns `Ok`,
    /// roll back when it returns `Err`.
    fn execute_in_transaction<'s, T, F>(&'s self, operation: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Transaction<'s>) -> Result<T>,
    {
        let mut txn = self.begin()?;
        match operation(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }
}
