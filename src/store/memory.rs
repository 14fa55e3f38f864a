//! Mutex-guarded store built on [`Tables`].
//!
//! A transaction holds the store lock from `begin` until it commits or rolls
//! back, so transactions never interleave. Writes are applied immediately and
//! their inverses kept; rollback (or dropping an unfinished transaction)
//! replays the inverses newest first.

use crate::error::{Result, VectorTableError};
use crate::schema::{TableMeta, TableNames};
use crate::store::tables::{TableOp, TableState, Tables};
use crate::store::{
    BackingStore, CentroidId, RowId, StoredCentroid, StoredRow, StoreTransaction,
};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

/// Receives the ops of every committed transaction, in commit order.
pub trait CommitLog: Send {
    /// Called with the store lock held and `tables` already holding the
    /// committed state. An error aborts the commit and rolls it back.
    fn record(&mut self, tables: &Tables, ops: &[TableOp]) -> Result<()>;
}

/// Commit log that keeps nothing.
#[derive(Debug, Default)]
pub struct Volatile;

impl CommitLog for Volatile {
    fn record(&mut self, _tables: &Tables, _ops: &[TableOp]) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct Inner<L> {
    pub(crate) tables: Tables,
    pub(crate) log: L,
}

/// A store of vector tables whose committed transactions go to `L`.
pub struct TableStore<L: CommitLog> {
    inner: Mutex<Inner<L>>,
}

/// Store that lives only in process memory.
pub type MemoryStore = TableStore<Volatile>;

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_parts(Tables::new(), Volatile)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: CommitLog> TableStore<L> {
    pub(crate) fn from_parts(tables: Tables, log: L) -> Self {
        Self {
            inner: Mutex::new(Inner { tables, log }),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Inner<L>>> {
        self.inner
            .lock()
            .map_err(|_| VectorTableError::TransportError("store lock poisoned".to_string()))
    }

    /// Physical names of every table in the store, in name order.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let inner = self.lock()?;
        let mut names: Vec<String> = inner
            .tables
            .iter()
            .flat_map(|state| state.names().all().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }
}

impl<L: CommitLog> BackingStore for TableStore<L> {
    type Transaction<'a> = LockedTransaction<'a, L> where Self: 'a;

    fn begin(&self) -> Result<Self::Transaction<'_>> {
        Ok(LockedTransaction {
            guard: self.lock()?,
            undo: Vec::new(),
            redo: Vec::new(),
            finished: false,
        })
    }
}

/// Transaction holding the store lock.
pub struct LockedTransaction<'a, L: CommitLog> {
    guard: MutexGuard<'a, Inner<L>>,
    undo: Vec<TableOp>,
    redo: Vec<TableOp>,
    finished: bool,
}

impl<'a, L: CommitLog> LockedTransaction<'a, L> {
    fn apply(&mut self, op: TableOp) -> Result<()> {
        let inverse = self.guard.tables.apply(&op)?;
        self.undo.push(inverse);
        self.redo.push(op);
        Ok(())
    }

    fn revert(&mut self) {
        while let Some(op) = self.undo.pop() {
            if let Err(e) = self.guard.tables.apply(&op) {
                error!("failed to undo {:?}: {}", op, e);
            }
        }
        self.redo.clear();
        self.finished = true;
    }

    fn tables(&self) -> &Tables {
        &self.guard.tables
    }
}

impl<'a, L: CommitLog> Drop for LockedTransaction<'a, L> {
    fn drop(&mut self) {
        if !self.finished {
            self.revert();
        }
    }
}

impl<'a, L: CommitLog> StoreTransaction for LockedTransaction<'a, L> {
    fn create_schema(
        &mut self,
        names: &TableNames,
        meta: TableMeta,
        centroids: Vec<Vec<u8>>,
    ) -> Result<()> {
        let state = TableState::new(names.clone(), meta, centroids)?;
        self.apply(TableOp::CreateTable {
            state: Box::new(state),
        })
    }

    fn drop_schema(&mut self, table: &str) -> Result<()> {
        self.apply(TableOp::DropTable {
            table: table.to_string(),
        })
    }

    fn get_meta(&self, table: &str) -> Result<Option<TableMeta>> {
        Ok(self.tables().meta(table).cloned())
    }

    fn insert_row(
        &mut self,
        table: &str,
        id: Option<RowId>,
        bytes: Vec<u8>,
        centroid_id: CentroidId,
    ) -> Result<RowId> {
        let next_id = self.tables().table(table)?.meta().next_id;
        let id = match id {
            Some(id) => {
                if self.tables().row(table, id)?.is_some() {
                    return Err(VectorTableError::DuplicateId { id });
                }
                id
            }
            None => next_id,
        };
        let after = id.checked_add(1).ok_or_else(|| {
            VectorTableError::SchemaError(format!("id space exhausted in {}", table))
        })?;

        self.apply(TableOp::PutRow {
            table: table.to_string(),
            id,
            bytes,
            centroid_id,
        })?;
        if after > next_id {
            self.apply(TableOp::SetNextId {
                table: table.to_string(),
                next_id: after,
            })?;
        }
        debug!(table, id, centroid_id, "inserted row");
        Ok(id)
    }

    fn update_row(
        &mut self,
        table: &str,
        id: RowId,
        bytes: Vec<u8>,
        centroid_id: CentroidId,
    ) -> Result<()> {
        if self.tables().row(table, id)?.is_none() {
            return Err(VectorTableError::NotFound { id });
        }
        self.apply(TableOp::PutRow {
            table: table.to_string(),
            id,
            bytes,
            centroid_id,
        })?;
        debug!(table, id, centroid_id, "updated row");
        Ok(())
    }

    fn delete_row(&mut self, table: &str, id: RowId) -> Result<()> {
        self.apply(TableOp::RemoveRow {
            table: table.to_string(),
            id,
        })?;
        debug!(table, id, "deleted row");
        Ok(())
    }

    fn get_row(&self, table: &str, id: RowId) -> Result<Option<StoredRow>> {
        self.tables().row(table, id)
    }

    fn get_rows_by_centroid(
        &self,
        table: &str,
        centroid_ids: &BTreeSet<CentroidId>,
    ) -> Result<Vec<StoredRow>> {
        self.tables().rows_by_centroid(table, centroid_ids)
    }

    fn get_all_rows(
        &self,
        table: &str,
        after: Option<RowId>,
        limit: usize,
    ) -> Result<Vec<StoredRow>> {
        self.tables().rows_after(table, after, limit)
    }

    fn count(&self, table: &str) -> Result<usize> {
        self.tables().count(table)
    }

    fn get_centroids(&self, table: &str) -> Result<Vec<StoredCentroid>> {
        self.tables().centroids(table)
    }

    fn set_centroids(
        &mut self,
        table: &str,
        centroids: Vec<Vec<u8>>,
        expected_version: u64,
    ) -> Result<u64> {
        let actual = self.tables().table(table)?.meta().centroid_version;
        if actual != expected_version {
            return Err(VectorTableError::ConcurrencyConflict {
                expected: expected_version,
                actual,
            });
        }
        let version = actual + 1;
        self.apply(TableOp::SetCentroids {
            table: table.to_string(),
            centroids,
            version,
        })?;
        Ok(version)
    }

    fn commit(mut self) -> Result<()> {
        if !self.redo.is_empty() {
            let inner = &mut *self.guard;
            if let Err(e) = inner.log.record(&inner.tables, &self.redo) {
                self.revert();
                return Err(e);
            }
        }
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self) {
        self.revert();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_table(centroids: usize) -> (MemoryStore, TableNames) {
        let store = MemoryStore::new();
        let names = TableNames::for_table("t");
        store
            .execute_in_transaction(|txn| {
                txn.create_schema(
                    &names,
                    TableMeta::new("t", 1, centroids),
                    vec![vec![0u8; 8]; centroids],
                )
            })
            .unwrap();
        (store, names)
    }

    #[test]
    fn test_insert_allocates_monotonic_ids() {
        let (store, names) = store_with_table(1);
        let table = names.values.as_str();

        let ids = store
            .execute_in_transaction(|txn| {
                let a = txn.insert_row(table, None, vec![0u8; 8], 0)?;
                let b = txn.insert_row(table, Some(10), vec![0u8; 8], 0)?;
                let c = txn.insert_row(table, None, vec![0u8; 8], 0)?;
                txn.delete_row(table, c)?;
                let d = txn.insert_row(table, None, vec![0u8; 8], 0)?;
                Ok(vec![a, b, c, d])
            })
            .unwrap();
        assert_eq!(ids, vec![1, 10, 11, 12]);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let (store, names) = store_with_table(1);
        let table = names.values.as_str();

        let err = store
            .execute_in_transaction(|txn| {
                txn.insert_row(table, Some(3), vec![0u8; 8], 0)?;
                txn.insert_row(table, Some(3), vec![0u8; 8], 0)
            })
            .unwrap_err();
        assert!(matches!(err, VectorTableError::DuplicateId { id: 3 }));
    }

    #[test]
    fn test_failed_transaction_leaves_no_trace() {
        let (store, names) = store_with_table(2);
        let table = names.values.as_str();
        store
            .execute_in_transaction(|txn| txn.insert_row(table, None, vec![1u8; 8], 0))
            .unwrap();

        let result: Result<()> = store.execute_in_transaction(|txn| {
            txn.insert_row(table, None, vec![2u8; 8], 1)?;
            txn.update_row(table, 1, vec![3u8; 8], 1)?;
            Err(VectorTableError::TransportError("boom".to_string()))
        });
        assert!(result.is_err());

        store
            .execute_in_transaction(|txn| {
                assert_eq!(txn.count(table)?, 1);
                let row = txn.get_row(table, 1)?.unwrap();
                assert_eq!(row.bytes, vec![1u8; 8]);
                assert_eq!(row.centroid_id, 0);
                assert_eq!(txn.get_meta(table)?.unwrap().next_id, 2);
                let counts: Vec<u64> = txn
                    .get_centroids(table)?
                    .iter()
                    .map(|c| c.member_count)
                    .collect();
                assert_eq!(counts, vec![1, 0]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let (store, names) = store_with_table(1);
        let table = names.values.as_str();
        {
            let mut txn = store.begin().unwrap();
            txn.insert_row(table, None, vec![0u8; 8], 0).unwrap();
        }
        let count = store.execute_in_transaction(|txn| txn.count(table)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_set_centroids_checks_version() {
        let (store, names) = store_with_table(1);
        let table = names.values.as_str();

        let version = store
            .execute_in_transaction(|txn| txn.set_centroids(table, vec![vec![1u8; 8]], 0))
            .unwrap();
        assert_eq!(version, 1);

        let err = store
            .execute_in_transaction(|txn| txn.set_centroids(table, vec![vec![2u8; 8]], 0))
            .unwrap_err();
        assert!(matches!(
            err,
            VectorTableError::ConcurrencyConflict {
                expected: 0,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_update_and_delete_missing_rows() {
        let (store, names) = store_with_table(1);
        let table = names.values.as_str();

        let err = store
            .execute_in_transaction(|txn| txn.update_row(table, 4, vec![0u8; 8], 0))
            .unwrap_err();
        assert!(matches!(err, VectorTableError::NotFound { id: 4 }));

        let err = store
            .execute_in_transaction(|txn| txn.delete_row(table, 4))
            .unwrap_err();
        assert!(matches!(err, VectorTableError::NotFound { id: 4 }));
    }

    #[test]
    fn test_table_names_follow_convention() {
        let (store, _) = store_with_table(1);
        assert_eq!(
            store.table_names().unwrap(),
            vec![
                "centroids_vector_meta_t",
                "centroids_vector_values_t",
                "vector_meta_t",
                "vector_values_t",
            ]
        );
    }
}
