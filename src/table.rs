//! The vector table: public operations over a backing store.

use crate::centroid::{seed_centroids, Centroid, CentroidIndex, RebalanceReport};
use crate::codec;
use crate::config::{DeleteMiss, TableConfig};
use crate::error::{Result, VectorTableError};
use crate::schema::{TableMeta, TableNames};
use crate::search::{SearchEngine, SearchResult};
use crate::similarity::{self, Operand};
use crate::store::{BackingStore, RowId, StoreTransaction, StoredRow};
use crate::upsert::UpsertPipeline;
use crate::vector::Vector;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

/// A stored vector with its id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: RowId,
    pub values: Vector,
}

/// Handle on one vector table.
///
/// The handle holds configuration only. Every operation takes the store it
/// runs against, so one handle can serve any number of stores and several
/// tables can share one store.
#[derive(Debug, Clone)]
pub struct VectorTable {
    config: TableConfig,
    names: TableNames,
}

impl VectorTable {
    /// A table with default settings for everything but its shape.
    pub fn new(name: impl Into<String>, dimension: usize, centroid_count: usize) -> Result<Self> {
        Self::with_config(TableConfig::new(name, dimension, centroid_count))
    }

    pub fn with_config(config: TableConfig) -> Result<Self> {
        config.validate()?;
        let names = TableNames::for_table(&config.name);
        Ok(Self { config, names })
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn names(&self) -> &TableNames {
        &self.names
    }

    /// `vector_values_<name>`
    pub fn values_table_name(&self) -> &str {
        &self.names.values
    }

    /// `vector_meta_<name>`
    pub fn meta_table_name(&self) -> &str {
        &self.names.meta
    }

    fn table(&self) -> &str {
        &self.names.values
    }

    /// Create the table and its seeded centroids. Succeeds without changes
    /// when a table of the same shape already exists; a table with a
    /// different dimension, centroid count or schema version is a
    /// `SchemaError`.
    pub fn initialize<S: BackingStore>(&self, store: &S) -> Result<()> {
        store.execute_in_transaction(|txn| {
            if let Some(existing) = txn.get_meta(self.table())? {
                if !existing.is_compatible(self.config.dimension, self.config.centroid_count) {
                    return Err(VectorTableError::SchemaError(format!(
                        "{} exists with dimension {}, {} centroids, schema version {}",
                        self.table(),
                        existing.dimension,
                        existing.centroid_count,
                        existing.schema_version
                    )));
                }
                debug!(table = self.table(), "table already initialized");
                return Ok(());
            }

            let centroids = seed_centroids(
                self.config.dimension,
                self.config.centroid_count,
                self.config.seed,
            )
            .iter()
            .map(|c| codec::encode(c, self.config.dimension))
            .collect::<Result<Vec<_>>>()?;
            let meta = TableMeta::new(
                &self.config.name,
                self.config.dimension,
                self.config.centroid_count,
            );
            txn.create_schema(&self.names, meta, centroids)?;
            info!(
                table = self.table(),
                dimension = self.config.dimension,
                centroids = self.config.centroid_count,
                "table initialized"
            );
            Ok(())
        })
    }

    /// Insert `vector`, or overwrite the record `id` when given. Returns the
    /// record's id.
    pub fn upsert<S: BackingStore>(
        &self,
        store: &S,
        vector: &Vector,
        id: Option<RowId>,
    ) -> Result<RowId> {
        vector.validate(self.config.dimension)?;
        store.execute_in_transaction(|txn| {
            let pipeline = UpsertPipeline::load(txn, self.table(), self.config.dimension)?;
            pipeline.write(txn, vector, id)
        })
    }

    /// Insert every vector in one transaction. Either all are stored or none.
    pub fn upsert_batch<S: BackingStore>(&self, store: &S, vectors: &[Vector]) -> Result<Vec<RowId>> {
        for vector in vectors {
            vector.validate(self.config.dimension)?;
        }
        store.execute_in_transaction(|txn| {
            let pipeline = UpsertPipeline::load(txn, self.table(), self.config.dimension)?;
            vectors
                .iter()
                .map(|vector| pipeline.write(txn, vector, None))
                .collect()
        })
    }

    /// Vectors for the given ids. Ids that do not exist are left out.
    pub fn select<S: BackingStore>(
        &self,
        store: &S,
        ids: &[RowId],
    ) -> Result<BTreeMap<RowId, Vector>> {
        store.execute_in_transaction(|txn| {
            let mut found = BTreeMap::new();
            for &id in ids {
                if let Some(row) = txn.get_row(self.table(), id)? {
                    found.insert(id, codec::decode(&row.bytes, self.config.dimension)?);
                }
            }
            Ok(found)
        })
    }

    /// Every record in id order. Rows are fetched lazily in pages; each call
    /// starts a new, independent scan.
    pub fn select_all<'s, S: BackingStore>(&'s self, store: &'s S) -> SelectAll<'s, S> {
        SelectAll {
            store,
            table: self.table(),
            dimension: self.config.dimension,
            batch_size: self.config.scan_batch_size,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The `k` records most similar to `query`, best first.
    pub fn search<S: BackingStore>(
        &self,
        store: &S,
        query: &Vector,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        query.validate(self.config.dimension)?;
        store.execute_in_transaction(|txn| {
            let index = CentroidIndex::load(txn, self.table(), self.config.dimension)?;
            SearchEngine::new(&index, self.config.probes).search(txn, self.table(), query, k)
        })
    }

    /// Dot product of two operands.
    pub fn dot<S: BackingStore>(
        &self,
        store: &S,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Result<f64> {
        let (a, b) = self.resolve_pair(store, a.into(), b.into())?;
        similarity::dot_product(&a, &b)
    }

    /// Cosine similarity of two operands.
    pub fn cosine<S: BackingStore>(
        &self,
        store: &S,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Result<f64> {
        let (a, b) = self.resolve_pair(store, a.into(), b.into())?;
        similarity::cosine_similarity(&a, &b)
    }

    fn resolve_pair<S: BackingStore>(
        &self,
        store: &S,
        a: Operand,
        b: Operand,
    ) -> Result<(Vector, Vector)> {
        let needs_store =
            matches!(a, Operand::ById(_)) || matches!(b, Operand::ById(_));
        if !needs_store {
            return Ok((self.resolve_literal(a)?, self.resolve_literal(b)?));
        }
        store.execute_in_transaction(|txn| Ok((self.resolve(txn, a)?, self.resolve(txn, b)?)))
    }

    fn resolve<T: StoreTransaction + ?Sized>(&self, txn: &T, operand: Operand) -> Result<Vector> {
        match operand {
            Operand::ById(id) => {
                let row = txn
                    .get_row(self.table(), id)?
                    .ok_or(VectorTableError::NotFound { id })?;
                codec::decode(&row.bytes, self.config.dimension)
            }
            literal => self.resolve_literal(literal),
        }
    }

    fn resolve_literal(&self, operand: Operand) -> Result<Vector> {
        match operand {
            Operand::ByVector(vector) => {
                vector.validate(self.config.dimension)?;
                Ok(vector)
            }
            Operand::ById(id) => Err(VectorTableError::NotFound { id }),
        }
    }

    /// Remove the record `id`. Returns whether a record was removed; a
    /// missing id is handled per the configured [`DeleteMiss`] policy.
    pub fn delete<S: BackingStore>(&self, store: &S, id: RowId) -> Result<bool> {
        store.execute_in_transaction(|txn| {
            if txn.get_row(self.table(), id)?.is_none() {
                return match self.config.delete_miss {
                    DeleteMiss::Error => Err(VectorTableError::NotFound { id }),
                    DeleteMiss::Ignore => {
                        debug!(table = self.table(), id, "delete of missing id ignored");
                        Ok(false)
                    }
                };
            }
            txn.delete_row(self.table(), id)?;
            Ok(true)
        })
    }

    /// Number of stored vectors.
    pub fn count<S: BackingStore>(&self, store: &S) -> Result<usize> {
        store.execute_in_transaction(|txn| txn.count(self.table()))
    }

    /// Current centroids with their member counts, ordered by id.
    pub fn centroids<S: BackingStore>(&self, store: &S) -> Result<Vec<Centroid>> {
        store.execute_in_transaction(|txn| {
            txn.get_centroids(self.table())?
                .into_iter()
                .map(|c| {
                    Ok(Centroid {
                        id: c.id,
                        values: codec::decode(&c.bytes, self.config.dimension)?,
                        member_count: c.member_count,
                    })
                })
                .collect()
        })
    }

    /// Recompute centroids from the stored vectors and reassign every vector.
    pub fn rebalance<S: BackingStore>(&self, store: &S) -> Result<RebalanceReport> {
        store.execute_in_transaction(|txn| {
            CentroidIndex::rebalance(
                txn,
                self.table(),
                self.config.dimension,
                self.config.max_rebalance_iterations,
                self.config.scan_batch_size,
            )
        })
    }

    /// Drop the values, metadata and centroid tables.
    pub fn drop_table<S: BackingStore>(&self, store: &S) -> Result<()> {
        store.execute_in_transaction(|txn| txn.drop_schema(self.table()))?;
        info!(table = self.table(), "table dropped");
        Ok(())
    }
}

/// Lazy scan over a table in id order, returned by [`VectorTable::select_all`].
pub struct SelectAll<'s, S: BackingStore> {
    store: &'s S,
    table: &'s str,
    dimension: usize,
    batch_size: usize,
    cursor: Option<RowId>,
    buffer: VecDeque<StoredRow>,
    exhausted: bool,
}

impl<'s, S: BackingStore> SelectAll<'s, S> {
    fn fill(&mut self) -> Result<()> {
        let (table, cursor, limit) = (self.table, self.cursor, self.batch_size);
        let page = self
            .store
            .execute_in_transaction(|txn| txn.get_all_rows(table, cursor, limit))?;
        if page.len() < self.batch_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(last.id);
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<'s, S: BackingStore> Iterator for SelectAll<'s, S> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let row = self.buffer.pop_front()?;
        Some(codec::decode(&row.bytes, self.dimension).map(|values| Record {
            id: row.id,
            values,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use approx::assert_relative_eq;

    fn table() -> (VectorTable, MemoryStore) {
        let table = VectorTable::new("unit", 3, 2).unwrap();
        let store = MemoryStore::new();
        table.initialize(&store).unwrap();
        (table, store)
    }

    fn v(data: &[f64]) -> Vector {
        Vector::new(data.to_vec())
    }

    #[test]
    fn test_table_names() {
        let table = VectorTable::new("test_table", 3, 2).unwrap();
        assert_eq!(table.meta_table_name(), "vector_meta_test_table");
        assert_eq!(table.values_table_name(), "vector_values_test_table");
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (table, store) = table();
        table.upsert(&store, &v(&[1.0, 2.0, 3.0]), None).unwrap();
        table.initialize(&store).unwrap();
        assert_eq!(table.count(&store).unwrap(), 1);
    }

    #[test]
    fn test_initialize_rejects_incompatible_schema() {
        let (_, store) = table();
        let other = VectorTable::new("unit", 4, 2).unwrap();
        assert!(matches!(
            other.initialize(&store),
            Err(VectorTableError::SchemaError(_))
        ));
        let other = VectorTable::new("unit", 3, 5).unwrap();
        assert!(matches!(
            other.initialize(&store),
            Err(VectorTableError::SchemaError(_))
        ));
    }

    #[test]
    fn test_operations_before_initialize() {
        let table = VectorTable::new("missing", 3, 2).unwrap();
        let store = MemoryStore::new();
        assert!(matches!(
            table.upsert(&store, &v(&[1.0, 2.0, 3.0]), None),
            Err(VectorTableError::SchemaError(_))
        ));
        assert!(matches!(
            table.count(&store),
            Err(VectorTableError::SchemaError(_))
        ));
    }

    #[test]
    fn test_upsert_with_unknown_id_inserts_it() {
        let (table, store) = table();
        let id = table.upsert(&store, &v(&[1.0, 0.0, 0.0]), Some(40)).unwrap();
        assert_eq!(id, 40);
        let next = table.upsert(&store, &v(&[0.0, 1.0, 0.0]), None).unwrap();
        assert_eq!(next, 41);
    }

    #[test]
    fn test_upsert_batch_is_all_or_nothing() {
        let (table, store) = table();
        let err = table
            .upsert_batch(&store, &[v(&[1.0, 0.0, 0.0]), v(&[1.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, VectorTableError::DimensionMismatch { .. }));
        assert_eq!(table.count(&store).unwrap(), 0);

        let ids = table
            .upsert_batch(&store, &[v(&[1.0, 0.0, 0.0]), v(&[0.0, 1.0, 0.0])])
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_member_counts_track_writes() {
        let (table, store) = table();
        let a = table.upsert(&store, &v(&[1.0, 0.0, 0.0]), None).unwrap();
        table.upsert(&store, &v(&[0.0, 1.0, 0.0]), None).unwrap();
        table.upsert(&store, &v(&[0.0, 0.0, 1.0]), Some(a)).unwrap();

        let total: u64 = table
            .centroids(&store)
            .unwrap()
            .iter()
            .map(|c| c.member_count)
            .sum();
        assert_eq!(total, 2);

        table.delete(&store, a).unwrap();
        let total: u64 = table
            .centroids(&store)
            .unwrap()
            .iter()
            .map(|c| c.member_count)
            .sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_delete_leaves_centroid_values() {
        let (table, store) = table();
        let before = table.centroids(&store).unwrap();
        let id = table.upsert(&store, &v(&[1.0, 2.0, 3.0]), None).unwrap();
        table.delete(&store, id).unwrap();
        let after = table.centroids(&store).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_dot_with_literals_only() {
        let (table, store) = table();
        let dot = table
            .dot(&store, v(&[1.0, 2.0, 3.0]), v(&[4.0, 5.0, 6.0]))
            .unwrap();
        assert_relative_eq!(dot, 32.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dot_rejects_wrong_literal_dimension() {
        let (table, store) = table();
        assert!(matches!(
            table.dot(&store, v(&[1.0, 2.0]), v(&[1.0, 2.0])),
            Err(VectorTableError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_non_finite_vectors_are_rejected_before_writing() {
        let (table, store) = table();
        let id = table.upsert(&store, &v(&[1.0, 2.0, 3.0]), None).unwrap();

        for bad in [
            v(&[f64::NAN, 0.0, 0.0]),
            v(&[f64::INFINITY, 1.0, 0.0]),
            v(&[0.0, f64::NEG_INFINITY, 0.0]),
        ] {
            assert!(matches!(
                table.upsert(&store, &bad, None),
                Err(VectorTableError::InvalidVector { .. })
            ));
            assert!(matches!(
                table.upsert(&store, &bad, Some(id)),
                Err(VectorTableError::InvalidVector { .. })
            ));
            assert!(matches!(
                table.upsert_batch(&store, &[v(&[1.0, 1.0, 1.0]), bad.clone()]),
                Err(VectorTableError::InvalidVector { .. })
            ));
            assert!(matches!(
                table.search(&store, &bad, 3),
                Err(VectorTableError::InvalidVector { .. })
            ));
            assert!(matches!(
                table.dot(&store, id, bad.clone()),
                Err(VectorTableError::InvalidVector { .. })
            ));
            assert!(matches!(
                table.cosine(&store, bad.clone(), v(&[1.0, 0.0, 0.0])),
                Err(VectorTableError::InvalidVector { .. })
            ));
        }

        assert_eq!(table.count(&store).unwrap(), 1);
        let results = table.search(&store, &v(&[1.0, 2.0, 3.0]), 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert_relative_eq!(results[0].similarity, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_dot_missing_id() {
        let (table, store) = table();
        assert!(matches!(
            table.dot(&store, 9u64, v(&[1.0, 2.0, 3.0])),
            Err(VectorTableError::NotFound { id: 9 })
        ));
    }

    #[test]
    fn test_cosine_by_id() {
        let (table, store) = table();
        let a = table.upsert(&store, &v(&[1.0, 0.0, 0.0]), None).unwrap();
        let b = table.upsert(&store, &v(&[5.0, 0.0, 0.0]), None).unwrap();
        assert_relative_eq!(table.cosine(&store, a, b).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_select_all_pages_through_everything() {
        let table = VectorTable::with_config(TableConfig::new("paged", 1, 1).with_scan_batch_size(2))
            .unwrap();
        let store = MemoryStore::new();
        table.initialize(&store).unwrap();
        for i in 0..5 {
            table.upsert(&store, &v(&[i as f64]), None).unwrap();
        }

        let records: Vec<Record> = table
            .select_all(&store)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let ids: Vec<RowId> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(records[4].values.as_slice(), &[4.0]);

        // Restartable: a second scan is independent of the first
        let mut first = table.select_all(&store);
        first.next().unwrap().unwrap();
        assert_eq!(table.select_all(&store).count(), 5);
        assert_eq!(first.count(), 4);
    }

    #[test]
    fn test_drop_table() {
        let (table, store) = table();
        table.upsert(&store, &v(&[1.0, 2.0, 3.0]), None).unwrap();
        table.drop_table(&store).unwrap();
        assert!(store.table_names().unwrap().is_empty());
        assert!(table.count(&store).is_err());

        table.initialize(&store).unwrap();
        assert_eq!(table.count(&store).unwrap(), 0);
    }
}
