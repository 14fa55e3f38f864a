//! Write path for inserts and updates.

use crate::centroid::CentroidIndex;
use crate::codec;
use crate::error::Result;
use crate::store::{RowId, StoreTransaction};
use crate::vector::Vector;
use tracing::debug;

/// Encodes, assigns and writes vectors of one table within a transaction.
pub struct UpsertPipeline<'a> {
    table: &'a str,
    dimension: usize,
    index: CentroidIndex,
}

impl<'a> UpsertPipeline<'a> {
    /// Load the table's centroids through `txn`.
    pub fn load<T: StoreTransaction + ?Sized>(
        txn: &T,
        table: &'a str,
        dimension: usize,
    ) -> Result<Self> {
        Ok(Self {
            table,
            dimension,
            index: CentroidIndex::load(txn, table, dimension)?,
        })
    }

    /// Write `vector` under `id`, or under a fresh id when `id` is `None`.
    /// An id that does not exist yet is inserted as given.
    pub fn write<T: StoreTransaction + ?Sized>(
        &self,
        txn: &mut T,
        vector: &Vector,
        id: Option<RowId>,
    ) -> Result<RowId> {
        let bytes = codec::encode(vector, self.dimension)?;
        let centroid_id = self.index.assign(vector)?;

        let id = match id {
            Some(id) if txn.get_row(self.table, id)?.is_some() => {
                txn.update_row(self.table, id, bytes, centroid_id)?;
                id
            }
            requested => txn.insert_row(self.table, requested, bytes, centroid_id)?,
        };
        debug!(table = self.table, id, centroid_id, "upserted vector");
        Ok(id)
    }
}
