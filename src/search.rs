//! Centroid-pruned similarity search.
//!
//! A search ranks the centroids against the query, keeps the best `probes`
//! of them (all of them when `probes` is `None`), fetches the records
//! assigned to those centroids and scores each one by exact cosine
//! similarity. Scanning every centroid makes the result exact; fewer probes
//! trade recall for fewer candidates. A record identical in direction to the
//! query always scores 1.0, so with exhaustive probing it is always returned
//! first (ties broken by id).

use crate::centroid::CentroidIndex;
use crate::codec;
use crate::error::Result;
use crate::similarity::cosine_with_norms;
use crate::store::{CentroidId, RowId, StoreTransaction};
use crate::vector::Vector;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;

/// A search result containing the vector and its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: RowId,
    pub values: Vector,
    pub similarity: f64,
}

/// Search over one table's centroids.
#[derive(Debug)]
pub struct SearchEngine<'a> {
    index: &'a CentroidIndex,
    probes: Option<usize>,
}

impl<'a> SearchEngine<'a> {
    pub fn new(index: &'a CentroidIndex, probes: Option<usize>) -> Self {
        Self { index, probes }
    }

    /// Centroids whose members are scanned for `query`.
    pub fn candidate_centroids(&self, query: &Vector) -> Result<BTreeSet<CentroidId>> {
        let ranked = self.index.rank(query)?;
        let probes = self
            .probes
            .unwrap_or(ranked.len())
            .clamp(1, ranked.len().max(1));
        Ok(ranked.into_iter().take(probes).map(|(id, _)| id).collect())
    }

    /// Top `k` records of `table` by similarity to `query`.
    pub fn search<T: StoreTransaction + ?Sized>(
        &self,
        txn: &T,
        table: &str,
        query: &Vector,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        let dimension = query.dimension();
        let candidates = self.candidate_centroids(query)?;
        if k == 0 {
            return Ok(vec![]);
        }

        let rows = txn.get_rows_by_centroid(table, &candidates)?;
        if rows.is_empty() {
            return Ok(vec![]);
        }

        let query_norm = query.norm();
        let mut scored: Vec<(RowId, f64, Vector)> = rows
            .into_par_iter()
            .map(|row| {
                let values = codec::decode(&row.bytes, dimension)?;
                let similarity = cosine_with_norms(
                    query.as_slice(),
                    values.as_slice(),
                    query_norm,
                    values.norm(),
                );
                Ok((row.id, similarity, values))
            })
            .collect::<Result<Vec<_>>>()?;

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(id, similarity, values)| SearchResult {
                id,
                values,
                similarity,
            })
            .collect())
    }
}
