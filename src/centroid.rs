//! Centroid index: seeding, assignment and k-means rebalancing.
//!
//! # Seeding
//! Each centroid component is drawn uniformly from `[-1, 1)` by a `StdRng`
//! seeded with the table's configured seed. The seeds are persisted when the
//! table is created, so a table keeps the same starting centroids for its
//! whole life.
//!
//! # Assignment
//! A vector belongs to the centroid with the highest cosine similarity. Ties
//! go to the smallest centroid id.
//!
//! # Rebalance
//! Lloyd iterations over every stored vector: recompute each centroid as the
//! mean of its current members (a centroid without members keeps its value),
//! then move every vector to its nearest centroid. Stops once an iteration
//! moves no vector or the iteration cap is hit. Either way every vector ends
//! up assigned to its nearest final centroid.

use crate::codec;
use crate::error::{Result, VectorTableError};
use crate::similarity::cosine_with_norms;
use crate::store::{CentroidId, RowId, StoreTransaction};
use crate::vector::Vector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{info, warn};

/// A centroid as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Centroid {
    pub id: CentroidId,
    pub values: Vector,
    pub member_count: u64,
}

/// Outcome of a rebalance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebalanceReport {
    pub iterations: usize,
    /// Whether the last iteration moved no vector.
    pub converged: bool,
    /// Number of stored vectors whose centroid changed.
    pub reassigned: usize,
}

/// Deterministic initial centroids.
pub fn seed_centroids(dimension: usize, count: usize, seed: u64) -> Vec<Vector> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| Vector::new((0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect()))
        .collect()
}

/// The centroids of a table, decoded for one operation.
#[derive(Debug, Clone)]
pub struct CentroidIndex {
    centroids: Vec<Vector>,
    norms: Vec<f64>,
    dimension: usize,
}

impl CentroidIndex {
    /// Build an index over `centroids`, which must all have `dimension`
    /// components.
    pub fn new(centroids: Vec<Vector>, dimension: usize) -> Result<Self> {
        if centroids.is_empty() {
            return Err(VectorTableError::SchemaError(
                "a centroid index needs at least one centroid".to_string(),
            ));
        }
        for centroid in &centroids {
            centroid.ensure_dimension(dimension)?;
        }
        let norms = centroids.iter().map(Vector::norm).collect();
        Ok(Self {
            centroids,
            norms,
            dimension,
        })
    }

    /// Read and decode the centroids of `table`.
    pub fn load<T: StoreTransaction + ?Sized>(
        txn: &T,
        table: &str,
        dimension: usize,
    ) -> Result<Self> {
        let centroids = txn
            .get_centroids(table)?
            .iter()
            .map(|c| codec::decode(&c.bytes, dimension))
            .collect::<Result<Vec<_>>>()?;
        Self::new(centroids, dimension)
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn centroids(&self) -> &[Vector] {
        &self.centroids
    }

    /// Id of the centroid most similar to `vector`.
    pub fn assign(&self, vector: &Vector) -> Result<CentroidId> {
        vector.ensure_dimension(self.dimension)?;
        Ok(self.nearest(vector.as_slice(), vector.norm()))
    }

    /// Every centroid with its similarity to `query`, best first, ties by id.
    pub fn rank(&self, query: &Vector) -> Result<Vec<(CentroidId, f64)>> {
        query.ensure_dimension(self.dimension)?;
        let query_norm = query.norm();
        let mut ranked: Vec<(CentroidId, f64)> = self
            .centroids
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(id, (centroid, &norm))| {
                (
                    id as CentroidId,
                    cosine_with_norms(query.as_slice(), centroid.as_slice(), query_norm, norm),
                )
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked)
    }

    fn nearest(&self, values: &[f64], norm: f64) -> CentroidId {
        let mut best = 0;
        let mut best_similarity = f64::NEG_INFINITY;
        for (id, (centroid, &centroid_norm)) in self.centroids.iter().zip(&self.norms).enumerate() {
            let similarity = cosine_with_norms(values, centroid.as_slice(), norm, centroid_norm);
            // Strictly greater, so the first (smallest) id wins ties
            if similarity.total_cmp(&best_similarity) == Ordering::Greater {
                best = id;
                best_similarity = similarity;
            }
        }
        best as CentroidId
    }

    /// Run bounded k-means iterations over `vectors`, starting from the
    /// clusters described by `assignments` (each vector's current centroid),
    /// which is updated in place.
    pub fn kmeans(
        self,
        vectors: &[Vector],
        assignments: &mut [CentroidId],
        max_iterations: usize,
    ) -> Result<(CentroidIndex, KMeansStats)> {
        debug_assert_eq!(vectors.len(), assignments.len());
        for vector in vectors {
            vector.ensure_dimension(self.dimension)?;
        }

        let original = assignments.to_vec();
        let mut index = self;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < max_iterations {
            iterations += 1;

            let centroids = recompute_means(&index.centroids, vectors, assignments);
            index = CentroidIndex::new(centroids, index.dimension)?;

            let next: Vec<CentroidId> = vectors
                .par_iter()
                .map(|v| index.nearest(v.as_slice(), v.norm()))
                .collect();
            let moved = next
                .iter()
                .zip(assignments.iter())
                .filter(|(a, b)| a != b)
                .count();
            assignments.copy_from_slice(&next);

            if moved == 0 {
                converged = true;
                break;
            }
        }

        let reassigned = original
            .iter()
            .zip(assignments.iter())
            .filter(|(a, b)| a != b)
            .count();
        Ok((
            index,
            KMeansStats {
                iterations,
                converged,
                reassigned,
            },
        ))
    }

    /// Recompute the centroids of `table` from its stored vectors and move
    /// every vector to its new centroid. Runs entirely inside `txn`; the
    /// centroid write fails with `ConcurrencyConflict` if another rebalance
    /// rewrote the centroids since they were read.
    pub fn rebalance<T: StoreTransaction + ?Sized>(
        txn: &mut T,
        table: &str,
        dimension: usize,
        max_iterations: usize,
        page_size: usize,
    ) -> Result<RebalanceReport> {
        let meta = txn.get_meta(table)?.ok_or_else(|| {
            VectorTableError::SchemaError(format!("table {} does not exist", table))
        })?;
        let index = Self::load(txn, table, dimension)?;

        let mut ids: Vec<RowId> = Vec::new();
        let mut encoded: Vec<Vec<u8>> = Vec::new();
        let mut vectors: Vec<Vector> = Vec::new();
        let mut assignments: Vec<CentroidId> = Vec::new();
        let mut after = None;
        loop {
            let page = txn.get_all_rows(table, after, page_size)?;
            let last_page = page.len() < page_size;
            after = page.last().map(|row| row.id).or(after);
            for row in page {
                vectors.push(codec::decode(&row.bytes, dimension)?);
                ids.push(row.id);
                encoded.push(row.bytes);
                assignments.push(row.centroid_id);
            }
            if last_page {
                break;
            }
        }

        let stored = assignments.clone();
        let (index, stats) = index.kmeans(&vectors, &mut assignments, max_iterations)?;

        let centroids = index
            .centroids()
            .iter()
            .map(|c| codec::encode(c, dimension))
            .collect::<Result<Vec<_>>>()?;
        txn.set_centroids(table, centroids, meta.centroid_version)?;

        for (i, bytes) in encoded.into_iter().enumerate() {
            if assignments[i] != stored[i] {
                txn.update_row(table, ids[i], bytes, assignments[i])?;
            }
        }

        let report = RebalanceReport {
            iterations: stats.iterations,
            converged: stats.converged,
            reassigned: stats.reassigned,
        };
        if report.converged {
            info!(table, vectors = vectors.len(), ?report, "rebalance converged");
        } else {
            warn!(table, vectors = vectors.len(), ?report, "rebalance hit its iteration cap");
        }
        Ok(report)
    }
}

/// Counters from [`CentroidIndex::kmeans`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeansStats {
    pub iterations: usize,
    pub converged: bool,
    /// Vectors whose final centroid differs from their starting one.
    pub reassigned: usize,
}

fn recompute_means(
    previous: &[Vector],
    vectors: &[Vector],
    assignments: &[CentroidId],
) -> Vec<Vector> {
    let dimension = previous.first().map(Vector::dimension).unwrap_or(0);
    let mut sums = vec![vec![0.0; dimension]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (vector, &centroid_id) in vectors.iter().zip(assignments) {
        let idx = centroid_id as usize;
        counts[idx] += 1;
        for (sum, value) in sums[idx].iter_mut().zip(vector.as_slice()) {
            *sum += value;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), prev)| {
            if count == 0 {
                prev.clone()
            } else {
                Vector::new(sum.into_iter().map(|s| s / count as f64).collect())
            }
        })
        .collect()
}
