//! Integration tests for the vector table

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use vector_table::store::StoreTransaction;
use vector_table::{
    BackingStore, DeleteMiss, MemoryStore, Record, TableConfig, Vector, VectorTable,
    VectorTableError,
};

fn random_vectors(rng: &mut StdRng, n: usize, dim: usize) -> Vec<Vector> {
    (0..n)
        .map(|_| Vector::new((0..dim).map(|_| rng.gen_range(-1.0..=1.0)).collect()))
        .collect()
}

fn setup(name: &str, dimension: usize, centroids: usize) -> (VectorTable, MemoryStore) {
    let table = VectorTable::new(name, dimension, centroids).unwrap();
    let store = MemoryStore::new();
    table.initialize(&store).unwrap();
    (table, store)
}

#[test]
fn test_basic_workflow() {
    let (table, store) = setup("basic", 3, 2);

    let v1 = table.upsert(&store, &Vector::new(vec![1.0, 0.0, 0.0]), None).unwrap();
    let v2 = table.upsert(&store, &Vector::new(vec![0.0, 1.0, 0.0]), None).unwrap();
    table.upsert(&store, &Vector::new(vec![0.0, 0.0, 1.0]), None).unwrap();
    assert_eq!(table.count(&store).unwrap(), 3);

    let results = table
        .search(&store, &Vector::new(vec![1.0, 0.1, 0.0]), 2)
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, v1);

    assert!(table.delete(&store, v2).unwrap());
    assert_eq!(table.count(&store).unwrap(), 2);
}

#[test]
fn test_scenario_search_finds_target_among_10k() {
    let mut rng = StdRng::seed_from_u64(1);
    let (table, store) = setup("scenario_a", 384, 20);

    let noise = random_vectors(&mut rng, 10_000, 384);
    table.upsert_batch(&store, &noise).unwrap();
    let target = Vector::new(vec![0.5; 384]);
    let target_id = table.upsert(&store, &target, None).unwrap();
    assert_eq!(table.count(&store).unwrap(), 10_001);

    let results = table.search(&store, &target, 10).unwrap();
    assert_eq!(results.len(), 10);
    assert_eq!(results[0].id, target_id);
    assert_eq!(results[0].values, target);
    assert_relative_eq!(results[0].similarity, 1.0, epsilon = 1e-9);
    for pair in results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[test]
fn test_scenario_dot_of_half_vectors() {
    let (table, store) = setup("scenario_b", 384, 4);
    let half = Vector::new(vec![0.5; 384]);
    let id1 = table.upsert(&store, &half, None).unwrap();
    let id2 = table.upsert(&store, &half, None).unwrap();

    assert_relative_eq!(table.dot(&store, id1, id2).unwrap(), 96.0, epsilon = 1e-9);
    assert_relative_eq!(table.dot(&store, id2, half.clone()).unwrap(), 96.0, epsilon = 1e-9);
}

#[test]
fn test_scenario_select_all_returns_inserted() {
    let mut rng = StdRng::seed_from_u64(3);
    let (table, store) = setup("scenario_c", 16, 3);
    let vectors = random_vectors(&mut rng, 10, 16);

    let mut expected = Vec::new();
    for v in &vectors {
        let id = table.upsert(&store, v, None).unwrap();
        expected.push(Record { id, values: v.clone() });
    }

    let all: Vec<Record> = table
        .select_all(&store)
        .collect::<vector_table::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(all, expected);
}

#[test]
fn test_insert_select_and_update_in_place() {
    let (table, store) = setup("update", 2, 2);
    let id = table.upsert(&store, &Vector::new(vec![1.0, 2.0]), None).unwrap();
    let other = table.upsert(&store, &Vector::new(vec![3.0, 4.0]), None).unwrap();

    let selected = table.select(&store, &[id]).unwrap();
    assert_eq!(selected, BTreeMap::from([(id, Vector::new(vec![1.0, 2.0]))]));

    table.upsert(&store, &Vector::new(vec![-5.0, 0.5]), Some(id)).unwrap();
    assert_eq!(table.count(&store).unwrap(), 2);
    let selected = table.select(&store, &[id, other, 999]).unwrap();
    assert_eq!(selected.len(), 2);
    assert_eq!(selected[&id], Vector::new(vec![-5.0, 0.5]));
    assert_eq!(selected[&other], Vector::new(vec![3.0, 4.0]));
}

#[test]
fn test_count_conservation_and_unique_ids() {
    let mut rng = StdRng::seed_from_u64(5);
    let (table, store) = setup("conservation", 4, 3);
    let mut ids = Vec::new();
    for v in random_vectors(&mut rng, 50, 4) {
        ids.push(table.upsert(&store, &v, None).unwrap());
    }

    let mut deleted = 0;
    for id in ids.iter().step_by(3) {
        assert!(table.delete(&store, *id).unwrap());
        deleted += 1;
    }
    assert_eq!(table.count(&store).unwrap(), 50 - deleted);

    let fresh = table.upsert(&store, &Vector::new(vec![1.0; 4]), None).unwrap();
    assert!(!ids.contains(&fresh));
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), ids.len());
}

#[test]
fn test_dot_symmetry() {
    let mut rng = StdRng::seed_from_u64(7);
    let (table, store) = setup("symmetry", 32, 4);
    let vectors = random_vectors(&mut rng, 20, 32);
    let ids = table.upsert_batch(&store, &vectors).unwrap();

    for pair in ids.windows(2) {
        let ab = table.dot(&store, pair[0], pair[1]).unwrap();
        let ba = table.dot(&store, pair[1], pair[0]).unwrap();
        assert_relative_eq!(ab, ba, epsilon = 1e-9);
    }
}

#[test]
fn test_self_match() {
    let mut rng = StdRng::seed_from_u64(11);
    let (table, store) = setup("self_match", 8, 4);
    let vectors = random_vectors(&mut rng, 200, 8);
    let ids = table.upsert_batch(&store, &vectors).unwrap();

    for (id, v) in ids.iter().zip(&vectors).take(20) {
        let results = table.search(&store, v, 1).unwrap();
        assert_eq!(results[0].id, *id);
        assert_relative_eq!(results[0].similarity, 1.0, epsilon = 1e-9);
    }
}

#[test]
fn test_post_delete() {
    let (table, store) = setup("post_delete", 2, 2);
    let id = table.upsert(&store, &Vector::new(vec![1.0, 1.0]), None).unwrap();
    table.upsert(&store, &Vector::new(vec![2.0, 1.0]), None).unwrap();

    table.delete(&store, id).unwrap();
    assert!(table.select(&store, &[id]).unwrap().is_empty());
    assert_eq!(table.count(&store).unwrap(), 1);
    assert!(table
        .search(&store, &Vector::new(vec![1.0, 1.0]), 5)
        .unwrap()
        .iter()
        .all(|r| r.id != id));
    assert!(matches!(
        table.dot(&store, id, Vector::new(vec![1.0, 1.0])),
        Err(VectorTableError::NotFound { .. })
    ));
}

#[test]
fn test_dimension_guard_leaves_store_unchanged() {
    let (table, store) = setup("guard", 3, 2);
    let id = table.upsert(&store, &Vector::new(vec![1.0, 2.0, 3.0]), None).unwrap();

    for bad in [vec![1.0, 2.0], vec![1.0, 2.0, 3.0, 4.0], vec![]] {
        let err = table.upsert(&store, &Vector::new(bad.clone()), Some(id)).unwrap_err();
        assert!(matches!(err, VectorTableError::DimensionMismatch { .. }));
        let err = table.upsert(&store, &Vector::new(bad.clone()), None).unwrap_err();
        assert!(matches!(err, VectorTableError::DimensionMismatch { .. }));
        assert!(matches!(
            table.search(&store, &Vector::new(bad), 3),
            Err(VectorTableError::DimensionMismatch { .. })
        ));
    }

    assert_eq!(table.count(&store).unwrap(), 1);
    assert_eq!(
        table.select(&store, &[id]).unwrap()[&id],
        Vector::new(vec![1.0, 2.0, 3.0])
    );
}

#[test]
fn test_search_on_empty_table() {
    let (table, store) = setup("empty", 3, 2);
    let results = table.search(&store, &Vector::new(vec![1.0, 0.0, 0.0]), 10).unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_probes_limit_candidates() {
    let config = TableConfig::new("probes", 2, 4).with_probes(1);
    let table = VectorTable::with_config(config).unwrap();
    let store = MemoryStore::new();
    table.initialize(&store).unwrap();

    let mut rng = StdRng::seed_from_u64(13);
    let vectors = random_vectors(&mut rng, 100, 2);
    table.upsert_batch(&store, &vectors).unwrap();

    let centroids = table.centroids(&store).unwrap();
    let query = Vector::new(vec![0.3, -0.7]);
    let results = table.search(&store, &query, 100).unwrap();

    // Only the members of the single nearest centroid are candidates
    let nearest = centroids
        .iter()
        .max_by(|a, b| {
            let sa = vector_table::similarity::cosine_similarity(&a.values, &query).unwrap();
            let sb = vector_table::similarity::cosine_similarity(&b.values, &query).unwrap();
            sa.total_cmp(&sb).then(b.id.cmp(&a.id))
        })
        .unwrap();
    assert_eq!(results.len() as u64, nearest.member_count);

    let exhaustive = VectorTable::new("probes", 2, 4).unwrap();
    assert_eq!(exhaustive.search(&store, &query, 100).unwrap().len(), 100);
}

#[test]
fn test_delete_miss_policies() {
    let (strict, store) = setup("strict", 2, 2);
    assert!(matches!(
        strict.delete(&store, 42),
        Err(VectorTableError::NotFound { id: 42 })
    ));

    let lenient = VectorTable::with_config(
        TableConfig::new("lenient", 2, 2).with_delete_miss(DeleteMiss::Ignore),
    )
    .unwrap();
    lenient.initialize(&store).unwrap();
    assert!(!lenient.delete(&store, 42).unwrap());

    let id = lenient.upsert(&store, &Vector::new(vec![1.0, 0.0]), None).unwrap();
    assert!(lenient.delete(&store, id).unwrap());
    assert!(!lenient.delete(&store, id).unwrap());
}

#[test]
fn test_rebalance_preserves_records() {
    let mut rng = StdRng::seed_from_u64(17);
    let (table, store) = setup("rebalance", 8, 5);
    let vectors = random_vectors(&mut rng, 300, 8);
    let ids = table.upsert_batch(&store, &vectors).unwrap();

    let report = table.rebalance(&store).unwrap();
    assert!(report.iterations >= 1);
    assert!(report.iterations <= table.config().max_rebalance_iterations);

    assert_eq!(table.count(&store).unwrap(), 300);
    let members: u64 = table
        .centroids(&store)
        .unwrap()
        .iter()
        .map(|c| c.member_count)
        .sum();
    assert_eq!(members, 300);

    let selected = table.select(&store, &ids).unwrap();
    for (id, v) in ids.iter().zip(&vectors) {
        assert_eq!(&selected[id], v);
    }
}

#[test]
fn test_rebalance_converges_on_separated_clusters() {
    let (table, store) = setup("separated", 2, 2);
    // Two rays pointing in opposite directions; magnitudes vary, directions do not
    let mut vectors = Vec::new();
    for s in 1..=50 {
        let s = s as f64;
        vectors.push(Vector::new(vec![s, 0.2 * s]));
        vectors.push(Vector::new(vec![-s, -0.2 * s]));
    }
    let ids = table.upsert_batch(&store, &vectors).unwrap();

    let report = table.rebalance(&store).unwrap();
    assert!(report.converged);
    assert!(report.iterations <= table.config().max_rebalance_iterations);

    let centroids = table.centroids(&store).unwrap();
    let mut counts: Vec<u64> = centroids.iter().map(|c| c.member_count).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![50, 50]);
    for centroid in &centroids {
        let v = centroid.values.as_slice();
        assert_relative_eq!(v[1], 0.2 * v[0], epsilon = 1e-9);
    }

    // A converged pass leaves every row in its nearest centroid
    let again = table.rebalance(&store).unwrap();
    assert!(again.converged);
    assert_eq!(again.reassigned, 0);
    assert_eq!(table.centroids(&store).unwrap(), centroids);

    let results = table
        .search(&store, &Vector::new(vec![-1.0, -0.2]), 1)
        .unwrap();
    assert_eq!(ids.iter().position(|id| *id == results[0].id).unwrap() % 2, 1);
    assert_relative_eq!(results[0].similarity, 1.0, epsilon = 1e-9);
}

#[test]
fn test_centroid_write_rejects_stale_version() {
    let (table, store) = setup("conflict", 2, 2);
    table.upsert(&store, &Vector::new(vec![1.0, 0.0]), None).unwrap();

    let err = store
        .execute_in_transaction(|txn| {
            let meta = txn.get_meta(table.values_table_name())?.unwrap();
            let centroids = vec![vec![0u8; 16], vec![0u8; 16]];
            txn.set_centroids(table.values_table_name(), centroids.clone(), meta.centroid_version)?;
            // A second writer holding the old version loses
            txn.set_centroids(table.values_table_name(), centroids, meta.centroid_version)
        })
        .unwrap_err();
    assert!(matches!(err, VectorTableError::ConcurrencyConflict { .. }));
    assert_eq!(table.count(&store).unwrap(), 1);
}

#[test]
fn test_tables_are_independent() {
    let store = MemoryStore::new();
    let a = VectorTable::new("a", 2, 2).unwrap();
    let b = VectorTable::new("b", 3, 2).unwrap();
    a.initialize(&store).unwrap();
    b.initialize(&store).unwrap();

    a.upsert(&store, &Vector::new(vec![1.0, 0.0]), None).unwrap();
    assert_eq!(a.count(&store).unwrap(), 1);
    assert_eq!(b.count(&store).unwrap(), 0);

    let names = store.table_names().unwrap();
    for expected in [
        "vector_values_a",
        "vector_meta_a",
        "centroids_vector_values_a",
        "centroids_vector_meta_a",
        "vector_values_b",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {}", expected);
    }
}

#[test]
fn test_concurrent_upserts() {
    let (table, store) = setup("threads", 4, 3);

    let ids: Vec<u64> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let (table, store) = (&table, &store);
                s.spawn(move || {
                    (0..25)
                        .map(|i| {
                            let v = Vector::new(vec![t as f64, i as f64, 1.0, -1.0]);
                            table.upsert(store, &v, None).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    let mut unique = ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 100);
    assert_eq!(table.count(&store).unwrap(), 100);
}
