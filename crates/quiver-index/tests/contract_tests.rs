//! Contract tests for the `VectorIndex` trait.
//!
//! Every index family must honor the same observable behavior: dimension
//! enforcement, post-insert visibility, post-remove exclusion, descending
//! result order, and graceful empty-index search.

use quiver_core::config::IndexSettings;
use quiver_core::{CoreError, IndexType, RecordId};
use quiver_index::{build_index, IndexParams, VectorIndex};
use uuid::Uuid;

fn id(n: u128) -> RecordId {
    RecordId::from_uuid(Uuid::from_u128(n))
}

fn unit(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

/// Helper to create one index of each family with the given dimension.
fn create_indexes(dimension: usize) -> Vec<Box<dyn VectorIndex>> {
    let defaults = IndexSettings::default();
    let params = IndexParams::default();
    [IndexType::Flat, IndexType::KdTree, IndexType::Lsh]
        .into_iter()
        .map(|kind| build_index(kind, dimension, &params, &defaults).expect("factory failed"))
        .collect()
}

#[test]
fn contract_empty_index_search_is_empty() {
    for index in create_indexes(3) {
        let out = index
            .search(&[1.0, 0.0, 0.0], 10)
            .unwrap_or_else(|e| panic!("{}: empty search failed: {e}", index.kind().as_str()));
        assert!(
            out.neighbors.is_empty(),
            "{}: empty index returned results",
            index.kind().as_str()
        );
    }
}

#[test]
fn contract_rejects_dimension_mismatch() {
    for mut index in create_indexes(3) {
        let name = index.kind().as_str();
        assert!(
            matches!(
                index.insert(id(1), vec![1.0, 0.0]),
                Err(CoreError::DimensionMismatch { expected: 3, actual: 2 })
            ),
            "{name}: insert accepted a short vector"
        );
        assert!(
            index.build(vec![(id(1), vec![1.0, 0.0])]).is_err(),
            "{name}: build accepted a short vector"
        );
        assert!(
            index.search(&[1.0, 0.0], 1).is_err(),
            "{name}: search accepted a short query"
        );
        assert_eq!(index.size(), 0, "{name}: failed input mutated the index");
    }
}

#[test]
fn contract_insert_is_immediately_visible() {
    for mut index in create_indexes(3) {
        let name = index.kind().as_str();
        index.insert(id(1), unit(&[1.0, 0.0, 0.0])).unwrap();
        index.insert(id(2), unit(&[0.0, 1.0, 0.0])).unwrap();
        assert_eq!(index.size(), 2, "{name}: size after inserts");

        let out = index.search(&unit(&[1.0, 0.0, 0.0]), 1).unwrap();
        assert_eq!(out.neighbors.len(), 1, "{name}: no result after insert");
        assert_eq!(out.neighbors[0].id, id(1), "{name}: wrong nearest");
    }
}

#[test]
fn contract_duplicate_insert_errors() {
    for mut index in create_indexes(2) {
        let name = index.kind().as_str();
        index.insert(id(1), unit(&[1.0, 0.0])).unwrap();
        assert!(
            matches!(
                index.insert(id(1), unit(&[0.0, 1.0])),
                Err(CoreError::AlreadyExists { .. })
            ),
            "{name}: duplicate insert did not error"
        );
        assert_eq!(index.size(), 1, "{name}: duplicate insert changed size");
    }
}

#[test]
fn contract_remove_excludes_and_reports_presence() {
    for mut index in create_indexes(2) {
        let name = index.kind().as_str();
        index.insert(id(1), unit(&[1.0, 0.0])).unwrap();
        index.insert(id(2), unit(&[0.0, 1.0])).unwrap();

        assert!(index.remove(id(1)), "{name}: remove missed present id");
        assert!(!index.remove(id(1)), "{name}: double remove reported found");
        assert_eq!(index.size(), 1, "{name}: size after remove");

        let out = index.search(&unit(&[1.0, 0.0]), 2).unwrap();
        assert!(
            out.neighbors.iter().all(|n| n.id != id(1)),
            "{name}: removed id still searchable"
        );
    }
}

#[test]
fn contract_update_is_remove_then_insert() {
    for mut index in create_indexes(2) {
        let name = index.kind().as_str();
        index.insert(id(1), unit(&[1.0, 0.0])).unwrap();

        assert!(index.update(id(1), unit(&[0.0, 1.0])).unwrap());
        assert!(
            !index.update(id(9), unit(&[0.0, 1.0])).unwrap(),
            "{name}: update invented a record"
        );
        assert_eq!(index.size(), 1, "{name}: size after update");

        let out = index.search(&unit(&[0.0, 1.0]), 1).unwrap();
        assert_eq!(out.neighbors[0].id, id(1), "{name}: updated vector lost");
        assert!(
            (out.neighbors[0].score - 1.0).abs() < 1e-5,
            "{name}: updated vector score off"
        );
    }
}

#[test]
fn contract_insert_all_then_remove_all_empties() {
    for mut index in create_indexes(4) {
        let name = index.kind().as_str();
        for i in 0..20u128 {
            let angle = i as f32 * 0.3;
            index
                .insert(
                    id(i + 1),
                    unit(&[angle.cos(), angle.sin(), 0.5, -0.25]),
                )
                .unwrap();
        }
        for i in 0..20u128 {
            assert!(index.remove(id(i + 1)), "{name}: remove of id {i} missed");
        }
        assert_eq!(index.size(), 0, "{name}: size after removing everything");

        let out = index.search(&unit(&[1.0, 0.0, 0.0, 0.0]), 5).unwrap();
        assert!(out.neighbors.is_empty(), "{name}: drained index returned hits");
    }
}

#[test]
fn contract_exact_results_sorted_descending_with_id_tiebreak() {
    // Exact families only: the LSH candidate set legitimately excludes
    // records whose signatures miss the query's buckets.
    for kind in [IndexType::Flat, IndexType::KdTree] {
        let mut index =
            build_index(kind, 3, &IndexParams::default(), &IndexSettings::default()).unwrap();
        let name = kind.as_str();
        // Two exact ties at cosine 0 relative to the query, plus one match.
        index.insert(id(3), unit(&[0.0, 1.0, 0.0])).unwrap();
        index.insert(id(2), unit(&[0.0, 1.0, 0.0])).unwrap();
        index.insert(id(1), unit(&[1.0, 0.0, 0.0])).unwrap();

        let out = index.search(&unit(&[1.0, 0.0, 0.0]), 3).unwrap();
        assert_eq!(out.neighbors.len(), 3, "{name}");
        assert_eq!(out.neighbors[0].id, id(1), "{name}: best hit wrong");
        assert!(
            out.neighbors
                .windows(2)
                .all(|w| w[0].score >= w[1].score),
            "{name}: scores not descending"
        );
        assert_eq!(out.neighbors[1].id, id(2), "{name}: tie-break not by id");
        assert_eq!(out.neighbors[2].id, id(3), "{name}: tie-break not by id");
    }
}

#[test]
fn contract_lsh_falls_back_to_full_scan_on_bucket_miss() {
    // A single hyperplane splits the space in two. The only stored vector
    // sits on the opposite side of the query, so no bucket matches and the
    // documented fallback scan must surface it anyway.
    let params = IndexParams {
        lsh_planes: Some(1),
        lsh_tables: Some(1),
        ..IndexParams::default()
    };
    let mut index =
        build_index(IndexType::Lsh, 2, &params, &IndexSettings::default()).unwrap();
    index.insert(id(1), unit(&[-1.0, 0.0])).unwrap();

    let out = index.search(&unit(&[1.0, 0.0]), 1).unwrap();
    assert_eq!(out.neighbors.len(), 1);
    assert_eq!(out.neighbors[0].id, id(1));
    assert!((out.neighbors[0].score + 1.0).abs() < 1e-6);
    assert_eq!(out.considered, 1);
}

#[test]
fn contract_lsh_ties_break_by_id_within_a_bucket() {
    let mut index =
        build_index(IndexType::Lsh, 3, &IndexParams::default(), &IndexSettings::default())
            .unwrap();
    // Identical vectors share every signature, so all three are candidates.
    let v = unit(&[1.0, 0.0, 0.0]);
    index.insert(id(3), v.clone()).unwrap();
    index.insert(id(1), v.clone()).unwrap();
    index.insert(id(2), v.clone()).unwrap();

    let out = index.search(&v, 3).unwrap();
    assert_eq!(out.neighbors.len(), 3);
    assert_eq!(out.neighbors[0].id, id(1));
    assert_eq!(out.neighbors[1].id, id(2));
    assert_eq!(out.neighbors[2].id, id(3));
}

#[test]
fn contract_build_replaces_prior_content() {
    for mut index in create_indexes(2) {
        let name = index.kind().as_str();
        index.insert(id(1), unit(&[1.0, 0.0])).unwrap();
        index
            .build(vec![
                (id(2), unit(&[0.0, 1.0])),
                (id(3), unit(&[1.0, 1.0])),
            ])
            .unwrap();
        assert_eq!(index.size(), 2, "{name}: build did not replace");
        assert!(!index.remove(id(1)), "{name}: stale id survived build");
    }
}

#[test]
fn contract_exact_k_larger_than_size_returns_everything() {
    for kind in [IndexType::Flat, IndexType::KdTree] {
        let mut index =
            build_index(kind, 2, &IndexParams::default(), &IndexSettings::default()).unwrap();
        let name = kind.as_str();
        for i in 0..5u128 {
            let angle = i as f32 * 0.5;
            index.insert(id(i + 1), unit(&[angle.cos(), angle.sin()])).unwrap();
        }
        let out = index.search(&unit(&[1.0, 0.0]), 50).unwrap();
        assert_eq!(out.neighbors.len(), 5, "{name}: k > n dropped results");
    }
}
