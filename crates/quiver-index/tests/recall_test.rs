//! Regression test pinning LSH recall against the flat ground truth.
//!
//! The dataset is synthetic but fixed: clustered unit vectors from a seeded
//! generator, the shape approximate indexes are actually used on. The bound
//! is an empirical regression floor for these exact seeds and parameters,
//! not a theoretical guarantee.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quiver_core::RecordId;
use quiver_index::{FlatIndex, LshConfig, LshIndex, VectorIndex};
use uuid::Uuid;

fn id(n: u128) -> RecordId {
    RecordId::from_uuid(Uuid::from_u128(n))
}

fn unit(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

/// Clustered dataset: `clusters` random centers, `per_cluster` members each,
/// perturbed by small gaussian noise and re-normalized.
fn clustered_dataset(
    rng: &mut StdRng,
    dim: usize,
    clusters: usize,
    per_cluster: usize,
    noise: f32,
) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let centers: Vec<Vec<f32>> = (0..clusters)
        .map(|_| unit(&(0..dim).map(|_| gaussian(rng)).collect::<Vec<_>>()))
        .collect();
    let mut points = Vec::with_capacity(clusters * per_cluster);
    for center in &centers {
        for _ in 0..per_cluster {
            let noisy: Vec<f32> = center.iter().map(|c| c + noise * gaussian(rng)).collect();
            points.push(unit(&noisy));
        }
    }
    (points, centers)
}

fn recall_at_k(truth: &[RecordId], approx: &[RecordId], k: usize) -> f64 {
    let truth_set: HashSet<_> = truth.iter().take(k).collect();
    let found = approx.iter().take(k).filter(|id| truth_set.contains(id)).count();
    found as f64 / k.min(truth.len()) as f64
}

#[test]
fn lsh_recall_on_clustered_data_stays_above_floor() {
    let dim = 16;
    let k = 10;
    let mut rng = StdRng::seed_from_u64(7);
    let (points, centers) = clustered_dataset(&mut rng, dim, 40, 12, 0.05);

    let entries: Vec<_> = points
        .iter()
        .enumerate()
        .map(|(i, v)| (id(i as u128 + 1), v.clone()))
        .collect();

    let mut flat = FlatIndex::new(dim);
    flat.build(entries.clone()).unwrap();

    let config = LshConfig {
        planes: 8,
        tables: 6,
        seed: 42,
    };
    let mut lsh = LshIndex::new(dim, config).unwrap();
    lsh.build(entries).unwrap();

    // Query near each cluster center; true neighbors are cluster-mates at
    // small angles, which is where hyperplane hashing concentrates recall.
    let mut total_recall = 0.0;
    for center in &centers {
        let query: Vec<f32> = unit(
            &center
                .iter()
                .map(|c| c + 0.05 * gaussian(&mut rng))
                .collect::<Vec<_>>(),
        );

        let truth: Vec<_> = flat
            .search(&query, k)
            .unwrap()
            .neighbors
            .iter()
            .map(|n| n.id)
            .collect();
        let approx: Vec<_> = lsh
            .search(&query, k)
            .unwrap()
            .neighbors
            .iter()
            .map(|n| n.id)
            .collect();

        total_recall += recall_at_k(&truth, &approx, k);
    }
    let avg_recall = total_recall / centers.len() as f64;

    // Empirical floor for these seeds; observed recall sits well above it.
    assert!(
        avg_recall >= 0.7,
        "recall@{k} regressed: {avg_recall:.3} < 0.7"
    );
}

#[test]
fn lsh_candidate_count_is_reported() {
    let dim = 8;
    let mut rng = StdRng::seed_from_u64(11);
    let (points, _) = clustered_dataset(&mut rng, dim, 10, 10, 0.05);

    let entries: Vec<_> = points
        .iter()
        .enumerate()
        .map(|(i, v)| (id(i as u128 + 1), v.clone()))
        .collect();
    let mut lsh = LshIndex::new(dim, LshConfig::default()).unwrap();
    lsh.build(entries).unwrap();

    let out = lsh.search(&points[0], 5).unwrap();
    assert!(out.considered >= out.neighbors.len());
    assert!(out.considered <= points.len());
}
