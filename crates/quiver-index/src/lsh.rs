//! Random-hyperplane LSH index for cosine similarity.
//!
//! Each of `T` tables holds `R` random hyperplanes. A vector's signature in
//! a table is the sign pattern of its dot products with that table's planes,
//! packed into a `u64` (hence R ≤ 64). Search unions the query's buckets
//! across tables into a candidate set and re-ranks candidates by exact
//! cosine. An empty union falls back to a full scan of the stored vectors,
//! so search never comes back empty while the index holds data.
//!
//! Approximate: recall grows with `T`, and with `R` near log₂(n). The
//! hyperplane generator is seeded, so builds are reproducible.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use quiver_core::{CoreError, CoreResult, IndexType, RecordId};

use crate::index::{SearchOutput, VectorIndex};
use crate::math::{cosine_similarity, dot, normalized, TopK};

/// Construction parameters for [`LshIndex`].
#[derive(Debug, Clone, Copy)]
pub struct LshConfig {
    /// Random hyperplanes per table (R). Signature bits, max 64.
    pub planes: usize,
    /// Independent tables (T). More tables, better recall.
    pub tables: usize,
    /// Seed for the hyperplane generator.
    pub seed: u64,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            planes: 16,
            tables: 4,
            seed: 42,
        }
    }
}

struct Table {
    planes: Vec<Vec<f32>>,
    buckets: HashMap<u64, Vec<RecordId>>,
}

impl Table {
    fn signature(&self, vector: &[f32]) -> u64 {
        let mut signature = 0u64;
        for (bit, plane) in self.planes.iter().enumerate() {
            if dot(vector, plane) >= 0.0 {
                signature |= 1 << bit;
            }
        }
        signature
    }
}

/// Approximate cosine index over random-hyperplane signatures.
pub struct LshIndex {
    dim: usize,
    config: LshConfig,
    tables: Vec<Table>,
    vectors: HashMap<RecordId, Vec<f32>>,
}

/// One standard-normal sample via the Box–Muller transform.
fn sample_standard_normal(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

impl LshIndex {
    /// Creates an empty index, sampling all `T × R` hyperplanes up front
    /// from the seeded generator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when `planes` is outside [1, 64] or
    /// `tables` is zero.
    pub fn new(dim: usize, config: LshConfig) -> CoreResult<Self> {
        if config.planes == 0 || config.planes > 64 {
            return Err(CoreError::invalid_argument(
                "lsh planes must be in [1, 64]",
            ));
        }
        if config.tables == 0 {
            return Err(CoreError::invalid_argument("lsh tables must be > 0"));
        }
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut tables = Vec::with_capacity(config.tables);
        for _ in 0..config.tables {
            let mut planes = Vec::with_capacity(config.planes);
            while planes.len() < config.planes {
                let raw: Vec<f32> = (0..dim).map(|_| sample_standard_normal(&mut rng)).collect();
                // A zero draw is vanishingly unlikely; redraw keeps the
                // plane count deterministic per seed anyway.
                if let Some(plane) = normalized(&raw) {
                    planes.push(plane);
                }
            }
            tables.push(Table {
                planes,
                buckets: HashMap::new(),
            });
        }
        Ok(Self {
            dim,
            config,
            tables,
            vectors: HashMap::new(),
        })
    }

    /// The configured parameters, e.g. for status reporting.
    #[must_use]
    pub fn config(&self) -> LshConfig {
        self.config
    }

    fn check_dimension(&self, vector: &[f32]) -> CoreResult<()> {
        if vector.len() != self.dim {
            return Err(CoreError::dimension_mismatch(self.dim, vector.len()));
        }
        Ok(())
    }

    fn add_to_buckets(&mut self, id: RecordId, vector: &[f32]) {
        for table in &mut self.tables {
            let signature = table.signature(vector);
            table.buckets.entry(signature).or_default().push(id);
        }
    }

    fn drop_from_buckets(&mut self, id: RecordId, vector: &[f32]) {
        for table in &mut self.tables {
            let signature = table.signature(vector);
            if let Some(bucket) = table.buckets.get_mut(&signature) {
                bucket.retain(|member| *member != id);
                if bucket.is_empty() {
                    table.buckets.remove(&signature);
                }
            }
        }
    }
}

impl VectorIndex for LshIndex {
    fn kind(&self) -> IndexType {
        IndexType::Lsh
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn build(&mut self, entries: Vec<(RecordId, Vec<f32>)>) -> CoreResult<()> {
        for (_, vector) in &entries {
            self.check_dimension(vector)?;
        }
        self.vectors.clear();
        for table in &mut self.tables {
            table.buckets.clear();
        }
        for (id, vector) in entries {
            self.add_to_buckets(id, &vector);
            self.vectors.insert(id, vector);
        }
        Ok(())
    }

    fn insert(&mut self, id: RecordId, vector: Vec<f32>) -> CoreResult<()> {
        self.check_dimension(&vector)?;
        if self.vectors.contains_key(&id) {
            return Err(CoreError::already_exists("record", id));
        }
        self.add_to_buckets(id, &vector);
        self.vectors.insert(id, vector);
        Ok(())
    }

    fn remove(&mut self, id: RecordId) -> bool {
        let Some(vector) = self.vectors.remove(&id) else {
            return false;
        };
        self.drop_from_buckets(id, &vector);
        true
    }

    fn update(&mut self, id: RecordId, vector: Vec<f32>) -> CoreResult<bool> {
        self.check_dimension(&vector)?;
        if !self.remove(id) {
            return Ok(false);
        }
        self.add_to_buckets(id, &vector);
        self.vectors.insert(id, vector);
        Ok(true)
    }

    fn search(&self, query: &[f32], k: usize) -> CoreResult<SearchOutput> {
        self.check_dimension(query)?;
        if self.vectors.is_empty() {
            return Ok(SearchOutput::empty());
        }

        let mut candidates: HashSet<RecordId> = HashSet::new();
        for table in &self.tables {
            if let Some(bucket) = table.buckets.get(&table.signature(query)) {
                candidates.extend(bucket.iter().copied());
            }
        }
        if candidates.is_empty() {
            // No bucket matched in any table; fall back to scanning the
            // whole store rather than returning nothing.
            debug!(size = self.vectors.len(), "lsh buckets empty, full scan");
            candidates.extend(self.vectors.keys().copied());
        }

        let considered = candidates.len();
        let mut topk = TopK::new(k);
        for id in candidates {
            let vector = &self.vectors[&id];
            topk.push(id, cosine_similarity(query, vector));
        }
        Ok(SearchOutput {
            neighbors: topk.into_sorted_vec(),
            considered,
        })
    }

    fn size(&self) -> usize {
        self.vectors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::l2_norm;
    use uuid::Uuid;

    fn id(n: u128) -> RecordId {
        RecordId::from_uuid(Uuid::from_u128(n))
    }

    fn unit(v: &[f32]) -> Vec<f32> {
        normalized(v).expect("non-zero vector")
    }

    #[test]
    fn planes_are_unit_normalized_and_seed_deterministic() {
        let a = LshIndex::new(8, LshConfig::default()).unwrap();
        let b = LshIndex::new(8, LshConfig::default()).unwrap();
        assert_eq!(a.config().planes, 16);
        assert_eq!(a.config().tables, 4);
        for (ta, tb) in a.tables.iter().zip(b.tables.iter()) {
            for (pa, pb) in ta.planes.iter().zip(tb.planes.iter()) {
                assert!((l2_norm(pa) - 1.0).abs() < 1e-5);
                assert_eq!(pa, pb);
            }
        }

        let c = LshIndex::new(8, LshConfig { seed: 7, ..LshConfig::default() }).unwrap();
        assert_ne!(a.tables[0].planes[0], c.tables[0].planes[0]);
    }

    #[test]
    fn exact_match_is_always_found() {
        let mut index = LshIndex::new(4, LshConfig::default()).unwrap();
        let target = unit(&[0.2, -0.4, 0.8, 0.1]);
        index.insert(id(1), target.clone()).unwrap();
        index.insert(id(2), unit(&[-0.9, 0.1, 0.0, 0.3])).unwrap();

        let out = index.search(&target, 1).unwrap();
        assert_eq!(out.neighbors[0].id, id(1));
        assert!((out.neighbors[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn never_empty_while_populated() {
        // Whether the query hits its bucket or falls back to the scan,
        // search must surface results while the index holds data.
        let config = LshConfig {
            planes: 1,
            tables: 1,
            seed: 3,
        };
        let mut index = LshIndex::new(2, config).unwrap();
        index.insert(id(1), unit(&[1.0, 0.0])).unwrap();
        index.insert(id(2), unit(&[-1.0, 0.0])).unwrap();

        for query in [unit(&[1.0, 0.0]), unit(&[-1.0, 0.0])] {
            let out = index.search(&query, 1).unwrap();
            assert_eq!(out.neighbors.len(), 1);
        }
    }

    #[test]
    fn remove_then_search_excludes_the_id() {
        let mut index = LshIndex::new(3, LshConfig::default()).unwrap();
        index.insert(id(1), unit(&[1.0, 0.0, 0.0])).unwrap();
        index.insert(id(2), unit(&[0.9, 0.1, 0.0])).unwrap();

        assert!(index.remove(id(1)));
        assert!(!index.remove(id(1)));
        assert_eq!(index.size(), 1);

        let out = index.search(&unit(&[1.0, 0.0, 0.0]), 2).unwrap();
        assert_eq!(out.neighbors.len(), 1);
        assert_eq!(out.neighbors[0].id, id(2));
    }

    #[test]
    fn update_rehashes_the_vector() {
        let mut index = LshIndex::new(2, LshConfig::default()).unwrap();
        index.insert(id(1), unit(&[1.0, 0.0])).unwrap();
        assert!(index.update(id(1), unit(&[0.0, 1.0])).unwrap());
        assert!(!index.update(id(9), unit(&[0.0, 1.0])).unwrap());

        let out = index.search(&unit(&[0.0, 1.0]), 1).unwrap();
        assert_eq!(out.neighbors[0].id, id(1));
        assert!((out.neighbors[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_index_search_is_empty_not_error() {
        let index = LshIndex::new(2, LshConfig::default()).unwrap();
        let out = index.search(&[1.0, 0.0], 5).unwrap();
        assert!(out.neighbors.is_empty());
        assert_eq!(out.considered, 0);
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        assert!(LshIndex::new(2, LshConfig { planes: 0, ..LshConfig::default() }).is_err());
        assert!(LshIndex::new(2, LshConfig { planes: 65, ..LshConfig::default() }).is_err());
        assert!(LshIndex::new(2, LshConfig { tables: 0, ..LshConfig::default() }).is_err());
    }
}
