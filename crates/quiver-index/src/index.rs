//! The `VectorIndex` contract shared by the three index families.

use quiver_core::config::IndexSettings;
use quiver_core::{CoreError, CoreResult, IndexType, RecordId};

use crate::flat::FlatIndex;
use crate::kd_tree::{KdTreeConfig, KdTreeIndex};
use crate::lsh::{LshConfig, LshIndex};
use crate::math::Neighbor;

/// Result of a single index search.
#[derive(Debug, Clone)]
pub struct SearchOutput {
    /// Up to k neighbors, sorted by descending cosine similarity with ties
    /// broken by ascending id.
    pub neighbors: Vec<Neighbor>,
    /// Number of candidates actually scored: the full size for exact scans,
    /// the candidate-set size for LSH.
    pub considered: usize,
}

impl SearchOutput {
    /// An empty result with nothing considered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            neighbors: Vec::new(),
            considered: 0,
        }
    }
}

/// Contract implemented by every index family.
///
/// Instances live inside a collection's reader-writer lock; mutation takes
/// `&mut self` and search takes `&self`, matching that lock discipline.
/// All vectors are expected unit-normalized; only their length is checked.
pub trait VectorIndex: Send + Sync {
    /// The index family of this instance.
    fn kind(&self) -> IndexType;

    /// The vector dimension this index was created with.
    fn dimension(&self) -> usize;

    /// Replaces any prior content with the given entries. Deterministic for
    /// a fixed input and construction parameters.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` when any entry has the wrong length.
    fn build(&mut self, entries: Vec<(RecordId, Vec<f32>)>) -> CoreResult<()>;

    /// Inserts a single vector; a subsequent `search` sees it.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` on wrong length, `AlreadyExists` when the
    /// id is already indexed.
    fn insert(&mut self, id: RecordId, vector: Vec<f32>) -> CoreResult<()>;

    /// Removes a vector; a subsequent `search` excludes it. Returns whether
    /// the id was present.
    fn remove(&mut self, id: RecordId) -> bool;

    /// Replaces the vector stored under `id`. Semantically `remove` followed
    /// by `insert`. Returns whether the id was present.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` on wrong length.
    fn update(&mut self, id: RecordId, vector: Vec<f32>) -> CoreResult<bool>;

    /// Finds up to `k` nearest neighbors of `query` by cosine similarity.
    /// An empty index yields an empty result, not an error.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` when the query has the wrong length.
    fn search(&self, query: &[f32], k: usize) -> CoreResult<SearchOutput>;

    /// Number of records currently indexed.
    fn size(&self) -> usize;
}

/// Per-build overrides for index construction parameters. Unset fields fall
/// back to the engine's [`IndexSettings`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexParams {
    /// KD-tree leaf bucket capacity.
    pub kd_leaf_capacity: Option<usize>,
    /// Random hyperplanes per LSH table (R, max 64).
    pub lsh_planes: Option<usize>,
    /// Independent LSH tables (T).
    pub lsh_tables: Option<usize>,
    /// Seed for the LSH hyperplane generator.
    pub lsh_seed: Option<u64>,
}

/// Constructs an empty index of the requested family.
///
/// # Errors
///
/// Returns `InvalidArgument` when resolved parameters are out of range.
pub fn build_index(
    kind: IndexType,
    dimension: usize,
    params: &IndexParams,
    defaults: &IndexSettings,
) -> CoreResult<Box<dyn VectorIndex>> {
    if dimension == 0 {
        return Err(CoreError::invalid_argument("index dimension must be > 0"));
    }
    match kind {
        IndexType::Flat => Ok(Box::new(FlatIndex::new(dimension))),
        IndexType::KdTree => {
            let config = KdTreeConfig {
                leaf_capacity: params.kd_leaf_capacity.unwrap_or(defaults.kd_leaf_capacity),
                rebuild_percent: defaults.kd_rebuild_percent,
            };
            Ok(Box::new(KdTreeIndex::new(dimension, config)?))
        }
        IndexType::Lsh => {
            let config = LshConfig {
                planes: params.lsh_planes.unwrap_or(defaults.lsh_planes),
                tables: params.lsh_tables.unwrap_or(defaults.lsh_tables),
                seed: params.lsh_seed.unwrap_or(defaults.lsh_seed),
            };
            Ok(Box::new(LshIndex::new(dimension, config)?))
        }
    }
}
