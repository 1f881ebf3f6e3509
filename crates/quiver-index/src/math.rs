//! Vector math primitives shared by the index family.
//!
//! All embeddings are stored unit-normalized, so cosine similarity reduces
//! to a dot product and squared L2 relates to cosine by `d² = 2 − 2·cos`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use quiver_core::RecordId;

/// Computes the dot product between two equal-length vectors.
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Computes the L2 norm of a vector.
#[must_use]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Computes the squared Euclidean distance between two equal-length vectors.
#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Cosine similarity of two unit-normalized vectors.
///
/// On unit vectors this is exactly the dot product, range [-1, 1].
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    dot(a, b)
}

/// Converts squared L2 distance between unit vectors to cosine similarity
/// via the identity `cos = 1 − d²/2`.
#[must_use]
pub fn cosine_from_squared_l2(d2: f32) -> f32 {
    1.0 - d2 / 2.0
}

/// Returns the unit-normalized copy of `v`, or `None` for zero vectors.
#[must_use]
pub fn normalized(v: &[f32]) -> Option<Vec<f32>> {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

/// A single scored kNN result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Record the score belongs to.
    pub id: RecordId,
    /// Cosine similarity to the query, higher is more similar.
    pub score: f32,
}

/// Heap entry ordered by "better result": higher score first, ties broken
/// by ascending id so rankings are deterministic.
#[derive(Debug, Clone, Copy)]
struct Entry(Neighbor);

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

/// Bounded top-k container for kNN results.
///
/// Keeps the k best neighbors seen so far, ordered by descending cosine
/// similarity with ties broken by ascending id. Internally a min-heap of
/// size k: the root is the current worst, so each push is O(log k).
#[derive(Debug)]
pub struct TopK {
    k: usize,
    heap: BinaryHeap<std::cmp::Reverse<Entry>>,
}

impl TopK {
    /// Creates a container retaining the best `k` results.
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1)),
        }
    }

    /// Offers a candidate; it is kept only if it beats the current k-th best.
    pub fn push(&mut self, id: RecordId, score: f32) {
        if self.k == 0 {
            return;
        }
        let entry = Entry(Neighbor { id, score });
        if self.heap.len() < self.k {
            self.heap.push(std::cmp::Reverse(entry));
            return;
        }
        if let Some(worst) = self.heap.peek() {
            if entry > worst.0 {
                self.heap.pop();
                self.heap.push(std::cmp::Reverse(entry));
            }
        }
    }

    /// Number of neighbors currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true when no neighbors are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns true once k results are held; further pushes must beat the
    /// current worst to be kept.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Score of the current k-th best result, if the container is full.
    /// Used by tree search for bounding-box pruning.
    #[must_use]
    pub fn worst_score(&self) -> Option<f32> {
        if self.is_full() {
            self.heap.peek().map(|e| e.0 .0.score)
        } else {
            None
        }
    }

    /// Consumes the container, returning neighbors best-first.
    #[must_use]
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        let mut entries: Vec<Entry> = self.heap.into_iter().map(|r| r.0).collect();
        entries.sort_unstable_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.0).collect()
    }
}
