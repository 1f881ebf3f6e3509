//! Flat (exact linear scan) index implementation.
//!
//! Exhaustively compares the query against all indexed vectors. It serves as:
//! - The correctness reference for the tree and hash families
//! - The execution engine for filtered and fallback scans
//! - A viable choice for small collections
//!
//! Time complexity: O(n·d) per search; space O(n·d).

use std::collections::HashMap;

use quiver_core::{CoreError, CoreResult, IndexType, RecordId};

use crate::index::{SearchOutput, VectorIndex};
use crate::math::{cosine_similarity, TopK};

/// Exact linear-scan index backed by parallel arrays.
///
/// Vectors and ids share positions; an `id → position` map makes removal an
/// O(1) swap with the last slot.
pub struct FlatIndex {
    dim: usize,
    ids: Vec<RecordId>,
    vectors: Vec<Vec<f32>>,
    positions: HashMap<RecordId, usize>,
}

impl FlatIndex {
    /// Creates an empty index committed to the given dimension.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ids: Vec::new(),
            vectors: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> CoreResult<()> {
        if vector.len() != self.dim {
            return Err(CoreError::dimension_mismatch(self.dim, vector.len()));
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn kind(&self) -> IndexType {
        IndexType::Flat
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn build(&mut self, entries: Vec<(RecordId, Vec<f32>)>) -> CoreResult<()> {
        for (_, vector) in &entries {
            self.check_dimension(vector)?;
        }
        self.ids.clear();
        self.vectors.clear();
        self.positions.clear();
        for (id, vector) in entries {
            self.positions.insert(id, self.ids.len());
            self.ids.push(id);
            self.vectors.push(vector);
        }
        Ok(())
    }

    fn insert(&mut self, id: RecordId, vector: Vec<f32>) -> CoreResult<()> {
        self.check_dimension(&vector)?;
        if self.positions.contains_key(&id) {
            return Err(CoreError::already_exists("record", id));
        }
        self.positions.insert(id, self.ids.len());
        self.ids.push(id);
        self.vectors.push(vector);
        Ok(())
    }

    fn remove(&mut self, id: RecordId) -> bool {
        let Some(pos) = self.positions.remove(&id) else {
            return false;
        };
        let last = self.ids.len() - 1;
        self.ids.swap_remove(pos);
        self.vectors.swap_remove(pos);
        if pos != last {
            self.positions.insert(self.ids[pos], pos);
        }
        true
    }

    fn update(&mut self, id: RecordId, vector: Vec<f32>) -> CoreResult<bool> {
        self.check_dimension(&vector)?;
        match self.positions.get(&id) {
            Some(&pos) => {
                self.vectors[pos] = vector;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn search(&self, query: &[f32], k: usize) -> CoreResult<SearchOutput> {
        self.check_dimension(query)?;
        let mut topk = TopK::new(k);
        for (id, vector) in self.ids.iter().zip(self.vectors.iter()) {
            topk.push(*id, cosine_similarity(query, vector));
        }
        Ok(SearchOutput {
            neighbors: topk.into_sorted_vec(),
            considered: self.ids.len(),
        })
    }

    fn size(&self) -> usize {
        self.ids.len()
    }
}
