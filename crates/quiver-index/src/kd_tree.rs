//! KD-tree index: exact kNN on squared L2 over unit vectors.
//!
//! On unit vectors, ranking by ascending squared L2 equals ranking by
//! descending cosine (`d² = 2 − 2·cos`), so the tree is exact for cosine.
//! Best suited to low dimensions; search degrades toward a linear scan as
//! dimensionality grows.
//!
//! Mutations do not touch the tree structure. Inserts and updates land in an
//! out-of-tree overflow list that search scans linearly; removals of tree
//! points leave tombstones. Once the combined churn passes a threshold
//! fraction of the tree size, the index compacts itself by rebuilding from
//! the live points.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use quiver_core::{CoreError, CoreResult, IndexType, RecordId};

use crate::index::{SearchOutput, VectorIndex};
use crate::math::{cosine_from_squared_l2, squared_l2, TopK};

/// Construction parameters for [`KdTreeIndex`].
#[derive(Debug, Clone, Copy)]
pub struct KdTreeConfig {
    /// Maximum points per leaf bucket.
    pub leaf_capacity: usize,
    /// Tombstone + overflow churn, as a percent of tree size, that triggers
    /// in-place compaction.
    pub rebuild_percent: usize,
}

impl Default for KdTreeConfig {
    fn default() -> Self {
        Self {
            leaf_capacity: 16,
            rebuild_percent: 25,
        }
    }
}

enum Node {
    Internal {
        axis: usize,
        split: f32,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        items: Vec<u32>,
    },
}

/// Exact space-partitioning tree with tombstone + overflow mutation.
pub struct KdTreeIndex {
    dim: usize,
    config: KdTreeConfig,
    /// Backing store for tree points, live and tombstoned alike. Leaf
    /// buckets index into this.
    points: Vec<(RecordId, Vec<f32>)>,
    tree_positions: HashMap<RecordId, u32>,
    root: Option<Node>,
    tombstones: HashSet<RecordId>,
    overflow: HashMap<RecordId, Vec<f32>>,
}

impl KdTreeIndex {
    /// Creates an empty tree committed to the given dimension.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the leaf capacity is zero.
    pub fn new(dim: usize, config: KdTreeConfig) -> CoreResult<Self> {
        if config.leaf_capacity == 0 {
            return Err(CoreError::invalid_argument(
                "kd-tree leaf capacity must be > 0",
            ));
        }
        Ok(Self {
            dim,
            config,
            points: Vec::new(),
            tree_positions: HashMap::new(),
            root: None,
            tombstones: HashSet::new(),
            overflow: HashMap::new(),
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> CoreResult<()> {
        if vector.len() != self.dim {
            return Err(CoreError::dimension_mismatch(self.dim, vector.len()));
        }
        Ok(())
    }

    fn contains(&self, id: RecordId) -> bool {
        self.overflow.contains_key(&id)
            || (self.tree_positions.contains_key(&id) && !self.tombstones.contains(&id))
    }

    /// Axis with the greatest variance among the given points. Splitting on
    /// the widest spread keeps the tree balanced on clustered data better
    /// than cycling axes.
    fn widest_axis(&self, items: &[u32]) -> usize {
        let mut sums = vec![0.0f64; self.dim];
        let mut squares = vec![0.0f64; self.dim];
        for &i in items {
            for (axis, x) in self.points[i as usize].1.iter().enumerate() {
                let x = f64::from(*x);
                sums[axis] += x;
                squares[axis] += x * x;
            }
        }
        let n = items.len() as f64;
        let mut best_axis = 0;
        let mut best_variance = f64::MIN;
        for axis in 0..self.dim {
            let mean = sums[axis] / n;
            let variance = squares[axis] / n - mean * mean;
            if variance > best_variance {
                best_variance = variance;
                best_axis = axis;
            }
        }
        best_axis
    }

    fn build_node(&self, mut items: Vec<u32>) -> Node {
        if items.len() <= self.config.leaf_capacity {
            return Node::Leaf { items };
        }
        let axis = self.widest_axis(&items);
        items.sort_unstable_by(|&a, &b| {
            self.points[a as usize].1[axis].total_cmp(&self.points[b as usize].1[axis])
        });
        let split = self.points[items[items.len() / 2] as usize].1[axis];
        // Points equal to the median go left.
        let cut = items.partition_point(|&i| self.points[i as usize].1[axis] <= split);
        if cut == items.len() {
            // Every point collapses onto one side of the split; there is no
            // axis that separates them, so an oversized leaf is correct.
            return Node::Leaf { items };
        }
        let right_items = items.split_off(cut);
        Node::Internal {
            axis,
            split,
            left: Box::new(self.build_node(items)),
            right: Box::new(self.build_node(right_items)),
        }
    }

    fn rebuild_from(&mut self, entries: Vec<(RecordId, Vec<f32>)>) {
        self.points = entries;
        self.tree_positions = self
            .points
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (*id, i as u32))
            .collect();
        self.tombstones.clear();
        self.overflow.clear();
        self.root = if self.points.is_empty() {
            None
        } else {
            Some(self.build_node((0..self.points.len() as u32).collect()))
        };
    }

    /// Compacts tombstones and overflow back into the tree once churn
    /// exceeds the configured fraction of tree size.
    fn maybe_compact(&mut self) {
        let tree_size = self.tree_positions.len();
        if tree_size == 0 {
            return;
        }
        let churn = self.tombstones.len() + self.overflow.len();
        if churn * 100 <= self.config.rebuild_percent * tree_size {
            return;
        }
        debug!(
            tree_size,
            churn, "kd-tree churn threshold passed, compacting"
        );
        let mut live: Vec<(RecordId, Vec<f32>)> = Vec::with_capacity(self.size());
        for (id, vector) in &self.points {
            if !self.tombstones.contains(id) {
                live.push((*id, vector.clone()));
            }
        }
        live.extend(self.overflow.drain());
        self.rebuild_from(live);
    }

    fn search_node(&self, node: &Node, query: &[f32], topk: &mut TopK, considered: &mut usize) {
        match node {
            Node::Leaf { items } => {
                for &i in items {
                    let (id, vector) = &self.points[i as usize];
                    if self.tombstones.contains(id) {
                        continue;
                    }
                    *considered += 1;
                    topk.push(*id, cosine_from_squared_l2(squared_l2(query, vector)));
                }
            }
            Node::Internal {
                axis,
                split,
                left,
                right,
            } => {
                let delta = query[*axis] - *split;
                let (near, far) = if delta <= 0.0 {
                    (left, right)
                } else {
                    (right, left)
                };
                self.search_node(near, query, topk, considered);
                // Backtrack across the split plane only if the k-th best
                // squared L2 could still improve there.
                let explore_far = match topk.worst_score() {
                    Some(worst) => delta * delta < 2.0 * (1.0 - worst),
                    None => true,
                };
                if explore_far {
                    self.search_node(far, query, topk, considered);
                }
            }
        }
    }
}

impl VectorIndex for KdTreeIndex {
    fn kind(&self) -> IndexType {
        IndexType::KdTree
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn build(&mut self, entries: Vec<(RecordId, Vec<f32>)>) -> CoreResult<()> {
        for (_, vector) in &entries {
            self.check_dimension(vector)?;
        }
        self.rebuild_from(entries);
        Ok(())
    }

    fn insert(&mut self, id: RecordId, vector: Vec<f32>) -> CoreResult<()> {
        self.check_dimension(&vector)?;
        if self.contains(id) {
            return Err(CoreError::already_exists("record", id));
        }
        self.overflow.insert(id, vector);
        self.maybe_compact();
        Ok(())
    }

    fn remove(&mut self, id: RecordId) -> bool {
        if self.overflow.remove(&id).is_some() {
            return true;
        }
        if self.tree_positions.contains_key(&id) && self.tombstones.insert(id) {
            self.maybe_compact();
            return true;
        }
        false
    }

    fn update(&mut self, id: RecordId, vector: Vec<f32>) -> CoreResult<bool> {
        self.check_dimension(&vector)?;
        if let Some(stored) = self.overflow.get_mut(&id) {
            *stored = vector;
            return Ok(true);
        }
        if self.tree_positions.contains_key(&id) && !self.tombstones.contains(&id) {
            self.tombstones.insert(id);
            self.overflow.insert(id, vector);
            self.maybe_compact();
            return Ok(true);
        }
        Ok(false)
    }

    fn search(&self, query: &[f32], k: usize) -> CoreResult<SearchOutput> {
        self.check_dimension(query)?;
        let mut topk = TopK::new(k);
        let mut considered = 0;
        if let Some(root) = &self.root {
            self.search_node(root, query, &mut topk, &mut considered);
        }
        for (id, vector) in &self.overflow {
            considered += 1;
            topk.push(*id, cosine_from_squared_l2(squared_l2(query, vector)));
        }
        Ok(SearchOutput {
            neighbors: topk.into_sorted_vec(),
            considered,
        })
    }

    fn size(&self) -> usize {
        self.tree_positions.len() - self.tombstones.len() + self.overflow.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::normalized;
    use uuid::Uuid;

    fn id(n: u128) -> RecordId {
        RecordId::from_uuid(Uuid::from_u128(n))
    }

    fn unit(v: &[f32]) -> Vec<f32> {
        normalized(v).expect("non-zero vector")
    }

    fn build_basis_tree() -> KdTreeIndex {
        let mut index = KdTreeIndex::new(3, KdTreeConfig::default()).unwrap();
        index
            .build(vec![
                (id(1), vec![1.0, 0.0, 0.0]),
                (id(2), vec![0.0, 1.0, 0.0]),
                (id(3), vec![0.0, 0.0, 1.0]),
            ])
            .unwrap();
        index
    }

    #[test]
    fn search_finds_exact_match_first() {
        let index = build_basis_tree();
        let out = index.search(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(out.neighbors[0].id, id(1));
        assert!((out.neighbors[0].score - 1.0).abs() < 1e-6);
        assert_eq!(out.neighbors.len(), 3);
    }

    #[test]
    fn scores_match_cosine_on_unit_vectors() {
        let index = build_basis_tree();
        let query = unit(&[0.9, 0.1, 0.0]);
        let out = index.search(&query, 3).unwrap();
        assert_eq!(out.neighbors[0].id, id(1));
        assert_eq!(out.neighbors[1].id, id(2));
        assert!(out.neighbors[0].score > out.neighbors[1].score);
        assert!((out.neighbors[2].score).abs() < 1e-6);
    }

    #[test]
    fn inserts_land_in_overflow_and_are_searchable() {
        let mut index = build_basis_tree();
        let vector = unit(&[0.5, 0.5, 0.0]);
        index.insert(id(4), vector.clone()).unwrap();
        assert_eq!(index.size(), 4);

        let out = index.search(&vector, 1).unwrap();
        assert_eq!(out.neighbors[0].id, id(4));
        assert!((out.neighbors[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn remove_tombstones_tree_points() {
        let mut index = build_basis_tree();
        assert!(index.remove(id(2)));
        assert!(!index.remove(id(2)));
        assert_eq!(index.size(), 2);

        let out = index.search(&[0.0, 1.0, 0.0], 3).unwrap();
        assert!(out.neighbors.iter().all(|n| n.id != id(2)));
    }

    #[test]
    fn update_moves_point_to_overflow() {
        let mut index = build_basis_tree();
        assert!(index.update(id(3), unit(&[1.0, 1.0, 0.0])).unwrap());
        assert_eq!(index.size(), 3);

        let out = index.search(&unit(&[1.0, 1.0, 0.0]), 1).unwrap();
        assert_eq!(out.neighbors[0].id, id(3));
    }

    #[test]
    fn churn_triggers_compaction() {
        let mut index = KdTreeIndex::new(
            2,
            KdTreeConfig {
                leaf_capacity: 2,
                rebuild_percent: 25,
            },
        )
        .unwrap();
        let entries: Vec<_> = (0..8)
            .map(|i| {
                let angle = i as f32 * 0.4;
                (id(i as u128 + 1), unit(&[angle.cos(), angle.sin()]))
            })
            .collect();
        index.build(entries).unwrap();

        // 8 tree points at 25%: the third churn event crosses the threshold.
        assert!(index.remove(id(1)));
        assert!(index.remove(id(2)));
        index.insert(id(100), unit(&[0.3, 0.7])).unwrap();
        assert!(index.overflow.is_empty());
        assert!(index.tombstones.is_empty());
        assert_eq!(index.size(), 7);

        let out = index.search(&unit(&[0.3, 0.7]), 7).unwrap();
        assert_eq!(out.neighbors.len(), 7);
        assert!(out.neighbors.iter().any(|n| n.id == id(100)));
        assert!(out.neighbors.iter().all(|n| n.id != id(1) && n.id != id(2)));
    }

    #[test]
    fn insert_then_remove_everything_empties_the_index() {
        let mut index = KdTreeIndex::new(2, KdTreeConfig::default()).unwrap();
        for i in 0..5u128 {
            index
                .insert(id(i + 1), unit(&[i as f32 + 1.0, 1.0]))
                .unwrap();
        }
        for i in 0..5u128 {
            assert!(index.remove(id(i + 1)));
        }
        assert_eq!(index.size(), 0);
        let out = index.search(&[1.0, 0.0], 3).unwrap();
        assert!(out.neighbors.is_empty());
    }

    #[test]
    fn duplicate_points_build_into_oversized_leaf() {
        let mut index = KdTreeIndex::new(
            2,
            KdTreeConfig {
                leaf_capacity: 2,
                rebuild_percent: 25,
            },
        )
        .unwrap();
        let entries: Vec<_> = (0..6).map(|i| (id(i + 1), vec![1.0, 0.0])).collect();
        index.build(entries).unwrap();

        let out = index.search(&[1.0, 0.0], 6).unwrap();
        assert_eq!(out.neighbors.len(), 6);
        // All scores tie at 1.0; order is ascending by id.
        for (i, neighbor) in out.neighbors.iter().enumerate() {
            assert_eq!(neighbor.id, id(i as u128 + 1));
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = KdTreeIndex::new(3, KdTreeConfig::default()).unwrap();
        assert!(index.insert(id(1), vec![1.0, 0.0]).is_err());
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }
}
