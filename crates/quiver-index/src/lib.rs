//! Vector indexing implementations for Quiver.
//!
//! This crate provides the three index families behind the engine's
//! `VectorIndex` contract:
//! - [`FlatIndex`]: exact linear scan (baseline for correctness)
//! - [`KdTreeIndex`]: exact space-partitioning tree for low dimensions
//! - [`LshIndex`]: approximate random-hyperplane hashing for cosine
//!
//! All indexes operate on unit-normalized vectors; ranking by descending
//! cosine similarity with ties broken by ascending record id.

pub mod flat;
pub mod index;
pub mod kd_tree;
pub mod lsh;
pub mod math;

pub use flat::FlatIndex;
pub use index::{build_index, IndexParams, SearchOutput, VectorIndex};
pub use kd_tree::{KdTreeConfig, KdTreeIndex};
pub use lsh::{LshConfig, LshIndex};
pub use math::{Neighbor, TopK};
