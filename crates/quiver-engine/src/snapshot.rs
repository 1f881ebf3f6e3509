//! Logical-state snapshot types for the replication collaborator.
//!
//! A snapshot is a read-only copy of everything the engine owns; how it is
//! serialized, shipped, or stored is the collaborator's concern. Import
//! replaces the engine's state wholesale and forces a rebuild per
//! collection.

use serde::{Deserialize, Serialize};

use quiver_core::{CollectionDescriptor, GroupDescriptor, Record};

/// One collection's complete logical state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    /// Collection descriptor, including the id and dimension.
    pub descriptor: CollectionDescriptor,
    /// All groups, ordered by creation time.
    pub groups: Vec<GroupDescriptor>,
    /// All records with normalized embeddings, ordered by creation time.
    pub records: Vec<Record>,
    /// Data version at export time; import adopts it so replicas report
    /// the primary's version.
    pub data_version: u64,
}

/// The engine's complete logical state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Every collection, ordered by creation time.
    pub collections: Vec<CollectionSnapshot>,
}

impl Snapshot {
    /// Total number of records across all collections.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.collections.iter().map(|c| c.records.len()).sum()
    }
}
