use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::ids::CollectionId;
use crate::metadata::Metadata;

/// Index algorithm family for kNN search within a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Exact linear scan over every vector. Correctness oracle.
    Flat,
    /// Exact space-partitioning tree. Best for low dimensions.
    KdTree,
    /// Approximate random-hyperplane hashing for cosine similarity.
    Lsh,
}

impl IndexType {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::KdTree => "kdtree",
            Self::Lsh => "lsh",
        }
    }
}

impl Default for IndexType {
    fn default() -> Self {
        Self::Flat
    }
}

impl FromStr for IndexType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(Self::Flat),
            "kdtree" => Ok(Self::KdTree),
            "lsh" => Ok(Self::Lsh),
            _ => Err(()),
        }
    }
}

/// Top-level container fixing the embedding dimension and default index type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// Stable collection identifier.
    pub collection_id: CollectionId,
    /// Human-readable name, unique across the engine.
    pub name: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Embedding dimension. Immutable after creation.
    pub dimension: u32,
    /// Index type used when a build request does not name one.
    pub default_index_type: IndexType,
    /// Descriptive metadata.
    pub metadata: Metadata,
    /// Creation timestamp in UTC.
    pub created_at: DateTime<Utc>,
    /// Update timestamp in UTC.
    pub updated_at: DateTime<Utc>,
}

impl CollectionDescriptor {
    /// Maximum collection name length after trimming.
    pub const MAX_NAME_LENGTH: usize = 128;

    /// Creates a descriptor with fresh id and timestamps.
    #[must_use]
    pub fn new(name: impl Into<String>, dimension: u32, default_index_type: IndexType) -> Self {
        let now = Utc::now();
        Self {
            collection_id: CollectionId::new(),
            name: name.into(),
            description: None,
            dimension,
            default_index_type,
            metadata: Metadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Trims and validates the name in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for empty or oversized names.
    pub fn validate_name(&mut self) -> CoreResult<()> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(CoreError::invalid_argument("collection name cannot be empty"));
        }
        if self.name.len() > Self::MAX_NAME_LENGTH {
            return Err(CoreError::invalid_argument(format!(
                "collection name exceeds {} characters",
                Self::MAX_NAME_LENGTH
            )));
        }
        Ok(())
    }

    /// Updates the `updated_at` timestamp to the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Optional-field update payload for a collection.
///
/// `dimension` is deliberately absent: it is immutable after creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionPatch {
    /// New name, if renaming.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New default index type for future builds.
    pub default_index_type: Option<IndexType>,
    /// Replacement metadata bundle.
    pub metadata: Option<Metadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_type_roundtrips_through_str() {
        for kind in [IndexType::Flat, IndexType::KdTree, IndexType::Lsh] {
            assert_eq!(kind.as_str().parse::<IndexType>(), Ok(kind));
        }
        assert!("hnsw".parse::<IndexType>().is_err());
    }

    #[test]
    fn validate_name_trims() {
        let mut desc = CollectionDescriptor::new("  docs  ", 3, IndexType::Flat);
        desc.validate_name().expect("name should be valid");
        assert_eq!(desc.name, "docs");
    }

    #[test]
    fn validate_name_rejects_empty() {
        let mut desc = CollectionDescriptor::new("   ", 3, IndexType::Flat);
        assert!(desc.validate_name().is_err());
    }
}
