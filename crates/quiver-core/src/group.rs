use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::ids::{CollectionId, GroupId};
use crate::metadata::Metadata;

/// Organizational middle tier within a collection.
///
/// Groups carry no index structure of their own; the engine uses them as a
/// filter dimension and for cascading deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDescriptor {
    /// Stable group identifier.
    pub group_id: GroupId,
    /// Owning collection.
    pub collection_id: CollectionId,
    /// Display title.
    pub title: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Descriptive metadata.
    pub metadata: Metadata,
    /// Creation timestamp in UTC.
    pub created_at: DateTime<Utc>,
    /// Update timestamp in UTC.
    pub updated_at: DateTime<Utc>,
}

impl GroupDescriptor {
    /// Maximum title length after trimming.
    pub const MAX_TITLE_LENGTH: usize = 256;

    /// Creates a descriptor with fresh id and timestamps.
    #[must_use]
    pub fn new(collection_id: CollectionId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            group_id: GroupId::new(),
            collection_id,
            title: title.into(),
            description: None,
            metadata: Metadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Trims and validates the title in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for empty or oversized titles.
    pub fn validate_title(&mut self) -> CoreResult<()> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(CoreError::invalid_argument("group title cannot be empty"));
        }
        if self.title.len() > Self::MAX_TITLE_LENGTH {
            return Err(CoreError::invalid_argument(format!(
                "group title exceeds {} characters",
                Self::MAX_TITLE_LENGTH
            )));
        }
        Ok(())
    }

    /// Updates the `updated_at` timestamp to the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Optional-field update payload for a group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupPatch {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// Replacement metadata bundle.
    pub metadata: Option<Metadata>,
}
