use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::ids::{CollectionId, GroupId, RecordId};
use crate::metadata::Metadata;

/// The indexable unit: text plus its embedding.
///
/// The stored embedding is unit-normalized at intake; indexes and the query
/// planner rely on that invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Stable record identifier.
    pub record_id: RecordId,
    /// Owning collection.
    pub collection_id: CollectionId,
    /// Owning group.
    pub group_id: GroupId,
    /// Text payload. Opaque to the index family; searched only by the
    /// `text_contains` filter.
    pub text: String,
    /// Unit-normalized embedding of length `collection.dimension`.
    pub embedding: Vec<f32>,
    /// Descriptive metadata.
    pub metadata: Metadata,
    /// Creation timestamp in UTC.
    pub created_at: DateTime<Utc>,
    /// Update timestamp in UTC.
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Creates a record with fresh id and timestamps.
    #[must_use]
    pub fn new(
        collection_id: CollectionId,
        group_id: GroupId,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            record_id: RecordId::new(),
            collection_id,
            group_id,
            text: text.into(),
            embedding,
            metadata: Metadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the metadata (builder pattern).
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Trims and validates the text payload in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the text is empty after trimming.
    pub fn validate_text(&mut self) -> CoreResult<()> {
        self.text = self.text.trim().to_string();
        if self.text.is_empty() {
            return Err(CoreError::invalid_argument("record text cannot be empty"));
        }
        Ok(())
    }

    /// Updates the `updated_at` timestamp to the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Optional-field update payload for a record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    /// Replacement text payload.
    pub text: Option<String>,
    /// Replacement embedding. Re-normalized and length-checked at intake.
    pub embedding: Option<Vec<f32>>,
    /// Replacement metadata bundle.
    pub metadata: Option<Metadata>,
}

impl RecordPatch {
    /// Returns true when the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.embedding.is_none() && self.metadata.is_none()
    }
}
