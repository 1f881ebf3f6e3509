use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Optional descriptive fields shared by collections, groups, and records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Origin of the content (e.g. a URL or file path).
    pub source: Option<String>,

    /// Free-form tags. Sanitized on intake: trimmed, deduplicated, non-empty.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Author of the content.
    pub author: Option<String>,

    /// Principal that created the entity.
    pub created_by: Option<String>,
}

impl Metadata {
    /// Maximum accepted tag length after trimming.
    pub const MAX_TAG_LENGTH: usize = 64;

    /// Trims, deduplicates, and length-checks tags in place.
    ///
    /// Order of first occurrence is preserved; empty tags are dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when a tag exceeds [`Self::MAX_TAG_LENGTH`].
    pub fn sanitize(&mut self) -> CoreResult<()> {
        let mut seen = std::collections::HashSet::new();
        let mut clean = Vec::with_capacity(self.tags.len());
        for tag in self.tags.drain(..) {
            let tag = tag.trim().to_string();
            if tag.is_empty() {
                continue;
            }
            if tag.len() > Self::MAX_TAG_LENGTH {
                return Err(CoreError::invalid_argument(format!(
                    "tag exceeds {} characters",
                    Self::MAX_TAG_LENGTH
                )));
            }
            if seen.insert(tag.clone()) {
                clean.push(tag);
            }
        }
        self.tags = clean;
        Ok(())
    }
}
