use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::GroupId;
use crate::record::Record;

/// Metadata filter for record listings and filtered queries.
///
/// Every present field must hold for a record to match; absent fields are
/// ignored. An entirely absent filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    /// At least one of these tags is present on the record.
    pub tags_any: Option<Vec<String>>,
    /// All of these tags are present on the record.
    pub tags_all: Option<Vec<String>>,
    /// The record's author is one of these.
    pub authors: Option<Vec<String>>,
    /// The record belongs to one of these groups.
    pub group_ids: Option<Vec<GroupId>>,
    /// The record was created at or after this instant.
    pub created_from: Option<DateTime<Utc>>,
    /// The record was created at or before this instant.
    pub created_to: Option<DateTime<Utc>>,
    /// Case-insensitive substring over the text payload.
    pub text_contains: Option<String>,
}

impl RecordFilter {
    /// Returns true when no constraint is set.
    ///
    /// Empty lists and whitespace-only `text_contains` count as unset, so a
    /// caller sending `{"tags_any": []}` gets the unfiltered path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags_any.as_ref().map_or(true, Vec::is_empty)
            && self.tags_all.as_ref().map_or(true, Vec::is_empty)
            && self.authors.as_ref().map_or(true, Vec::is_empty)
            && self.group_ids.as_ref().map_or(true, Vec::is_empty)
            && self.created_from.is_none()
            && self.created_to.is_none()
            && self
                .text_contains
                .as_ref()
                .map_or(true, |t| t.trim().is_empty())
    }

    /// Evaluates the filter against a record. All present fields are
    /// AND-combined.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(tags) = self.tags_any.as_ref().filter(|t| !t.is_empty()) {
            if !tags.iter().any(|t| record.metadata.tags.contains(t)) {
                return false;
            }
        }
        if let Some(tags) = self.tags_all.as_ref().filter(|t| !t.is_empty()) {
            if !tags.iter().all(|t| record.metadata.tags.contains(t)) {
                return false;
            }
        }
        if let Some(authors) = self.authors.as_ref().filter(|a| !a.is_empty()) {
            match record.metadata.author.as_ref() {
                Some(author) if authors.contains(author) => {}
                _ => return false,
            }
        }
        if let Some(groups) = self.group_ids.as_ref().filter(|g| !g.is_empty()) {
            if !groups.contains(&record.group_id) {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if record.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if record.created_at > to {
                return false;
            }
        }
        if let Some(needle) = self.text_contains.as_ref() {
            let needle = needle.trim().to_lowercase();
            if !needle.is_empty() && !record.text.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}
