//! Per-collection owned state and its mutation discipline.
//!
//! A [`CollectionState`] is everything a collection exclusively owns:
//! descriptor, groups, records, version counters, and the installed index
//! slot. It is always accessed through the owning cell's reader-writer
//! lock; the methods here assume that lock is held.

use std::collections::{HashMap, HashSet};

use quiver_core::{
    CollectionDescriptor, CoreError, CoreResult, GroupDescriptor, GroupId, IndexType, Record,
    RecordId,
};
use quiver_index::VectorIndex;

/// Monotonic version counters for one collection.
///
/// `data_version` advances exactly once per mutation operation (a batch is
/// one operation). `index_version` is only ever stamped by the rebuild path
/// with the `data_version` observed at snapshot time, so
/// `index_version <= data_version` always holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Versions {
    /// Counts mutation operations against the record set.
    pub data_version: u64,
    /// `data_version` the installed index was built from.
    pub index_version: u64,
}

impl Versions {
    /// Records one mutation operation.
    pub fn bump_data(&mut self) -> u64 {
        self.data_version += 1;
        self.data_version
    }

    /// Stamps the index as built from the observed data version.
    pub fn stamp_index(&mut self, observed: u64) {
        self.index_version = observed;
    }

    /// Staleness condition: the record set moved past the installed index.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.index_version < self.data_version
    }
}

/// Everything a collection exclusively owns, guarded by the cell's lock.
pub struct CollectionState {
    pub descriptor: CollectionDescriptor,
    pub groups: HashMap<GroupId, GroupDescriptor>,
    pub records: HashMap<RecordId, Record>,
    pub records_by_group: HashMap<GroupId, HashSet<RecordId>>,
    pub versions: Versions,
    /// Currently-installed index, if any. Swapped atomically by rebuild.
    pub index: Option<Box<dyn VectorIndex>>,
    /// Most recent background rebuild failure, cleared on success.
    pub last_rebuild_error: Option<String>,
}

impl CollectionState {
    /// Creates empty state around a descriptor.
    #[must_use]
    pub fn new(descriptor: CollectionDescriptor) -> Self {
        Self {
            descriptor,
            groups: HashMap::new(),
            records: HashMap::new(),
            records_by_group: HashMap::new(),
            versions: Versions::default(),
            index: None,
            last_rebuild_error: None,
        }
    }

    /// Family of the installed index, if one is installed.
    #[must_use]
    pub fn installed_index_type(&self) -> Option<IndexType> {
        self.index.as_ref().map(|index| index.kind())
    }

    /// Fetches a group or fails with `NotFound`.
    pub fn group(&self, group_id: GroupId) -> CoreResult<&GroupDescriptor> {
        self.groups
            .get(&group_id)
            .ok_or_else(|| CoreError::not_found("group", group_id))
    }

    /// Fetches a record or fails with `NotFound`.
    pub fn record(&self, record_id: RecordId) -> CoreResult<&Record> {
        self.records
            .get(&record_id)
            .ok_or_else(|| CoreError::not_found("record", record_id))
    }

    /// Registers a new group.
    pub fn add_group(&mut self, group: GroupDescriptor) {
        self.records_by_group.entry(group.group_id).or_default();
        self.groups.insert(group.group_id, group);
    }

    /// Removes a group and cascades to its records. Bumps `data_version`
    /// once when any record was removed.
    pub fn remove_group(&mut self, group_id: GroupId) -> CoreResult<usize> {
        if !self.groups.contains_key(&group_id) {
            return Err(CoreError::not_found("group", group_id));
        }
        let member_ids: Vec<RecordId> = self
            .records_by_group
            .remove(&group_id)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default();
        for record_id in &member_ids {
            self.records.remove(record_id);
            self.remove_from_index(*record_id);
        }
        self.groups.remove(&group_id);
        if !member_ids.is_empty() {
            self.versions.bump_data();
        }
        Ok(member_ids.len())
    }

    /// Inserts pre-validated records as one mutation operation: all land in
    /// the maps and the installed index, and `data_version` bumps once.
    pub fn insert_records(&mut self, records: Vec<Record>) -> CoreResult<Vec<Record>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        for record in &records {
            if let Some(index) = self.index.as_mut() {
                index.insert(record.record_id, record.embedding.clone())?;
            }
            self.records_by_group
                .entry(record.group_id)
                .or_default()
                .insert(record.record_id);
            self.records.insert(record.record_id, record.clone());
        }
        self.versions.bump_data();
        Ok(records)
    }

    /// Applies a pre-validated field update to one record and bumps
    /// `data_version` once.
    ///
    /// The embedding, when present, must already be normalized and
    /// length-checked by the caller.
    pub fn update_record(
        &mut self,
        record_id: RecordId,
        text: Option<String>,
        embedding: Option<Vec<f32>>,
        metadata: Option<quiver_core::Metadata>,
    ) -> CoreResult<Record> {
        let record = self
            .records
            .get_mut(&record_id)
            .ok_or_else(|| CoreError::not_found("record", record_id))?;
        if let Some(text) = text {
            record.text = text;
        }
        if let Some(metadata) = metadata {
            record.metadata = metadata;
        }
        let embedding_changed = embedding.is_some();
        if let Some(embedding) = embedding {
            record.embedding = embedding;
        }
        record.touch();
        let updated = record.clone();
        if embedding_changed {
            if let Some(index) = self.index.as_mut() {
                // A freshly-installed rebuild may predate this record; the
                // pending rebuild will pick the new vector up.
                let _ = index.update(record_id, updated.embedding.clone())?;
            }
        }
        self.versions.bump_data();
        Ok(updated)
    }

    /// Removes one record as one mutation operation.
    pub fn remove_record(&mut self, record_id: RecordId) -> CoreResult<Record> {
        let record = self
            .records
            .remove(&record_id)
            .ok_or_else(|| CoreError::not_found("record", record_id))?;
        if let Some(members) = self.records_by_group.get_mut(&record.group_id) {
            members.remove(&record_id);
        }
        self.remove_from_index(record_id);
        self.versions.bump_data();
        Ok(record)
    }

    /// Copies `(id, embedding)` pairs for an off-lock index build.
    #[must_use]
    pub fn snapshot_entries(&self) -> Vec<(RecordId, Vec<f32>)> {
        self.records
            .values()
            .map(|record| (record.record_id, record.embedding.clone()))
            .collect()
    }

    fn remove_from_index(&mut self, record_id: RecordId) {
        if let Some(index) = self.index.as_mut() {
            // Not-found is fine: a rebuild installed between this record's
            // insert and now may never have seen it.
            let _ = index.remove(record_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::Metadata;

    fn state_with_group() -> (CollectionState, GroupId) {
        let descriptor = CollectionDescriptor::new("test", 2, IndexType::Flat);
        let mut state = CollectionState::new(descriptor);
        let group = GroupDescriptor::new(state.descriptor.collection_id, "g");
        let group_id = group.group_id;
        state.add_group(group);
        (state, group_id)
    }

    fn record(state: &CollectionState, group_id: GroupId, v: Vec<f32>) -> Record {
        Record::new(state.descriptor.collection_id, group_id, "text", v)
    }

    #[test]
    fn batch_insert_bumps_data_version_once() {
        let (mut state, group_id) = state_with_group();
        let batch = vec![
            record(&state, group_id, vec![1.0, 0.0]),
            record(&state, group_id, vec![0.0, 1.0]),
            record(&state, group_id, vec![1.0, 0.0]),
        ];
        state.insert_records(batch).unwrap();
        assert_eq!(state.versions.data_version, 1);
        assert_eq!(state.records.len(), 3);
    }

    #[test]
    fn group_cascade_removes_records_and_bumps_once() {
        let (mut state, group_id) = state_with_group();
        let batch = vec![
            record(&state, group_id, vec![1.0, 0.0]),
            record(&state, group_id, vec![0.0, 1.0]),
        ];
        state.insert_records(batch).unwrap();
        assert_eq!(state.versions.data_version, 1);

        let removed = state.remove_group(group_id).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(state.versions.data_version, 2);
        assert!(state.records.is_empty());
        assert!(state.groups.is_empty());
    }

    #[test]
    fn removing_empty_group_does_not_bump() {
        let (mut state, group_id) = state_with_group();
        state.remove_group(group_id).unwrap();
        assert_eq!(state.versions.data_version, 0);
    }

    #[test]
    fn update_record_touches_and_bumps() {
        let (mut state, group_id) = state_with_group();
        let inserted = state
            .insert_records(vec![record(&state, group_id, vec![1.0, 0.0])])
            .unwrap();
        let record_id = inserted[0].record_id;

        let updated = state
            .update_record(
                record_id,
                Some("new text".to_string()),
                None,
                Some(Metadata::default()),
            )
            .unwrap();
        assert_eq!(updated.text, "new text");
        assert_eq!(state.versions.data_version, 2);
        assert!(updated.updated_at >= updated.created_at);
    }

    #[test]
    fn stale_means_index_behind_data() {
        let mut versions = Versions::default();
        assert!(!versions.is_stale());
        versions.bump_data();
        assert!(versions.is_stale());
        versions.stamp_index(1);
        assert!(!versions.is_stale());
    }
}
