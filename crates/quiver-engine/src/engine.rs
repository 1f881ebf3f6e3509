//! The engine facade: the programmatic surface consumed by outer layers.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use quiver_core::{
    BuildId, CollectionDescriptor, CollectionId, CollectionPatch, CoreError, CoreResult,
    GroupDescriptor, GroupId, GroupPatch, IndexType, Metadata, QuiverConfig, Record, RecordFilter,
    RecordId, RecordPatch,
};
use quiver_index::math::normalized;
use quiver_index::IndexParams;

use crate::embed::EmbeddingProvider;
use crate::planner::{
    choose_plan, hydrate, scan_records, ExecutionPlan, QueryControl, QueryRequest, QueryResponse,
};
use crate::rebuild::RebuildScheduler;
use crate::registry::Registry;
use crate::snapshot::{CollectionSnapshot, Snapshot};
use crate::store::CollectionState;

/// Observable index state for one collection.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    /// Family of the installed index, if one is installed.
    pub index_type: Option<IndexType>,
    /// Records inside the installed index.
    pub size: usize,
    /// Mutation counter for the record set.
    pub data_version: u64,
    /// Data version the installed index was built from.
    pub index_version: u64,
    /// Whether the index is behind the record set.
    pub stale: bool,
    /// Whether a background rebuild is currently in flight.
    pub rebuild_in_progress: bool,
    /// Most recent background rebuild failure, if any.
    pub last_rebuild_error: Option<String>,
}

/// A record to be inserted, before intake validation.
#[derive(Debug, Clone)]
pub struct NewRecord {
    /// Group the record belongs to.
    pub group_id: GroupId,
    /// Text payload.
    pub text: String,
    /// Raw embedding; normalized and length-checked at intake.
    pub embedding: Vec<f32>,
    /// Descriptive metadata.
    pub metadata: Metadata,
}

/// Single-node vector search engine over hierarchical collections.
///
/// All mutation and query methods are synchronous and lock-based;
/// background index rebuilds run as Tokio tasks, so the engine must be
/// created inside a Tokio runtime.
pub struct Engine {
    config: QuiverConfig,
    registry: Arc<Registry>,
    scheduler: Arc<RebuildScheduler>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Creates an engine with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; rebuilds are spawned
    /// onto it.
    #[must_use]
    pub fn new(config: QuiverConfig) -> Self {
        let shutdown = CancellationToken::new();
        let scheduler = Arc::new(RebuildScheduler::new(
            config.index.clone(),
            config.rebuild.max_concurrent_builds,
            shutdown.clone(),
        ));
        Self {
            config,
            registry: Arc::new(Registry::new()),
            scheduler,
            embedder: None,
            shutdown,
        }
    }

    /// Attaches an embedding provider for text-only record intake
    /// (builder pattern).
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Stops background work; in-flight rebuilds exit at their next phase
    /// boundary and leave installed indexes unchanged.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ========== Collection operations ==========

    /// Creates a collection with a unique name and immutable dimension.
    pub fn create_collection(
        &self,
        name: impl Into<String>,
        dimension: u32,
        default_index_type: IndexType,
        metadata: Metadata,
    ) -> CoreResult<CollectionDescriptor> {
        self.validate_dimension_bounds(dimension)?;
        let mut descriptor = CollectionDescriptor::new(name, dimension, default_index_type);
        descriptor.validate_name()?;
        descriptor.metadata = metadata;
        descriptor.metadata.sanitize()?;

        let cell = self.registry.insert(CollectionState::new(descriptor))?;
        let descriptor = cell.read().descriptor.clone();
        info!(
            collection_id = %descriptor.collection_id,
            name = %descriptor.name,
            dimension,
            "collection created"
        );
        Ok(descriptor)
    }

    /// Fetches a collection descriptor.
    pub fn get_collection(&self, collection_id: CollectionId) -> CoreResult<CollectionDescriptor> {
        Ok(self.registry.get(collection_id)?.read().descriptor.clone())
    }

    /// All collections, ordered by creation time.
    #[must_use]
    pub fn list_collections(&self) -> Vec<CollectionDescriptor> {
        let mut descriptors: Vec<CollectionDescriptor> = self
            .registry
            .list()
            .iter()
            .map(|cell| cell.read().descriptor.clone())
            .collect();
        descriptors.sort_by_key(|d| (d.created_at, d.collection_id));
        descriptors
    }

    /// Applies a field patch to a collection.
    pub fn update_collection(
        &self,
        collection_id: CollectionId,
        patch: CollectionPatch,
    ) -> CoreResult<CollectionDescriptor> {
        let cell = self.registry.get(collection_id)?;
        let mut state = cell.write();
        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(CoreError::invalid_argument("collection name cannot be empty"));
            }
            if name.len() > CollectionDescriptor::MAX_NAME_LENGTH {
                return Err(CoreError::invalid_argument(format!(
                    "collection name exceeds {} characters",
                    CollectionDescriptor::MAX_NAME_LENGTH
                )));
            }
            if name != state.descriptor.name {
                self.registry
                    .rename(collection_id, &state.descriptor.name, name.clone())?;
                state.descriptor.name = name;
            }
        }
        if let Some(description) = patch.description {
            state.descriptor.description = Some(description);
        }
        if let Some(kind) = patch.default_index_type {
            state.descriptor.default_index_type = kind;
        }
        if let Some(mut metadata) = patch.metadata {
            metadata.sanitize()?;
            state.descriptor.metadata = metadata;
        }
        state.descriptor.touch();
        Ok(state.descriptor.clone())
    }

    /// Destroys a collection, cascading to groups, records, and the
    /// installed index.
    pub fn delete_collection(&self, collection_id: CollectionId) -> CoreResult<()> {
        let cell = self.registry.remove(collection_id)?;
        info!(%collection_id, "collection deleted");
        // The index is disposed with the cell once in-flight borrows drain.
        drop(cell);
        Ok(())
    }

    // ========== Group operations ==========

    /// Creates a group within a collection.
    pub fn create_group(
        &self,
        collection_id: CollectionId,
        title: impl Into<String>,
        metadata: Metadata,
    ) -> CoreResult<GroupDescriptor> {
        let cell = self.registry.get(collection_id)?;
        let mut group = GroupDescriptor::new(collection_id, title);
        group.validate_title()?;
        group.metadata = metadata;
        group.metadata.sanitize()?;

        let mut state = cell.write();
        let descriptor = group.clone();
        state.add_group(group);
        Ok(descriptor)
    }

    /// Fetches a group descriptor.
    pub fn get_group(
        &self,
        collection_id: CollectionId,
        group_id: GroupId,
    ) -> CoreResult<GroupDescriptor> {
        Ok(self.registry.get(collection_id)?.read().group(group_id)?.clone())
    }

    /// All groups in a collection, ordered by creation time.
    pub fn list_groups(&self, collection_id: CollectionId) -> CoreResult<Vec<GroupDescriptor>> {
        let cell = self.registry.get(collection_id)?;
        let state = cell.read();
        let mut groups: Vec<GroupDescriptor> = state.groups.values().cloned().collect();
        groups.sort_by_key(|g| (g.created_at, g.group_id));
        Ok(groups)
    }

    /// Applies a field patch to a group.
    pub fn update_group(
        &self,
        collection_id: CollectionId,
        group_id: GroupId,
        patch: GroupPatch,
    ) -> CoreResult<GroupDescriptor> {
        let cell = self.registry.get(collection_id)?;
        let mut state = cell.write();
        if !state.groups.contains_key(&group_id) {
            return Err(CoreError::not_found("group", group_id));
        }
        if let Some(title) = patch.title.as_ref() {
            let title = title.trim();
            if title.is_empty() {
                return Err(CoreError::invalid_argument("group title cannot be empty"));
            }
            if title.len() > GroupDescriptor::MAX_TITLE_LENGTH {
                return Err(CoreError::invalid_argument(format!(
                    "group title exceeds {} characters",
                    GroupDescriptor::MAX_TITLE_LENGTH
                )));
            }
        }
        let sanitized_metadata = match patch.metadata {
            Some(mut metadata) => {
                metadata.sanitize()?;
                Some(metadata)
            }
            None => None,
        };
        let group = state
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| CoreError::not_found("group", group_id))?;
        if let Some(title) = patch.title {
            group.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            group.description = Some(description);
        }
        if let Some(metadata) = sanitized_metadata {
            group.metadata = metadata;
        }
        group.touch();
        Ok(group.clone())
    }

    /// Destroys a group, cascading to its records.
    pub fn delete_group(&self, collection_id: CollectionId, group_id: GroupId) -> CoreResult<()> {
        let cell = self.registry.get(collection_id)?;
        let removed = cell.write().remove_group(group_id)?;
        debug!(%collection_id, %group_id, removed, "group deleted");
        Ok(())
    }

    // ========== Record operations ==========

    /// Inserts one record. The embedding is normalized at intake; zero
    /// vectors are rejected.
    pub fn insert_record(
        &self,
        collection_id: CollectionId,
        group_id: GroupId,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> CoreResult<Record> {
        let mut inserted = self.insert_records(
            collection_id,
            vec![NewRecord {
                group_id,
                text: text.into(),
                embedding,
                metadata,
            }],
        )?;
        inserted
            .pop()
            .ok_or_else(|| CoreError::internal("batch insert of one record returned none"))
    }

    /// Inserts a batch of records as one mutation operation: either all
    /// land and `data_version` bumps once, or nothing changes.
    pub fn insert_records(
        &self,
        collection_id: CollectionId,
        batch: Vec<NewRecord>,
    ) -> CoreResult<Vec<Record>> {
        let cell = self.registry.get(collection_id)?;
        let mut state = cell.write();
        let dimension = state.descriptor.dimension as usize;

        // Validate the whole batch before touching any state.
        let mut records = Vec::with_capacity(batch.len());
        for new in batch {
            state.group(new.group_id)?;
            let embedding = Self::normalize_embedding(dimension, &new.embedding)?;
            let mut metadata = new.metadata;
            metadata.sanitize()?;
            let mut record = Record::new(collection_id, new.group_id, new.text, embedding)
                .with_metadata(metadata);
            record.validate_text()?;
            records.push(record);
        }
        state.insert_records(records)
    }

    /// Embeds the text via the configured provider, then inserts the
    /// record. The provider's output dimension is validated on return.
    pub async fn insert_record_from_text(
        &self,
        collection_id: CollectionId,
        group_id: GroupId,
        text: impl Into<String>,
        metadata: Metadata,
    ) -> CoreResult<Record> {
        let embedder = self
            .embedder
            .clone()
            .ok_or_else(|| CoreError::invalid_argument("no embedding provider configured"))?;
        let expected = self.get_collection(collection_id)?.dimension as usize;

        let text = text.into();
        let embedding = embedder.embed(&text).await?;
        if embedding.len() != expected {
            return Err(CoreError::dimension_mismatch(expected, embedding.len()));
        }
        self.insert_record(collection_id, group_id, text, embedding, metadata)
    }

    /// Fetches a record.
    pub fn get_record(
        &self,
        collection_id: CollectionId,
        record_id: RecordId,
    ) -> CoreResult<Record> {
        Ok(self
            .registry
            .get(collection_id)?
            .read()
            .record(record_id)?
            .clone())
    }

    /// Records in a collection, optionally filtered, ordered by creation
    /// time.
    pub fn list_records(
        &self,
        collection_id: CollectionId,
        filter: Option<&RecordFilter>,
    ) -> CoreResult<Vec<Record>> {
        let cell = self.registry.get(collection_id)?;
        let state = cell.read();
        let mut records: Vec<Record> = state
            .records
            .values()
            .filter(|record| filter.map_or(true, |f| f.matches(record)))
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.record_id));
        Ok(records)
    }

    /// Applies a field patch to a record. An embedding change is
    /// re-normalized and forwarded to the installed index.
    pub fn update_record(
        &self,
        collection_id: CollectionId,
        record_id: RecordId,
        patch: RecordPatch,
    ) -> CoreResult<Record> {
        let cell = self.registry.get(collection_id)?;
        let mut state = cell.write();
        if patch.is_empty() {
            // Nothing changes, so nothing bumps.
            return state.record(record_id).map(Clone::clone);
        }
        state.record(record_id)?;
        let dimension = state.descriptor.dimension as usize;

        let text = match patch.text {
            Some(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return Err(CoreError::invalid_argument("record text cannot be empty"));
                }
                Some(text)
            }
            None => None,
        };
        let embedding = match patch.embedding {
            Some(embedding) => Some(Self::normalize_embedding(dimension, &embedding)?),
            None => None,
        };
        let metadata = match patch.metadata {
            Some(mut metadata) => {
                metadata.sanitize()?;
                Some(metadata)
            }
            None => None,
        };
        state.update_record(record_id, text, embedding, metadata)
    }

    /// Deletes a record.
    pub fn delete_record(
        &self,
        collection_id: CollectionId,
        record_id: RecordId,
    ) -> CoreResult<()> {
        let cell = self.registry.get(collection_id)?;
        cell.write().remove_record(record_id)?;
        Ok(())
    }

    // ========== Index operations ==========

    /// Enqueues a background build of the given index type (the
    /// collection's default when unset) and returns immediately with the
    /// build id. Coalesces onto an in-flight rebuild if one exists.
    pub fn build_index(
        &self,
        collection_id: CollectionId,
        index_type: Option<IndexType>,
        params: IndexParams,
    ) -> CoreResult<BuildId> {
        let cell = self.registry.get(collection_id)?;
        let kind = index_type.unwrap_or_else(|| cell.read().descriptor.default_index_type);
        Ok(RebuildScheduler::schedule(&self.scheduler, cell, kind, params))
    }

    /// Reports the collection's index and version state.
    pub fn index_status(&self, collection_id: CollectionId) -> CoreResult<IndexStatus> {
        let cell = self.registry.get(collection_id)?;
        let rebuild_in_progress = cell.rebuild_in_progress();
        let state = cell.read();
        Ok(IndexStatus {
            index_type: state.installed_index_type(),
            size: state.index.as_ref().map_or(0, |index| index.size()),
            data_version: state.versions.data_version,
            index_version: state.versions.index_version,
            stale: state.versions.is_stale(),
            rebuild_in_progress,
            last_rebuild_error: state.last_rebuild_error.clone(),
        })
    }

    // ========== Query ==========

    /// Executes a kNN query per the planner's decision table. The read
    /// lock is held for the planner pass and released before returning;
    /// any rebuild the plan calls for is scheduled after release.
    pub fn query(&self, request: QueryRequest) -> CoreResult<QueryResponse> {
        if request.k == 0 {
            return Err(CoreError::invalid_argument("k must be at least 1"));
        }
        if request.k > self.config.query.top_k_max {
            return Err(CoreError::invalid_argument(format!(
                "k exceeds the maximum of {}",
                self.config.query.top_k_max
            )));
        }
        let cell = self.registry.get(request.collection_id)?;
        let control = QueryControl::new(request.deadline, request.cancel.clone());
        control.check()?;

        // Lock acquisition respects the deadline.
        let guard = match control.remaining()? {
            Some(budget) => cell
                .try_read_for(budget)
                .ok_or(CoreError::DeadlineExceeded)?,
            None => cell.read(),
        };
        let state = &*guard;

        let dimension = state.descriptor.dimension as usize;
        if request.vector.len() != dimension {
            return Err(CoreError::dimension_mismatch(dimension, request.vector.len()));
        }
        let query_vec = normalized(&request.vector)
            .ok_or_else(|| CoreError::invalid_argument("query vector must be non-zero"))?;

        let allow_stale = request
            .allow_stale
            .unwrap_or(self.config.query.allow_stale);
        let use_fallback = request
            .use_fallback_on_stale
            .unwrap_or(self.config.query.use_fallback_on_stale);
        let has_filter = request.filter.as_ref().is_some_and(|f| !f.is_empty());

        let (plan, schedule_rebuild) = choose_plan(
            has_filter,
            state.index.is_some(),
            !state.records.is_empty(),
            state.versions.is_stale(),
            allow_stale,
            use_fallback,
        )?;
        debug!(collection_id = %request.collection_id, ?plan, "query plan selected");

        let response = match plan {
            ExecutionPlan::FilteredScan => {
                let (neighbors, considered) = scan_records(
                    state,
                    &query_vec,
                    request.k,
                    request.filter.as_ref(),
                    &control,
                )?;
                QueryResponse {
                    hits: hydrate(state, neighbors)?,
                    stale_index: false,
                    index_type_used: IndexType::Flat,
                    considered_count: considered,
                }
            }
            ExecutionPlan::FullScan => {
                let (neighbors, considered) =
                    scan_records(state, &query_vec, request.k, None, &control)?;
                QueryResponse {
                    hits: hydrate(state, neighbors)?,
                    stale_index: false,
                    index_type_used: IndexType::Flat,
                    considered_count: considered,
                }
            }
            ExecutionPlan::ServeIndex { stale } => {
                control.check()?;
                let index = state
                    .index
                    .as_ref()
                    .ok_or_else(|| CoreError::internal("planned index is not installed"))?;
                let output = index.search(&query_vec, request.k)?;
                QueryResponse {
                    hits: hydrate(state, output.neighbors)?,
                    stale_index: stale,
                    index_type_used: index.kind(),
                    considered_count: output.considered,
                }
            }
        };

        let rebuild_kind = state
            .installed_index_type()
            .unwrap_or(state.descriptor.default_index_type);
        drop(guard);

        if schedule_rebuild && !self.shutdown.is_cancelled() {
            RebuildScheduler::schedule(&self.scheduler, cell, rebuild_kind, IndexParams::default());
        }
        Ok(response)
    }

    // ========== Snapshot export/import ==========

    /// Copies the engine's complete logical state, each collection under
    /// its read lock.
    #[must_use]
    pub fn export_snapshot(&self) -> Snapshot {
        let mut collections: Vec<CollectionSnapshot> = self
            .registry
            .list()
            .iter()
            .map(|cell| {
                let state = cell.read();
                let mut groups: Vec<GroupDescriptor> = state.groups.values().cloned().collect();
                groups.sort_by_key(|g| (g.created_at, g.group_id));
                let mut records: Vec<Record> = state.records.values().cloned().collect();
                records.sort_by_key(|r| (r.created_at, r.record_id));
                CollectionSnapshot {
                    descriptor: state.descriptor.clone(),
                    groups,
                    records,
                    data_version: state.versions.data_version,
                }
            })
            .collect();
        collections.sort_by_key(|c| (c.descriptor.created_at, c.descriptor.collection_id));
        Snapshot { collections }
    }

    /// Replaces the engine's state wholesale with the snapshot and forces
    /// a rebuild per non-empty collection.
    pub fn import_snapshot(&self, snapshot: Snapshot) -> CoreResult<()> {
        let mut cells = Vec::with_capacity(snapshot.collections.len());
        let mut names = HashSet::new();
        for collection in snapshot.collections {
            let descriptor = collection.descriptor;
            if !names.insert(descriptor.name.clone()) {
                return Err(CoreError::already_exists("collection", descriptor.name));
            }
            let dimension = descriptor.dimension as usize;
            let collection_id = descriptor.collection_id;
            let mut state = CollectionState::new(descriptor);
            for group in collection.groups {
                if group.collection_id != collection_id {
                    return Err(CoreError::invalid_argument(
                        "snapshot group does not belong to its collection",
                    ));
                }
                state.add_group(group);
            }
            for record in collection.records {
                if record.collection_id != collection_id {
                    return Err(CoreError::invalid_argument(
                        "snapshot record does not belong to its collection",
                    ));
                }
                if record.embedding.len() != dimension {
                    return Err(CoreError::dimension_mismatch(
                        dimension,
                        record.embedding.len(),
                    ));
                }
                state.group(record.group_id)?;
                state
                    .records_by_group
                    .entry(record.group_id)
                    .or_default()
                    .insert(record.record_id);
                state.records.insert(record.record_id, record);
            }
            state.versions.data_version = collection.data_version;
            let name = state.descriptor.name.clone();
            cells.push((collection_id, name, Arc::new(crate::registry::CollectionCell::new(state))));
        }

        let to_build: Vec<_> = cells.iter().map(|(_, _, cell)| Arc::clone(cell)).collect();
        let imported = cells.len();
        self.registry.replace_all(cells);
        info!(collections = imported, "snapshot imported");

        for cell in to_build {
            let (kind, has_records) = {
                let state = cell.read();
                (
                    state.descriptor.default_index_type,
                    !state.records.is_empty(),
                )
            };
            if has_records && !self.shutdown.is_cancelled() {
                RebuildScheduler::schedule(&self.scheduler, cell, kind, IndexParams::default());
            }
        }
        Ok(())
    }

    // ========== Validation helpers ==========

    fn validate_dimension_bounds(&self, dimension: u32) -> CoreResult<()> {
        let bounds = &self.config.validation;
        if dimension < bounds.dimension_min || dimension > bounds.dimension_max {
            return Err(CoreError::invalid_argument(format!(
                "dimension {dimension} is outside [{}, {}]",
                bounds.dimension_min, bounds.dimension_max
            )));
        }
        Ok(())
    }

    /// Length-checks and unit-normalizes an embedding at intake.
    fn normalize_embedding(dimension: usize, embedding: &[f32]) -> CoreResult<Vec<f32>> {
        if embedding.len() != dimension {
            return Err(CoreError::dimension_mismatch(dimension, embedding.len()));
        }
        normalized(embedding)
            .ok_or_else(|| CoreError::invalid_argument("embedding must have non-zero magnitude"))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
