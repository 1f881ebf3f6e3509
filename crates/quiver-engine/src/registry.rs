//! Process-wide registry mapping collection ids to their owned cells.
//!
//! The registry mutex guards only lookup, insertion, and removal of cells
//! (and the name-uniqueness map); it is never held across collection
//! operations. All real work happens under the per-collection
//! reader-writer lock inside the cell. parking_lot write locks are
//! writer-preferring, so a pending rebuild install is not starved by a
//! stream of readers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use quiver_core::{BuildId, CollectionId, CoreError, CoreResult};

use crate::store::CollectionState;

/// One collection's lock, state, and rebuild flag.
pub struct CollectionCell {
    state: RwLock<CollectionState>,
    rebuild: Mutex<Option<BuildId>>,
}

impl CollectionCell {
    /// Wraps fresh state in a cell.
    #[must_use]
    pub fn new(state: CollectionState) -> Self {
        Self {
            state: RwLock::new(state),
            rebuild: Mutex::new(None),
        }
    }

    /// Acquires the collection read lock.
    pub fn read(&self) -> RwLockReadGuard<'_, CollectionState> {
        self.state.read()
    }

    /// Attempts the read lock within a budget; `None` on timeout.
    pub fn try_read_for(&self, budget: Duration) -> Option<RwLockReadGuard<'_, CollectionState>> {
        self.state.try_read_for(budget)
    }

    /// Acquires the exclusive collection write lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, CollectionState> {
        self.state.write()
    }

    /// Whether a rebuild for this collection is currently in flight.
    #[must_use]
    pub fn rebuild_in_progress(&self) -> bool {
        self.rebuild.lock().is_some()
    }

    /// Claims the rebuild slot. Returns the build id and whether this call
    /// claimed it; a false flag means a rebuild was already in flight and
    /// the caller's request coalesces into it.
    pub(crate) fn claim_rebuild(&self) -> (BuildId, bool) {
        let mut slot = self.rebuild.lock();
        match *slot {
            Some(existing) => (existing, false),
            None => {
                let build_id = BuildId::new();
                *slot = Some(build_id);
                (build_id, true)
            }
        }
    }

    /// Releases the rebuild slot claimed under `build_id`.
    pub(crate) fn finish_rebuild(&self, build_id: BuildId) {
        let mut slot = self.rebuild.lock();
        if *slot == Some(build_id) {
            *slot = None;
        }
    }
}

struct RegistryInner {
    cells: HashMap<CollectionId, Arc<CollectionCell>>,
    /// Enforces engine-wide collection name uniqueness.
    names: HashMap<String, CollectionId>,
}

/// Guarded map from collection id to its cell.
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                cells: HashMap::new(),
                names: HashMap::new(),
            }),
        }
    }

    /// Registers a new collection.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when the name or id is taken.
    pub fn insert(&self, state: CollectionState) -> CoreResult<Arc<CollectionCell>> {
        let collection_id = state.descriptor.collection_id;
        let name = state.descriptor.name.clone();
        let mut inner = self.inner.lock();
        if inner.names.contains_key(&name) {
            return Err(CoreError::already_exists("collection", name));
        }
        if inner.cells.contains_key(&collection_id) {
            return Err(CoreError::already_exists("collection", collection_id));
        }
        let cell = Arc::new(CollectionCell::new(state));
        inner.cells.insert(collection_id, Arc::clone(&cell));
        inner.names.insert(name, collection_id);
        Ok(cell)
    }

    /// Looks up a collection cell.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub fn get(&self, collection_id: CollectionId) -> CoreResult<Arc<CollectionCell>> {
        self.inner
            .lock()
            .cells
            .get(&collection_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("collection", collection_id))
    }

    /// Retires a collection, returning its cell for disposal outside the
    /// registry mutex.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub fn remove(&self, collection_id: CollectionId) -> CoreResult<Arc<CollectionCell>> {
        let mut inner = self.inner.lock();
        let cell = inner
            .cells
            .remove(&collection_id)
            .ok_or_else(|| CoreError::not_found("collection", collection_id))?;
        inner.names.retain(|_, id| *id != collection_id);
        Ok(cell)
    }

    /// All registered cells, in unspecified order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<CollectionCell>> {
        self.inner.lock().cells.values().cloned().collect()
    }

    /// Moves a collection's unique name claim.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when another collection holds the new name.
    pub fn rename(
        &self,
        collection_id: CollectionId,
        old_name: &str,
        new_name: String,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(owner) = inner.names.get(&new_name) {
            if *owner != collection_id {
                return Err(CoreError::already_exists("collection", new_name));
            }
            return Ok(());
        }
        inner.names.remove(old_name);
        inner.names.insert(new_name, collection_id);
        Ok(())
    }

    /// Replaces the entire registry content. Used by snapshot import; old
    /// cells drop (and their indexes with them) once outstanding references
    /// are gone.
    pub fn replace_all(&self, cells: Vec<(CollectionId, String, Arc<CollectionCell>)>) {
        let mut inner = self.inner.lock();
        inner.cells.clear();
        inner.names.clear();
        for (collection_id, name, cell) in cells {
            inner.cells.insert(collection_id, cell);
            inner.names.insert(name, collection_id);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
