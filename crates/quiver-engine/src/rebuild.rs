//! Background index rebuilds with atomic install.
//!
//! Lock discipline per job:
//! 1. Under the collection read lock: copy `(id, embedding)` pairs and the
//!    observed `data_version`.
//! 2. Off-lock, on the blocking pool: construct the new index.
//! 3. Under the collection write lock: install the instance and stamp
//!    `index_version` with the observed version, never a later one. When
//!    the collection moved past the snapshot meanwhile, the job still
//!    installs, then immediately goes around again.
//! 4. The replaced instance drops outside the lock.
//!
//! At most one rebuild per collection is in flight (the cell's rebuild
//! slot; duplicate requests coalesce onto the running build id) and a
//! semaphore bounds build concurrency across collections. Failures land in
//! `last_rebuild_error` and leave the installed index untouched.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quiver_core::config::IndexSettings;
use quiver_core::{BuildId, CoreError, CoreResult, IndexType};
use quiver_index::{build_index, IndexParams, VectorIndex};

use crate::registry::CollectionCell;

/// Schedules and runs background index builds.
pub struct RebuildScheduler {
    index_defaults: IndexSettings,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    runtime: tokio::runtime::Handle,
}

impl RebuildScheduler {
    /// Creates a scheduler bound to the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        index_defaults: IndexSettings,
        max_concurrent_builds: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            index_defaults,
            permits: Arc::new(Semaphore::new(max_concurrent_builds.max(1))),
            shutdown,
            runtime: tokio::runtime::Handle::current(),
        }
    }

    /// Enqueues a rebuild for the collection, returning immediately with
    /// the build id. Idempotent: while a rebuild is in flight, further
    /// requests coalesce onto it and get the in-flight id back.
    pub fn schedule(
        scheduler: &Arc<Self>,
        cell: Arc<CollectionCell>,
        kind: IndexType,
        params: IndexParams,
    ) -> BuildId {
        let (build_id, claimed) = cell.claim_rebuild();
        if !claimed {
            debug!(%build_id, "rebuild already in flight, coalescing");
            return build_id;
        }
        let scheduler = Arc::clone(scheduler);
        let runtime = scheduler.runtime.clone();
        runtime.spawn(async move {
            scheduler.run(cell, kind, params, build_id).await;
        });
        build_id
    }

    async fn run(
        self: Arc<Self>,
        cell: Arc<CollectionCell>,
        kind: IndexType,
        params: IndexParams,
        build_id: BuildId,
    ) {
        // Looping on supersession keeps the rebuild claim held, so
        // concurrent requests keep coalescing onto this job.
        loop {
            match self.execute(&cell, kind, params, build_id).await {
                Ok(superseded) => {
                    if superseded && !self.shutdown.is_cancelled() {
                        debug!(%build_id, "rebuild superseded by newer writes, rebuilding");
                        continue;
                    }
                }
                Err(CoreError::Cancelled) => {
                    debug!(%build_id, "rebuild cancelled");
                }
                Err(error) => {
                    warn!(%build_id, %error, "index rebuild failed");
                    cell.write().last_rebuild_error = Some(error.to_string());
                }
            }
            break;
        }
        cell.finish_rebuild(build_id);
    }

    /// Runs one rebuild pass. Returns whether the installed index was
    /// already superseded at install time.
    async fn execute(
        &self,
        cell: &Arc<CollectionCell>,
        kind: IndexType,
        params: IndexParams,
        build_id: BuildId,
    ) -> CoreResult<bool> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Cancelled)?;
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        // Phase 1: snapshot under the read lock.
        let (entries, observed, dimension) = {
            let state = cell.read();
            (
                state.snapshot_entries(),
                state.versions.data_version,
                state.descriptor.dimension as usize,
            )
        };
        let record_count = entries.len();

        // Phase 2: construct off-lock. Index construction is CPU-bound, so
        // it runs on the blocking pool.
        let defaults = self.index_defaults.clone();
        let built: Box<dyn VectorIndex> = tokio::task::spawn_blocking(move || {
            let mut index = build_index(kind, dimension, &params, &defaults)?;
            index.build(entries)?;
            Ok::<_, CoreError>(index)
        })
        .await
        .map_err(|join| CoreError::internal(format!("index build task failed: {join}")))??;

        if self.shutdown.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        // Phase 3: install under the write lock; drop the old instance
        // after releasing it.
        let (old, superseded) = {
            let mut state = cell.write();
            let old = state.index.replace(built);
            state.versions.stamp_index(observed);
            state.last_rebuild_error = None;
            let superseded = state.versions.data_version > observed;
            (old, superseded)
        };
        drop(old);

        info!(
            %build_id,
            index_type = kind.as_str(),
            record_count,
            index_version = observed,
            "index rebuild installed"
        );
        Ok(superseded)
    }
}
