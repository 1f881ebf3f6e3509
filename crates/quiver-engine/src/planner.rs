//! Query planning and execution.
//!
//! The planner runs entirely under the collection read lock and picks one
//! of three strategies:
//! - **Filtered brute-force** whenever a metadata filter is present. The
//!   approximate index never serves filtered queries: a predicate applied
//!   after candidate selection cannot recover records the bucket scheme
//!   already excluded.
//! - **On-the-fly flat scan** when no index is installed, or as the stale
//!   fallback when stale reads are disabled.
//! - **Serve from the installed index**, flagged `stale_index` when the
//!   index is behind the record set.
//!
//! Scans check the request's cancellation token and deadline between
//! fixed-size record batches.

use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use quiver_core::{
    CollectionId, CoreError, CoreResult, GroupId, IndexType, Metadata, RecordFilter, RecordId,
};
use quiver_index::math::cosine_similarity;
use quiver_index::{Neighbor, TopK};

use crate::store::CollectionState;

/// Records scanned between cancellation/deadline checks.
const CONTROL_CHECK_INTERVAL: usize = 256;

/// A kNN query against one collection.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Collection to search.
    pub collection_id: CollectionId,
    /// Query vector; length-checked against the collection dimension and
    /// normalized by the planner.
    pub vector: Vec<f32>,
    /// Number of neighbors requested, at least 1.
    pub k: usize,
    /// Optional metadata filter. A non-empty filter forces the exact
    /// filtered-scan path.
    pub filter: Option<RecordFilter>,
    /// Serve from a stale index rather than scanning. Engine default when
    /// unset.
    pub allow_stale: Option<bool>,
    /// When stale reads are disabled, scan instead of failing. Engine
    /// default when unset.
    pub use_fallback_on_stale: Option<bool>,
    /// Deadline for the whole query, including lock acquisition.
    pub deadline: Option<Instant>,
    /// Cooperative cancellation token, checked between scan batches.
    pub cancel: Option<CancellationToken>,
}

impl QueryRequest {
    /// Creates a request with engine-default policies.
    #[must_use]
    pub fn new(collection_id: CollectionId, vector: Vec<f32>, k: usize) -> Self {
        Self {
            collection_id,
            vector,
            k,
            filter: None,
            allow_stale: None,
            use_fallback_on_stale: None,
            deadline: None,
            cancel: None,
        }
    }

    /// Sets the metadata filter (builder pattern).
    #[must_use]
    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Overrides the stale-read policy (builder pattern).
    #[must_use]
    pub fn allow_stale(mut self, allow: bool) -> Self {
        self.allow_stale = Some(allow);
        self
    }

    /// Overrides the stale-fallback policy (builder pattern).
    #[must_use]
    pub fn use_fallback_on_stale(mut self, fallback: bool) -> Self {
        self.use_fallback_on_stale = Some(fallback);
        self
    }

    /// Sets the deadline (builder pattern).
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attaches a cancellation token (builder pattern).
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// One scored hit with its record fields.
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    /// Matching record.
    pub record_id: RecordId,
    /// Cosine similarity to the query.
    pub score: f32,
    /// Group the record belongs to.
    pub group_id: GroupId,
    /// Record text payload.
    pub text: String,
    /// Record metadata.
    pub metadata: Metadata,
}

/// Result of a query, including how it was executed.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    /// Up to k hits, best first.
    pub hits: Vec<QueryHit>,
    /// True when served from an index behind the record set.
    pub stale_index: bool,
    /// Index family that produced the hits; scans report `flat`.
    pub index_type_used: IndexType,
    /// Candidates scored: collection size for full scans, match count for
    /// filtered scans, candidate-set size for LSH.
    pub considered_count: usize,
}

/// Deadline and cancellation observed cooperatively during execution.
pub(crate) struct QueryControl {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl QueryControl {
    pub(crate) fn new(deadline: Option<Instant>, cancel: Option<CancellationToken>) -> Self {
        Self {
            deadline,
            cancel: cancel.unwrap_or_default(),
        }
    }

    /// Fails with `Cancelled` or `DeadlineExceeded` when either tripped.
    pub(crate) fn check(&self) -> CoreResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CoreError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Budget left until the deadline; errors when already past it.
    pub(crate) fn remaining(&self) -> CoreResult<Option<std::time::Duration>> {
        match self.deadline {
            None => Ok(None),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    Err(CoreError::DeadlineExceeded)
                } else {
                    Ok(Some(deadline - now))
                }
            }
        }
    }
}

/// Chosen execution strategy plus whether to kick off a rebuild afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionPlan {
    /// Exact scan restricted to filter matches.
    FilteredScan,
    /// Exact scan over all records.
    FullScan,
    /// Serve from the installed index.
    ServeIndex {
        /// The index is behind the record set; the response is flagged.
        stale: bool,
    },
}

/// Applies the execution decision table.
///
/// Returns the plan and whether a background rebuild should be scheduled
/// once the read lock is released.
pub(crate) fn choose_plan(
    has_filter: bool,
    index_installed: bool,
    has_records: bool,
    stale: bool,
    allow_stale: bool,
    use_fallback_on_stale: bool,
) -> CoreResult<(ExecutionPlan, bool)> {
    if has_filter {
        return Ok((ExecutionPlan::FilteredScan, false));
    }
    if !index_installed {
        // First query against an unindexed collection also primes a build.
        return Ok((ExecutionPlan::FullScan, has_records));
    }
    if stale {
        if allow_stale {
            return Ok((ExecutionPlan::ServeIndex { stale: true }, true));
        }
        if use_fallback_on_stale {
            return Ok((ExecutionPlan::FullScan, true));
        }
        return Err(CoreError::IndexStale);
    }
    Ok((ExecutionPlan::ServeIndex { stale: false }, false))
}

/// Exact brute-force scan over the collection's records, optionally
/// restricted by a filter. Returns neighbors plus the number of records
/// scored.
pub(crate) fn scan_records(
    state: &CollectionState,
    query: &[f32],
    k: usize,
    filter: Option<&RecordFilter>,
    control: &QueryControl,
) -> CoreResult<(Vec<Neighbor>, usize)> {
    let mut topk = TopK::new(k);
    let mut considered = 0;
    for (visited, record) in state.records.values().enumerate() {
        if visited % CONTROL_CHECK_INTERVAL == 0 {
            control.check()?;
        }
        if let Some(filter) = filter {
            if !filter.matches(record) {
                continue;
            }
        }
        considered += 1;
        topk.push(record.record_id, cosine_similarity(query, &record.embedding));
    }
    Ok((topk.into_sorted_vec(), considered))
}

/// Joins scored neighbors back to their records.
pub(crate) fn hydrate(
    state: &CollectionState,
    neighbors: Vec<Neighbor>,
) -> CoreResult<Vec<QueryHit>> {
    neighbors
        .into_iter()
        .map(|neighbor| {
            let record = state.records.get(&neighbor.id).ok_or_else(|| {
                CoreError::internal(format!(
                    "index returned unknown record {}",
                    neighbor.id
                ))
            })?;
            Ok(QueryHit {
                record_id: record.record_id,
                score: neighbor.score,
                group_id: record.group_id,
                text: record.text.clone(),
                metadata: record.metadata.clone(),
            })
        })
        .collect()
}
