//! The Quiver engine: hierarchical collections of text-plus-embedding
//! records with pluggable kNN indexing.
//!
//! The [`Engine`] facade exposes the programmatic surface consumed by outer
//! layers (HTTP, replication): collection / group / record CRUD, index
//! builds and status, kNN queries, and logical-state snapshot
//! export/import. Internally each collection owns a reader-writer lock
//! guarding its records, version counters, and installed index; background
//! rebuilds snapshot under a read lock, construct off-lock, and install
//! with an atomic swap under the write lock.

pub mod embed;
pub mod engine;
pub mod planner;
pub mod rebuild;
pub mod registry;
pub mod snapshot;
pub mod store;

pub use embed::{EmbeddingProvider, MockEmbeddingProvider};
pub use engine::{Engine, IndexStatus, NewRecord};
pub use planner::{QueryHit, QueryRequest, QueryResponse};
pub use snapshot::{CollectionSnapshot, Snapshot};
