//! Core domain types for the Quiver vector search engine.

pub mod collection;
pub mod config;
pub mod error;
pub mod filter;
pub mod group;
pub mod ids;
pub mod metadata;
pub mod record;

pub use collection::{CollectionDescriptor, CollectionPatch, IndexType};
pub use config::QuiverConfig;
pub use error::{CoreError, CoreResult};
pub use filter::RecordFilter;
pub use group::{GroupDescriptor, GroupPatch};
pub use ids::{BuildId, CollectionId, GroupId, RecordId};
pub use metadata::Metadata;
pub use record::{Record, RecordPatch};
