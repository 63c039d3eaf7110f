//! formcrawl-store: durable per-unit crawl checkpoints
//!
//! One JSON record per (partition, unit), rewritten atomically after every
//! processed item. The record is the sole source of truth for a unit's
//! progress: re-running a crawl resumes every unit from its record alone.

pub mod checkpoint;
pub mod error;
pub mod partition;
pub mod store;

pub use checkpoint::{
    CURRENT_FORMAT_VERSION, Checkpoint, CheckpointId, ItemState, UnitState,
};
pub use error::StoreError;
pub use partition::{ALL_SENTINEL, InvalidPartitionKey, PartitionKey};
pub use store::CheckpointStore;
