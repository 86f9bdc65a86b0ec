//! Store adapters: in-memory maps with optional JSON snapshot durability

pub mod memory;
pub mod snapshot;

pub use memory::{MemoryAssociationStore, MemoryNotificationStore, MemoryPositionStore};
pub use snapshot::SnapshotFile;
