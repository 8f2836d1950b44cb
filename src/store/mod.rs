//! storage layer: host capabilities, cache, WAL, and the object store

pub mod bucket;
pub mod cache;
pub mod objects;
pub mod row;
pub mod wal;

pub use bucket::{MemoryBucket, ObjectBucket};
pub use cache::{EvictReason, LruCache};
pub use objects::{MetricsSnapshot, ObjectStore, Tier};
pub use row::{MemoryRowStore, RowStore, Table};
pub use wal::{ObjectOp, RefOp, Wal, WalEntry, WalRecord};
