//! warm-tier bundle subsystem
//!
//! a bundle is an immutable flat batch of objects living in the remote
//! bucket: fixed header, payloads in oid order, then a fixed-size index.
//! the writer seals and rotates bundles, the reader serves lookups and
//! range reads, and the compactor folds small or fragmented bundles into
//! fresh live-only ones.

pub mod compactor;
pub mod format;
pub mod reader;
pub mod writer;

pub use compactor::{compact, CompactionOptions, CompactionReport};
pub use format::{Bundle, BundleEntry, BundleHeader, BUNDLE_HEADER_SIZE, BUNDLE_INDEX_ENTRY_SIZE};
pub use reader::BundleReader;
pub use writer::{BundleWriter, SealedBundle};
