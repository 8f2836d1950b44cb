//! gitcell - embedded git-compatible repository engine
//!
//! a content-addressed object-graph engine meant to live inside a stateful
//! isolate: one engine instance owns one repository, a transactional row
//! store holds the hot tier and all metadata, and large payloads ride in
//! immutable bundles in a remote object bucket.
//!
//! # Core concepts
//!
//! - **Object store**: blobs, trees, commits, and tags addressed by the
//!   SHA-1 of their framed bytes, with hot/warm tiering and an LRU cache
//! - **Pack codec**: the git pack v2 wire format with deltas, plus the
//!   fanout-indexed pack index v2
//! - **Bundle subsystem**: flat warm-tier batches with a rotating writer,
//!   a range-reading reader, and a two-phase compactor
//! - **Ref store**: direct and symbolic refs with branch, tag, and
//!   worktree namespaces on top
//! - **Graph ops**: traversal and merge bases, three-way merge with
//!   conflict state, tree diff with rename detection, blame, sparse
//!   filters, and mirror sync
//!
//! # Example usage
//!
//! ```no_run
//! use gitcell::{Config, Repository};
//! use gitcell::object::{EntryMode, Tree, TreeEntry};
//!
//! let repo = Repository::in_memory(
//!     Config::default().with_identity("engine", "engine@example.com"),
//! ).unwrap();
//!
//! let blob = repo.objects().put_blob(b"hello\n").unwrap();
//! let tree = Tree::new(vec![TreeEntry::new(EntryMode::Regular, "greeting.txt", blob)]).unwrap();
//! let tree_oid = repo.objects().put_tree(&tree).unwrap();
//! let commit = repo.commit_tree(&tree_oid, vec![], "initial commit\n").unwrap();
//! assert_eq!(repo.head().unwrap(), Some(commit));
//! ```

mod cancel;
mod config;
mod error;
mod oid;
mod repo;

pub mod bundle;
pub mod object;
pub mod ops;
pub mod pack;
pub mod refs;
pub mod store;

pub use cancel::CancelToken;
pub use config::{Config, Identity};
pub use error::{Error, Result};
pub use oid::{hash_object, ObjectHasher, Oid, ShortOid};
pub use repo::Repository;

pub use object::{Commit, Kind, Signature, Tag, Tree, TreeEntry};
pub use store::{MemoryBucket, MemoryRowStore, ObjectBucket, ObjectStore, RowStore};
