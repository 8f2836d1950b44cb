//! high-level operations over the object graph

pub mod blame;
pub mod diff;
pub mod merge;
pub mod mirror;
pub mod sparse;
pub mod walk;

pub use blame::{blame, BlameLine};
pub use diff::{diff_trees, DiffEntry, DiffOptions, DiffStatus};
pub use merge::{
    abort_merge, continue_merge, merge, merge_state, resolve_conflict, ConflictKind,
    ConflictResolution, MergeConflict, MergeOptions, MergeOutcome, MergeState, ResolvedConflict,
};
pub use mirror::{
    mirror_sync, LoopbackRemote, MirrorConflictStrategy, MirrorOptions, Remote, SyncDirection,
    SyncReport,
};
pub use sparse::SparseFilter;
pub use walk::{
    ahead_behind, find_all_merge_bases, find_fork_point, find_merge_base,
    find_octopus_merge_base, is_ancestor, resolve_rev_range, walk_commits, WalkOptions,
    WalkStrategy,
};

use crate::error::Result;
use crate::oid::Oid;
use crate::store::objects::ObjectStore;

/// look up the entry oid at a slash-separated path inside a tree
pub(crate) fn tree_entry_at_path(
    objects: &ObjectStore,
    tree: &Oid,
    path: &str,
) -> Result<Option<Oid>> {
    let mut current = *tree;
    let mut components = path.split('/').peekable();
    while let Some(component) = components.next() {
        let tree = objects.get_tree(&current)?;
        let Some(entry) = tree.get(component) else {
            return Ok(None);
        };
        if components.peek().is_none() {
            return Ok(Some(entry.oid));
        }
        if !entry.mode.is_subtree() {
            return Ok(None);
        }
        current = entry.oid;
    }
    Ok(None)
}
