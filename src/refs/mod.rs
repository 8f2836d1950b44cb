//! reference store and the branch/tag/worktree namespaces
//!
//! refs are rows: direct refs hold an oid, symbolic refs hold another ref
//! name. `HEAD` is the top-level symbolic ref; branches live under
//! `refs/heads/`, tags under `refs/tags/`, remote-tracking refs under
//! `refs/remotes/`, per-worktree heads under `refs/worktrees/<slug>/`.

pub mod branch;
pub mod tag;
pub mod worktree;

pub use branch::{
    create_branch, checkout_branch, delete_branches, get_upstream, list_branches, rename_branch,
    set_upstream, BranchInfo, CheckoutOptions, CreateBranchOptions, DeleteBranchOptions,
    ListBranchOptions,
};
pub use tag::{create_tag, delete_tag, list_tags, resolve_tag_to_commit, TagInfo, TagOptions};
pub use worktree::{
    add_worktree, list_worktrees, lock_worktree, move_worktree, prune_worktrees, remove_worktree,
    unlock_worktree, Worktree, worktree_slug,
};

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::store::row::{decode_row, encode_row, RowStore, Table};
use crate::store::wal::{RefOp, Wal, WalRecord};

/// prefix of branch refs
pub const HEADS_PREFIX: &str = "refs/heads/";
/// prefix of tag refs
pub const TAGS_PREFIX: &str = "refs/tags/";
/// prefix of remote-tracking refs
pub const REMOTES_PREFIX: &str = "refs/remotes/";
/// prefix of per-worktree heads
pub const WORKTREES_PREFIX: &str = "refs/worktrees/";
/// the top-level symbolic head
pub const HEAD: &str = "HEAD";

/// what a ref points at
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefTarget {
    Direct(Oid),
    Symbolic(String),
}

/// a named reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ref {
    pub name: String,
    pub target: RefTarget,
}

#[derive(Serialize, Deserialize)]
struct RefRow {
    symbolic: bool,
    target: String,
}

/// the reference store
///
/// strongly consistent within the isolate; compound operations are built
/// from these atomic primitives plus explicit precondition checks. every
/// mutation lands in the WAL as `{op, name, old, new}`.
pub struct RefStore {
    rows: Arc<dyn RowStore>,
    wal: Arc<Wal>,
}

impl RefStore {
    pub fn new(rows: Arc<dyn RowStore>, wal: Arc<Wal>) -> Self {
        Self { rows, wal }
    }

    pub(crate) fn rows(&self) -> &Arc<dyn RowStore> {
        &self.rows
    }

    /// read a ref; None when absent (an expected miss, not an error)
    pub fn get(&self, name: &str) -> Result<Option<Ref>> {
        match self.rows.get(Table::Refs, name.as_bytes())? {
            Some(bytes) => {
                let row: RefRow = decode_row(&bytes)?;
                let target = if row.symbolic {
                    RefTarget::Symbolic(row.target)
                } else {
                    RefTarget::Direct(Oid::from_hex(&row.target)?)
                };
                Ok(Some(Ref {
                    name: name.to_string(),
                    target,
                }))
            }
            None => Ok(None),
        }
    }

    /// create or update a direct ref
    pub fn set(&self, name: &str, oid: &Oid) -> Result<()> {
        validate_ref_name(name)?;
        let old = self.current_target(name)?;
        self.put_row(
            name,
            &RefRow {
                symbolic: false,
                target: oid.to_hex(),
            },
        )?;
        self.log(RefOp::Set, name, old, Some(oid.to_hex()))?;
        Ok(())
    }

    /// create or update a symbolic ref
    pub fn set_symbolic(&self, name: &str, target: &str) -> Result<()> {
        validate_ref_name(name)?;
        validate_ref_name(target)?;
        let old = self.current_target(name)?;
        self.put_row(
            name,
            &RefRow {
                symbolic: true,
                target: target.to_string(),
            },
        )?;
        self.log(RefOp::SetSymbolic, name, old, Some(target.to_string()))?;
        Ok(())
    }

    /// the symbolic target of a ref, if it is symbolic
    pub fn get_symbolic(&self, name: &str) -> Result<Option<String>> {
        Ok(match self.get(name)? {
            Some(Ref {
                target: RefTarget::Symbolic(target),
                ..
            }) => Some(target),
            _ => None,
        })
    }

    /// delete a ref, returning whether it existed
    pub fn delete(&self, name: &str) -> Result<bool> {
        let old = self.current_target(name)?;
        let existed = self.rows.delete(Table::Refs, name.as_bytes())?;
        if existed {
            self.log(RefOp::Delete, name, old, None)?;
        }
        Ok(existed)
    }

    /// refs under a name prefix, in name order
    pub fn list_by_prefix(&self, prefix: &str) -> Result<Vec<Ref>> {
        let mut refs = Vec::new();
        for (key, bytes) in self.rows.scan_prefix(Table::Refs, prefix.as_bytes(), None)? {
            let name = String::from_utf8(key)
                .map_err(|_| Error::RowDecode("non-utf8 ref name".to_string()))?;
            let row: RefRow = decode_row(&bytes)?;
            let target = if row.symbolic {
                RefTarget::Symbolic(row.target)
            } else {
                RefTarget::Direct(Oid::from_hex(&row.target)?)
            };
            refs.push(Ref { name, target });
        }
        Ok(refs)
    }

    /// resolve a ref to an oid, peeling symbolic refs
    ///
    /// a cycle among symbolic refs fails rather than spinning.
    pub fn resolve(&self, name: &str) -> Result<Option<Oid>> {
        let mut seen = HashSet::new();
        let mut current = name.to_string();
        loop {
            if !seen.insert(current.clone()) {
                return Err(Error::SymbolicRefCycle(current));
            }
            match self.get(&current)? {
                Some(Ref {
                    target: RefTarget::Direct(oid),
                    ..
                }) => return Ok(Some(oid)),
                Some(Ref {
                    target: RefTarget::Symbolic(next),
                    ..
                }) => current = next,
                None => return Ok(None),
            }
        }
    }

    /// compare-and-set update
    ///
    /// `expected_old` must match the ref's current direct value (None =
    /// must not exist); `new` of None deletes. the row store makes the
    /// final write atomic; the precondition check is what compound ops
    /// build on.
    pub fn update(&self, name: &str, expected_old: Option<&Oid>, new: Option<&Oid>) -> Result<()> {
        let current = match self.get(name)? {
            Some(Ref {
                target: RefTarget::Direct(oid),
                ..
            }) => Some(oid),
            Some(Ref {
                target: RefTarget::Symbolic(_),
                ..
            }) => {
                return Err(Error::RefConflict(format!(
                    "{name} is symbolic, not updatable by value"
                )))
            }
            None => None,
        };
        if current.as_ref() != expected_old {
            return Err(Error::RefConflict(format!(
                "{name} changed underneath the update"
            )));
        }
        match new {
            Some(oid) => self.set(name, oid),
            None => self.delete(name).map(|_| ()),
        }
    }

    // HEAD helpers

    /// what HEAD resolves to, if anything
    pub fn resolve_head(&self) -> Result<Option<Oid>> {
        self.resolve(HEAD)
    }

    /// the branch HEAD points at, when not detached
    pub fn current_branch(&self) -> Result<Option<String>> {
        Ok(self
            .get_symbolic(HEAD)?
            .and_then(|t| t.strip_prefix(HEADS_PREFIX).map(str::to_string)))
    }

    /// point HEAD at a branch (symbolic)
    pub fn set_head_branch(&self, branch: &str) -> Result<()> {
        self.set_symbolic(HEAD, &format!("{HEADS_PREFIX}{branch}"))
    }

    /// detach HEAD at an oid
    pub fn detach_head(&self, oid: &Oid) -> Result<()> {
        let old = self.current_target(HEAD)?;
        self.put_row(
            HEAD,
            &RefRow {
                symbolic: false,
                target: oid.to_hex(),
            },
        )?;
        self.log(RefOp::Set, HEAD, old, Some(oid.to_hex()))?;
        Ok(())
    }

    fn current_target(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get(name)?.map(|r| match r.target {
            RefTarget::Direct(oid) => oid.to_hex(),
            RefTarget::Symbolic(target) => target,
        }))
    }

    fn put_row(&self, name: &str, row: &RefRow) -> Result<()> {
        self.rows.put(Table::Refs, name.as_bytes(), &encode_row(row)?)
    }

    fn log(&self, op: RefOp, name: &str, old: Option<String>, new: Option<String>) -> Result<()> {
        trace!(%name, ?op, "ref update");
        self.wal.append(WalRecord::Ref {
            op,
            name: name.to_string(),
            old,
            new,
        })?;
        Ok(())
    }
}

/// validate a ref name (branch names have stricter rules on top)
pub fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidRefName("empty ref name".to_string()));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(Error::InvalidRefName(format!(
            "ref name cannot start or end with '/': {name}"
        )));
    }
    if name.contains("//") {
        return Err(Error::InvalidRefName(format!(
            "ref name cannot contain '//': {name}"
        )));
    }
    if name.contains('\0') {
        return Err(Error::InvalidRefName(format!(
            "ref name cannot contain NUL: {name}"
        )));
    }
    for component in name.split('/') {
        if component == "." || component == ".." {
            return Err(Error::InvalidRefName(format!(
                "ref name cannot contain '.' or '..' components: {name}"
            )));
        }
    }
    Ok(())
}
