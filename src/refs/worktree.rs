use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::refs::{RefStore, HEADS_PREFIX, WORKTREES_PREFIX};
use crate::store::row::{decode_row, encode_row, Table};
use crate::store::wal::unix_now;

/// a linked worktree record
///
/// the main worktree is implicit (it owns the top-level HEAD); records
/// exist only for linked worktrees, each with its own head ref under
/// `refs/worktrees/<slug>/HEAD`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worktree {
    pub path: String,
    pub slug: String,
    /// checked-out branch; None when detached
    pub branch: Option<String>,
    /// lock reason when locked
    pub locked: Option<String>,
    pub created_at: i64,
}

/// normalize a worktree path into a ref-safe slug
pub fn worktree_slug(path: &str) -> String {
    let slug: String = path
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if slug.is_empty() {
        "root".to_string()
    } else {
        slug
    }
}

fn head_ref(slug: &str) -> String {
    format!("{WORKTREES_PREFIX}{slug}/HEAD")
}

/// register a worktree and give it a head
///
/// a branch may be checked out in at most one worktree (the main one
/// included) unless `force`.
pub fn add_worktree(
    refs: &RefStore,
    path: &str,
    branch: Option<&str>,
    detach_at: Option<&Oid>,
    force: bool,
) -> Result<Worktree> {
    let slug = worktree_slug(path);
    if get_worktree(refs, &slug)?.is_some() {
        return Err(Error::Worktree(format!("worktree already exists at {path}")));
    }

    if let Some(branch) = branch {
        if !force {
            if refs.current_branch()?.as_deref() == Some(branch) {
                return Err(Error::Worktree(format!(
                    "branch {branch} is checked out in the main worktree"
                )));
            }
            for other in list_worktrees(refs)? {
                if other.branch.as_deref() == Some(branch) {
                    return Err(Error::Worktree(format!(
                        "branch {branch} is checked out at {}",
                        other.path
                    )));
                }
            }
        }
        refs.set_symbolic(&head_ref(&slug), &format!("{HEADS_PREFIX}{branch}"))?;
    } else if let Some(oid) = detach_at {
        refs.set(&head_ref(&slug), oid)?;
    } else {
        return Err(Error::Worktree("worktree needs a branch or a commit".to_string()));
    }

    let worktree = Worktree {
        path: path.to_string(),
        slug: slug.clone(),
        branch: branch.map(str::to_string),
        locked: None,
        created_at: unix_now(),
    };
    put_worktree(refs, &worktree)?;
    debug!(path, slug, "added worktree");
    Ok(worktree)
}

/// all linked worktrees
pub fn list_worktrees(refs: &RefStore) -> Result<Vec<Worktree>> {
    refs.rows()
        .scan_prefix(Table::Worktrees, &[], None)?
        .iter()
        .map(|(_, bytes)| decode_row(bytes))
        .collect()
}

/// lock a worktree with a reason
pub fn lock_worktree(refs: &RefStore, path: &str, reason: &str) -> Result<()> {
    let mut worktree = require(refs, path)?;
    worktree.locked = Some(reason.to_string());
    put_worktree(refs, &worktree)
}

/// unlock a worktree
pub fn unlock_worktree(refs: &RefStore, path: &str) -> Result<()> {
    let mut worktree = require(refs, path)?;
    worktree.locked = None;
    put_worktree(refs, &worktree)
}

/// remove a linked worktree and its head ref
///
/// the main worktree has no record here and so can never be removed; a
/// locked worktree needs `force`.
pub fn remove_worktree(refs: &RefStore, path: &str, force: bool) -> Result<()> {
    let worktree = require(refs, path)?;
    if let Some(reason) = &worktree.locked {
        if !force {
            return Err(Error::Worktree(format!(
                "worktree {path} is locked: {reason}"
            )));
        }
    }
    refs.delete(&head_ref(&worktree.slug))?;
    refs.rows().delete(Table::Worktrees, worktree.slug.as_bytes())?;
    debug!(path, "removed worktree");
    Ok(())
}

/// move a worktree to a new path; locked worktrees need `force`
pub fn move_worktree(refs: &RefStore, from: &str, to: &str, force: bool) -> Result<Worktree> {
    let worktree = require(refs, from)?;
    if let Some(reason) = &worktree.locked {
        if !force {
            return Err(Error::Worktree(format!(
                "worktree {from} is locked: {reason}"
            )));
        }
    }
    let new_slug = worktree_slug(to);
    if get_worktree(refs, &new_slug)?.is_some() {
        return Err(Error::Worktree(format!("worktree already exists at {to}")));
    }

    // re-key the head ref then the record
    let old_head = refs.get(&head_ref(&worktree.slug))?;
    if let Some(old_head) = old_head {
        match old_head.target {
            super::RefTarget::Direct(oid) => refs.set(&head_ref(&new_slug), &oid)?,
            super::RefTarget::Symbolic(target) => refs.set_symbolic(&head_ref(&new_slug), &target)?,
        }
    }
    refs.delete(&head_ref(&worktree.slug))?;
    refs.rows().delete(Table::Worktrees, worktree.slug.as_bytes())?;

    let moved = Worktree {
        path: to.to_string(),
        slug: new_slug,
        ..worktree
    };
    put_worktree(refs, &moved)?;
    Ok(moved)
}

/// drop worktrees the runtime declares stale; locked ones are kept
pub fn prune_worktrees(
    refs: &RefStore,
    is_stale: impl Fn(&Worktree) -> bool,
) -> Result<Vec<String>> {
    let mut pruned = Vec::new();
    for worktree in list_worktrees(refs)? {
        if worktree.locked.is_some() || !is_stale(&worktree) {
            continue;
        }
        refs.delete(&head_ref(&worktree.slug))?;
        refs.rows().delete(Table::Worktrees, worktree.slug.as_bytes())?;
        pruned.push(worktree.path);
    }
    Ok(pruned)
}

fn get_worktree(refs: &RefStore, slug: &str) -> Result<Option<Worktree>> {
    match refs.rows().get(Table::Worktrees, slug.as_bytes())? {
        Some(bytes) => Ok(Some(decode_row(&bytes)?)),
        None => Ok(None),
    }
}

fn require(refs: &RefStore, path: &str) -> Result<Worktree> {
    get_worktree(refs, &worktree_slug(path))?
        .ok_or_else(|| Error::Worktree(format!("no worktree at {path}")))
}

fn put_worktree(refs: &RefStore, worktree: &Worktree) -> Result<()> {
    refs.rows().put(
        Table::Worktrees,
        worktree.slug.as_bytes(),
        &encode_row(worktree)?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::row::{MemoryRowStore, RowStore};
    use crate::store::wal::Wal;
    use std::sync::Arc;

    fn store() -> RefStore {
        let rows: Arc<dyn RowStore> = Arc::new(MemoryRowStore::new());
        let wal = Arc::new(Wal::open(rows.clone()).unwrap());
        RefStore::new(rows, wal)
    }

    fn oid(n: u8) -> Oid {
        Oid::from_bytes([n; 20])
    }

    #[test]
    fn test_slug_normalization() {
        assert_eq!(worktree_slug("/srv/checkouts/api"), "srv-checkouts-api");
        assert_eq!(worktree_slug("simple"), "simple");
        assert_eq!(worktree_slug("/"), "root");
        assert_eq!(worktree_slug("a b/c.d"), "a-b-c-d");
    }

    #[test]
    fn test_add_and_list() {
        let refs = store();
        refs.set("refs/heads/feature", &oid(1)).unwrap();

        let worktree = add_worktree(&refs, "/wt/feature", Some("feature"), None, false).unwrap();
        assert_eq!(worktree.branch.as_deref(), Some("feature"));

        // the worktree head resolves through its branch
        assert_eq!(
            refs.resolve("refs/worktrees/wt-feature/HEAD").unwrap(),
            Some(oid(1))
        );
        assert_eq!(list_worktrees(&refs).unwrap().len(), 1);
    }

    #[test]
    fn test_add_detached() {
        let refs = store();
        let worktree = add_worktree(&refs, "/wt/pinned", None, Some(&oid(7)), false).unwrap();
        assert!(worktree.branch.is_none());
        assert_eq!(
            refs.resolve(&head_ref(&worktree.slug)).unwrap(),
            Some(oid(7))
        );
    }

    #[test]
    fn test_branch_exclusivity() {
        let refs = store();
        refs.set("refs/heads/main", &oid(1)).unwrap();
        refs.set("refs/heads/shared", &oid(2)).unwrap();
        refs.set_head_branch("main").unwrap();

        // main is held by the main worktree
        assert!(matches!(
            add_worktree(&refs, "/wt/a", Some("main"), None, false),
            Err(Error::Worktree(_))
        ));

        add_worktree(&refs, "/wt/b", Some("shared"), None, false).unwrap();
        assert!(matches!(
            add_worktree(&refs, "/wt/c", Some("shared"), None, false),
            Err(Error::Worktree(_))
        ));
        // force overrides
        add_worktree(&refs, "/wt/c", Some("shared"), None, true).unwrap();
    }

    #[test]
    fn test_lock_blocks_remove_and_move() {
        let refs = store();
        refs.set("refs/heads/x", &oid(1)).unwrap();
        add_worktree(&refs, "/wt/x", Some("x"), None, false).unwrap();
        lock_worktree(&refs, "/wt/x", "long build running").unwrap();

        assert!(matches!(
            remove_worktree(&refs, "/wt/x", false),
            Err(Error::Worktree(_))
        ));
        assert!(matches!(
            move_worktree(&refs, "/wt/x", "/wt/y", false),
            Err(Error::Worktree(_))
        ));

        unlock_worktree(&refs, "/wt/x").unwrap();
        remove_worktree(&refs, "/wt/x", false).unwrap();
        assert!(list_worktrees(&refs).unwrap().is_empty());
    }

    #[test]
    fn test_remove_force_overrides_lock() {
        let refs = store();
        refs.set("refs/heads/x", &oid(1)).unwrap();
        add_worktree(&refs, "/wt/x", Some("x"), None, false).unwrap();
        lock_worktree(&refs, "/wt/x", "pinned").unwrap();
        remove_worktree(&refs, "/wt/x", true).unwrap();
        assert!(refs.get("refs/worktrees/wt-x/HEAD").unwrap().is_none());
    }

    #[test]
    fn test_move_rekeys_head() {
        let refs = store();
        refs.set("refs/heads/x", &oid(1)).unwrap();
        add_worktree(&refs, "/wt/old", Some("x"), None, false).unwrap();

        let moved = move_worktree(&refs, "/wt/old", "/wt/new", false).unwrap();
        assert_eq!(moved.path, "/wt/new");
        assert!(refs.get("refs/worktrees/wt-old/HEAD").unwrap().is_none());
        assert_eq!(
            refs.resolve("refs/worktrees/wt-new/HEAD").unwrap(),
            Some(oid(1))
        );
    }

    #[test]
    fn test_prune_skips_locked() {
        let refs = store();
        refs.set("refs/heads/a", &oid(1)).unwrap();
        refs.set("refs/heads/b", &oid(2)).unwrap();
        add_worktree(&refs, "/wt/a", Some("a"), None, false).unwrap();
        add_worktree(&refs, "/wt/b", Some("b"), None, false).unwrap();
        lock_worktree(&refs, "/wt/b", "keep").unwrap();

        let pruned = prune_worktrees(&refs, |_| true).unwrap();
        assert_eq!(pruned, vec!["/wt/a".to_string()]);
        assert_eq!(list_worktrees(&refs).unwrap().len(), 1);
    }
}
