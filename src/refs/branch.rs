use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::ops::walk::{ahead_behind, is_ancestor};
use crate::refs::{validate_ref_name, RefStore, RefTarget, HEADS_PREFIX, REMOTES_PREFIX, TAGS_PREFIX};
use crate::store::objects::ObjectStore;
use crate::store::row::{decode_row, encode_row, Table};

#[derive(Serialize, Deserialize)]
struct UpstreamRow {
    upstream: String,
}

/// options for [`create_branch`]
#[derive(Clone, Debug, Default)]
pub struct CreateBranchOptions {
    /// overwrite an existing branch
    pub force: bool,
    /// point HEAD at the new branch
    pub checkout: bool,
}

/// options for [`delete_branches`]
#[derive(Clone, Debug, Default)]
pub struct DeleteBranchOptions {
    /// delete even when not merged
    pub force: bool,
    /// require the branch to be reachable from the default branch
    pub check_merged: bool,
    /// delete a remote-tracking branch under this remote instead
    pub remote: Option<String>,
}

/// options for [`checkout_branch`]
#[derive(Clone, Debug, Default)]
pub struct CheckoutOptions {
    /// branch name to check out
    pub name: Option<String>,
    /// commit to check out (detaches unless `create`)
    pub sha: Option<String>,
    /// create the branch first
    pub create: bool,
    /// detach HEAD at the resolved commit
    pub detach: bool,
    /// record this upstream on the branch
    pub track: Option<String>,
}

/// options for [`list_branches`]
#[derive(Clone, Debug, Default)]
pub struct ListBranchOptions {
    /// list remote-tracking branches of this remote
    pub remote: Option<String>,
    /// list local and all remote-tracking branches
    pub all: bool,
    /// glob filter on the short name
    pub pattern: Option<String>,
    /// only branches containing this commit
    pub contains: Option<String>,
    /// only branches merged into the default branch
    pub merged: bool,
    /// only branches not merged into the default branch
    pub no_merged: bool,
    /// `name` or `committerdate`; a `-` prefix reverses
    pub sort: Option<String>,
    /// include upstream tracking lag
    pub verbose: bool,
}

/// a listed branch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchInfo {
    /// short name (no `refs/heads/` or `refs/remotes/` prefix)
    pub name: String,
    pub oid: Oid,
    pub is_current: bool,
    /// committer timestamp of the tip, for date sorting
    pub committed_at: i64,
    /// `(upstream, ahead, behind)` when verbose and tracking is set
    pub upstream: Option<(String, usize, usize)>,
}

/// validate a branch name against the git rules
pub fn validate_branch_name(name: &str) -> Result<()> {
    let fail = |why: &str| Err(Error::InvalidBranchName(format!("{why}: {name}")));

    if name.is_empty() {
        return fail("empty name");
    }
    if name == "@" {
        return fail("'@' alone is not a branch name");
    }
    if name.starts_with('-') {
        return fail("cannot start with '-'");
    }
    if name.contains("..") {
        return fail("cannot contain '..'");
    }
    if name.contains("@{") {
        return fail("cannot contain '@{'");
    }
    if name.ends_with(".lock") {
        return fail("cannot end with '.lock'");
    }
    if name.ends_with('.') {
        return fail("cannot end with '.'");
    }
    for c in name.chars() {
        if c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
            return fail("contains a forbidden character");
        }
    }
    for component in name.split('/') {
        if component.starts_with('.') {
            return fail("component cannot start with '.'");
        }
    }
    // the general ref rules (no //, no leading/trailing /, ...) still apply
    validate_ref_name(name)
}

/// resolve a start point: oid (full or short), then branch, then tag;
/// `HEAD` resolves through the head ref
pub fn resolve_start_point(objects: &ObjectStore, refs: &RefStore, s: &str) -> Result<Option<Oid>> {
    if s == super::HEAD {
        return refs.resolve_head();
    }
    if s.len() >= 4 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Some(oid) = objects.resolve_oid(s)? {
            return Ok(Some(oid));
        }
    }
    if let Some(oid) = refs.resolve(&format!("{HEADS_PREFIX}{s}"))? {
        return Ok(Some(oid));
    }
    if let Some(oid) = refs.resolve(&format!("{TAGS_PREFIX}{s}"))? {
        // tag refs may point at annotated tag objects; peel to the commit
        return Ok(Some(super::tag::resolve_tag_to_commit(objects, &oid)?));
    }
    if let Some(oid) = refs.resolve(s)? {
        return Ok(Some(oid));
    }
    Ok(None)
}

/// create a branch at a start point (HEAD when absent)
pub fn create_branch(
    objects: &ObjectStore,
    refs: &RefStore,
    name: &str,
    start_point: Option<&str>,
    options: &CreateBranchOptions,
) -> Result<Oid> {
    validate_branch_name(name)?;

    let target = match start_point {
        Some(s) => resolve_start_point(objects, refs, s)?
            .ok_or_else(|| Error::RefNotFound(s.to_string()))?,
        None => refs
            .resolve_head()?
            .ok_or_else(|| Error::RefNotFound("HEAD".to_string()))?,
    };

    let ref_name = format!("{HEADS_PREFIX}{name}");
    if refs.get(&ref_name)?.is_some() && !options.force {
        return Err(Error::RefConflict(format!("branch {name} already exists")));
    }
    refs.set(&ref_name, &target)?;
    debug!(branch = name, %target, "created branch");

    if options.checkout {
        refs.set_head_branch(name)?;
    }
    Ok(target)
}

/// delete branches; never the current one
pub fn delete_branches(
    objects: &ObjectStore,
    refs: &RefStore,
    names: &[&str],
    default_branch: &str,
    options: &DeleteBranchOptions,
) -> Result<()> {
    let current = refs.current_branch()?;

    for name in names {
        let ref_name = match &options.remote {
            Some(remote) => format!("{REMOTES_PREFIX}{remote}/{name}"),
            None => format!("{HEADS_PREFIX}{name}"),
        };
        if options.remote.is_none() && current.as_deref() == Some(*name) {
            return Err(Error::RefConflict(format!(
                "cannot delete the current branch {name}"
            )));
        }
        let Some(oid) = refs.resolve(&ref_name)? else {
            return Err(Error::RefNotFound((*name).to_string()));
        };

        if options.check_merged && !options.force {
            let default_head = refs
                .resolve(&format!("{HEADS_PREFIX}{default_branch}"))?
                .ok_or_else(|| Error::RefNotFound(default_branch.to_string()))?;
            if !is_ancestor(objects, &oid, &default_head)? {
                return Err(Error::RefConflict(format!(
                    "branch {name} is not merged into {default_branch}"
                )));
            }
        }

        refs.delete(&ref_name)?;
        if options.remote.is_none() {
            clear_upstream(refs, name)?;
        }
        debug!(branch = name, "deleted branch");
    }
    Ok(())
}

/// rename a branch (the current one when `old` is None)
pub fn rename_branch(
    refs: &RefStore,
    old: Option<&str>,
    new: &str,
    force: bool,
) -> Result<()> {
    validate_branch_name(new)?;

    let old_name = match old {
        Some(name) => name.to_string(),
        None => refs
            .current_branch()?
            .ok_or_else(|| Error::RefConflict("HEAD is detached, name a branch".to_string()))?,
    };
    let old_ref = format!("{HEADS_PREFIX}{old_name}");
    let new_ref = format!("{HEADS_PREFIX}{new}");

    let oid = refs
        .resolve(&old_ref)?
        .ok_or_else(|| Error::RefNotFound(old_name.clone()))?;
    if refs.get(&new_ref)?.is_some() && !force {
        return Err(Error::RefConflict(format!("branch {new} already exists")));
    }

    refs.set(&new_ref, &oid)?;

    // carry tracking metadata over
    if let Some(upstream) = get_upstream(refs, &old_name)? {
        set_upstream(refs, new, Some(&upstream))?;
        clear_upstream(refs, &old_name)?;
    }

    // retarget HEAD if it pointed at the old name
    if refs.current_branch()?.as_deref() == Some(old_name.as_str()) {
        refs.set_head_branch(new)?;
    }
    refs.delete(&old_ref)?;
    debug!(from = %old_name, to = new, "renamed branch");
    Ok(())
}

/// check out a branch or commit
pub fn checkout_branch(
    objects: &ObjectStore,
    refs: &RefStore,
    options: &CheckoutOptions,
) -> Result<Oid> {
    let oid = if options.create {
        let name = options
            .name
            .as_deref()
            .ok_or_else(|| Error::InvalidBranchName("checkout -b needs a name".to_string()))?;
        create_branch(
            objects,
            refs,
            name,
            options.sha.as_deref(),
            &CreateBranchOptions {
                force: false,
                checkout: true,
            },
        )?
    } else if options.detach {
        let rev = options
            .sha
            .as_deref()
            .or(options.name.as_deref())
            .ok_or_else(|| Error::RefNotFound("nothing to detach at".to_string()))?;
        let oid = resolve_start_point(objects, refs, rev)?
            .ok_or_else(|| Error::RefNotFound(rev.to_string()))?;
        refs.detach_head(&oid)?;
        oid
    } else if let Some(name) = options.name.as_deref() {
        let oid = refs
            .resolve(&format!("{HEADS_PREFIX}{name}"))?
            .ok_or_else(|| Error::RefNotFound(name.to_string()))?;
        refs.set_head_branch(name)?;
        oid
    } else if let Some(sha) = options.sha.as_deref() {
        let oid = resolve_start_point(objects, refs, sha)?
            .ok_or_else(|| Error::RefNotFound(sha.to_string()))?;
        refs.detach_head(&oid)?;
        oid
    } else {
        return Err(Error::RefNotFound("nothing to check out".to_string()));
    };

    if let Some(track) = options.track.as_deref() {
        if let Some(name) = options.name.as_deref() {
            set_upstream(refs, name, Some(track))?;
        }
    }
    Ok(oid)
}

/// list branches with filtering and sorting
pub fn list_branches(
    objects: &ObjectStore,
    refs: &RefStore,
    default_branch: &str,
    options: &ListBranchOptions,
) -> Result<Vec<BranchInfo>> {
    let mut prefixes = Vec::new();
    match (&options.remote, options.all) {
        (Some(remote), _) => prefixes.push(format!("{REMOTES_PREFIX}{remote}/")),
        (None, true) => {
            prefixes.push(HEADS_PREFIX.to_string());
            prefixes.push(REMOTES_PREFIX.to_string());
        }
        (None, false) => prefixes.push(HEADS_PREFIX.to_string()),
    }

    let pattern = options
        .pattern
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| Error::GlobPattern(e.to_string()))?;
    let contains_oid = options
        .contains
        .as_deref()
        .map(|s| {
            resolve_start_point(objects, refs, s)?.ok_or_else(|| Error::RefNotFound(s.to_string()))
        })
        .transpose()?;
    let default_head = refs.resolve(&format!("{HEADS_PREFIX}{default_branch}"))?;
    let current = refs.current_branch()?;

    let mut branches = Vec::new();
    for prefix in prefixes {
        for r in refs.list_by_prefix(&prefix)? {
            let RefTarget::Direct(oid) = r.target else {
                continue;
            };
            let short = r.name[prefix.len()..].to_string();

            if let Some(pattern) = &pattern {
                if !pattern.matches(&short) {
                    continue;
                }
            }
            if let Some(needle) = &contains_oid {
                if !is_ancestor(objects, needle, &oid)? {
                    continue;
                }
            }
            if options.merged || options.no_merged {
                let Some(default_head) = &default_head else {
                    return Err(Error::RefNotFound(default_branch.to_string()));
                };
                let merged = is_ancestor(objects, &oid, default_head)?;
                if options.merged && !merged {
                    continue;
                }
                if options.no_merged && merged {
                    continue;
                }
            }

            let committed_at = objects.get_commit(&oid)?.committer.when;
            let upstream = if options.verbose && prefix == HEADS_PREFIX {
                match get_upstream(refs, &short)? {
                    Some(upstream_ref) => match refs.resolve(&upstream_ref)? {
                        Some(upstream_oid) => {
                            let (ahead, behind) =
                                ahead_behind(objects, &oid, &upstream_oid)?;
                            Some((upstream_ref, ahead, behind))
                        }
                        None => Some((upstream_ref, 0, 0)),
                    },
                    None => None,
                }
            } else {
                None
            };

            branches.push(BranchInfo {
                is_current: prefix == HEADS_PREFIX && current.as_deref() == Some(short.as_str()),
                name: short,
                oid,
                committed_at,
                upstream,
            });
        }
    }

    let sort = options.sort.as_deref().unwrap_or("name");
    let (key, reverse) = match sort.strip_prefix('-') {
        Some(key) => (key, true),
        None => (sort, false),
    };
    match key {
        "committerdate" => branches.sort_by(|a, b| {
            a.committed_at
                .cmp(&b.committed_at)
                .then_with(|| a.name.cmp(&b.name))
        }),
        _ => branches.sort_by(|a, b| a.name.cmp(&b.name)),
    }
    if reverse {
        branches.reverse();
    }
    Ok(branches)
}

/// upstream tracking ref of a branch
pub fn get_upstream(refs: &RefStore, branch: &str) -> Result<Option<String>> {
    match refs.rows().get(Table::Upstreams, branch.as_bytes())? {
        Some(bytes) => {
            let row: UpstreamRow = decode_row(&bytes)?;
            Ok(Some(row.upstream))
        }
        None => Ok(None),
    }
}

/// set (or with None, clear) a branch's upstream tracking ref
pub fn set_upstream(refs: &RefStore, branch: &str, upstream: Option<&str>) -> Result<()> {
    match upstream {
        Some(upstream) => refs.rows().put(
            Table::Upstreams,
            branch.as_bytes(),
            &encode_row(&UpstreamRow {
                upstream: upstream.to_string(),
            })?,
        ),
        None => clear_upstream(refs, branch),
    }
}

fn clear_upstream(refs: &RefStore, branch: &str) -> Result<()> {
    refs.rows().delete(Table::Upstreams, branch.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Commit, Kind, Signature, Tree};
    use crate::store::bucket::MemoryBucket;
    use crate::store::row::{MemoryRowStore, RowStore};
    use crate::store::wal::Wal;
    use std::sync::Arc;

    fn harness() -> (ObjectStore, RefStore) {
        let rows: Arc<dyn RowStore> = Arc::new(MemoryRowStore::new());
        let wal = Arc::new(Wal::open(rows.clone()).unwrap());
        let objects = ObjectStore::new(
            rows.clone(),
            Arc::new(MemoryBucket::new()),
            wal.clone(),
            &crate::config::Config::default(),
        );
        let refs = RefStore::new(rows, wal);
        (objects, refs)
    }

    fn commit(objects: &ObjectStore, parents: Vec<Oid>, when: i64) -> Oid {
        let tree = objects.put_tree(&Tree::empty()).unwrap();
        let sig = Signature::new("t", "t@example.com", when, 0);
        objects
            .put_commit(&Commit::new(tree, parents, sig.clone(), sig, format!("c{when}\n")))
            .unwrap()
    }

    /// main: c1 <- c2; HEAD -> main
    fn seeded() -> (ObjectStore, RefStore, Oid, Oid) {
        let (objects, refs) = harness();
        let c1 = commit(&objects, vec![], 100);
        let c2 = commit(&objects, vec![c1], 200);
        refs.set("refs/heads/main", &c2).unwrap();
        refs.set_head_branch("main").unwrap();
        (objects, refs, c1, c2)
    }

    #[test]
    fn test_validate_branch_name() {
        for bad in [
            "", "@", "-x", "a..b", "a@{b", "x.lock", "x.", "has space", "has~twiddle",
            "col:on", "que?stion", "st*ar", "br[acket", "back\\slash", ".hidden", "a/.b",
        ] {
            assert!(validate_branch_name(bad).is_err(), "accepted {bad:?}");
        }
        for good in ["main", "feature/login", "v1.2.3", "hot-fix", "a@b"] {
            assert!(validate_branch_name(good).is_ok(), "rejected {good:?}");
        }
    }

    #[test]
    fn test_create_branch_from_head() {
        let (objects, refs, _c1, c2) = seeded();
        let oid = create_branch(&objects, &refs, "feature", None, &Default::default()).unwrap();
        assert_eq!(oid, c2);
        assert_eq!(refs.resolve("refs/heads/feature").unwrap(), Some(c2));
        // HEAD untouched without checkout
        assert_eq!(refs.current_branch().unwrap(), Some("main".to_string()));
    }

    #[test]
    fn test_create_branch_start_point_precedence() {
        let (objects, refs, c1, _c2) = seeded();

        // full oid
        let oid = create_branch(&objects, &refs, "at-oid", Some(&c1.to_hex()), &Default::default())
            .unwrap();
        assert_eq!(oid, c1);

        // short oid
        let short = &c1.to_hex()[..8];
        let oid =
            create_branch(&objects, &refs, "at-short", Some(short), &Default::default()).unwrap();
        assert_eq!(oid, c1);

        // branch name
        let oid =
            create_branch(&objects, &refs, "from-main", Some("main"), &Default::default()).unwrap();
        assert_eq!(oid, refs.resolve("refs/heads/main").unwrap().unwrap());
    }

    #[test]
    fn test_create_branch_exists() {
        let (objects, refs, c1, c2) = seeded();
        create_branch(&objects, &refs, "dup", None, &Default::default()).unwrap();

        let result = create_branch(&objects, &refs, "dup", Some(&c1.to_hex()), &Default::default());
        assert!(matches!(result, Err(Error::RefConflict(_))));

        // force overwrites
        create_branch(
            &objects,
            &refs,
            "dup",
            Some(&c1.to_hex()),
            &CreateBranchOptions {
                force: true,
                checkout: false,
            },
        )
        .unwrap();
        assert_eq!(refs.resolve("refs/heads/dup").unwrap(), Some(c1));
        let _ = c2;
    }

    #[test]
    fn test_delete_current_branch_refused() {
        let (objects, refs, ..) = seeded();
        let result = delete_branches(&objects, &refs, &["main"], "main", &Default::default());
        assert!(matches!(result, Err(Error::RefConflict(_))));
    }

    #[test]
    fn test_delete_merged_check() {
        let (objects, refs, _c1, c2) = seeded();
        // diverged branch: new commit not on main
        let c3 = commit(&objects, vec![c2], 300);
        refs.set("refs/heads/diverged", &c3).unwrap();
        // merged branch: points at an ancestor of main
        refs.set("refs/heads/merged", &c2).unwrap();

        let check = DeleteBranchOptions {
            check_merged: true,
            ..Default::default()
        };
        assert!(matches!(
            delete_branches(&objects, &refs, &["diverged"], "main", &check),
            Err(Error::RefConflict(_))
        ));
        delete_branches(&objects, &refs, &["merged"], "main", &check).unwrap();

        // force skips the check
        let force = DeleteBranchOptions {
            check_merged: true,
            force: true,
            ..Default::default()
        };
        delete_branches(&objects, &refs, &["diverged"], "main", &force).unwrap();
    }

    #[test]
    fn test_rename_branch_carries_upstream_and_head() {
        let (objects, refs, ..) = seeded();
        set_upstream(&refs, "main", Some("refs/remotes/origin/main")).unwrap();

        rename_branch(&refs, None, "trunk", false).unwrap();

        assert!(refs.get("refs/heads/main").unwrap().is_none());
        assert!(refs.resolve("refs/heads/trunk").unwrap().is_some());
        assert_eq!(refs.current_branch().unwrap(), Some("trunk".to_string()));
        assert_eq!(
            get_upstream(&refs, "trunk").unwrap(),
            Some("refs/remotes/origin/main".to_string())
        );
        assert_eq!(get_upstream(&refs, "main").unwrap(), None);
        let _ = objects;
    }

    #[test]
    fn test_checkout_detach() {
        let (objects, refs, c1, _c2) = seeded();
        let oid = checkout_branch(
            &objects,
            &refs,
            &CheckoutOptions {
                sha: Some(c1.to_hex()),
                detach: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(oid, c1);
        assert_eq!(refs.current_branch().unwrap(), None);
        assert_eq!(refs.resolve_head().unwrap(), Some(c1));
    }

    #[test]
    fn test_checkout_create_with_track() {
        let (objects, refs, ..) = seeded();
        checkout_branch(
            &objects,
            &refs,
            &CheckoutOptions {
                name: Some("feature".to_string()),
                create: true,
                track: Some("refs/remotes/origin/feature".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(refs.current_branch().unwrap(), Some("feature".to_string()));
        assert_eq!(
            get_upstream(&refs, "feature").unwrap(),
            Some("refs/remotes/origin/feature".to_string())
        );
    }

    #[test]
    fn test_list_branches_pattern_and_sort() {
        let (objects, refs, c1, c2) = seeded();
        refs.set("refs/heads/feature/a", &c1).unwrap();
        refs.set("refs/heads/feature/b", &c2).unwrap();

        let all = list_branches(&objects, &refs, "main", &Default::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().find(|b| b.name == "main").unwrap().is_current);

        let features = list_branches(
            &objects,
            &refs,
            "main",
            &ListBranchOptions {
                pattern: Some("feature/*".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(features.len(), 2);

        let by_date_desc = list_branches(
            &objects,
            &refs,
            "main",
            &ListBranchOptions {
                sort: Some("-committerdate".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_date_desc.first().unwrap().committed_at, 200);
        assert_eq!(by_date_desc.last().unwrap().committed_at, 100);
    }

    #[test]
    fn test_list_branches_merged_filters() {
        let (objects, refs, c1, c2) = seeded();
        refs.set("refs/heads/old", &c1).unwrap();
        let c3 = commit(&objects, vec![c2], 300);
        refs.set("refs/heads/new", &c3).unwrap();

        let merged = list_branches(
            &objects,
            &refs,
            "main",
            &ListBranchOptions {
                merged: true,
                ..Default::default()
            },
        )
        .unwrap();
        let names: Vec<&str> = merged.iter().map(|b| b.name.as_str()).collect();
        assert!(names.contains(&"old"));
        assert!(names.contains(&"main"));
        assert!(!names.contains(&"new"));

        let unmerged = list_branches(
            &objects,
            &refs,
            "main",
            &ListBranchOptions {
                no_merged: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(unmerged.len(), 1);
        assert_eq!(unmerged[0].name, "new");
    }

    #[test]
    fn test_verbose_tracking_lag() {
        let (objects, refs, _c1, c2) = seeded();
        // local is one ahead of the remote-tracking ref
        let c3 = commit(&objects, vec![c2], 300);
        refs.set("refs/heads/main", &c3).unwrap();
        refs.set("refs/remotes/origin/main", &c2).unwrap();
        set_upstream(&refs, "main", Some("refs/remotes/origin/main")).unwrap();

        let listed = list_branches(
            &objects,
            &refs,
            "main",
            &ListBranchOptions {
                verbose: true,
                ..Default::default()
            },
        )
        .unwrap();
        let main = listed.iter().find(|b| b.name == "main").unwrap();
        assert_eq!(
            main.upstream,
            Some(("refs/remotes/origin/main".to_string(), 1, 0))
        );
    }
}
