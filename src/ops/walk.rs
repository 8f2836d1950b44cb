use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::object::Commit;
use crate::oid::Oid;
use crate::ops::tree_entry_at_path;
use crate::refs::branch::resolve_start_point;
use crate::refs::RefStore;
use crate::store::objects::ObjectStore;

/// commit emission order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WalkStrategy {
    /// committer timestamp, newest first
    #[default]
    Date,
    /// children before parents; ties broken by committer date
    Topo,
    /// topo order reversed
    Reverse,
}

/// options for [`walk_commits`]
#[derive(Clone, Debug, Default)]
pub struct WalkOptions {
    pub strategy: WalkStrategy,
    /// stop after this many commits
    pub limit: Option<usize>,
    /// only commits that change one of these paths relative to their
    /// first parent
    pub paths: Vec<String>,
    pub cancel: CancelToken,
}

/// walk history from the given tips
pub fn walk_commits(
    objects: &ObjectStore,
    start: &[Oid],
    options: &WalkOptions,
) -> Result<Vec<(Oid, Commit)>> {
    let ordered = match options.strategy {
        WalkStrategy::Date => date_order(objects, start, options)?,
        WalkStrategy::Topo => topo_order(objects, start, options)?,
        WalkStrategy::Reverse => {
            let mut commits = topo_order(objects, start, options)?;
            commits.reverse();
            commits
        }
    };

    let mut out = Vec::new();
    for (oid, commit) in ordered {
        if let Some(limit) = options.limit {
            if out.len() >= limit {
                break;
            }
        }
        if !options.paths.is_empty() && !touches_paths(objects, &commit, &options.paths)? {
            continue;
        }
        out.push((oid, commit));
    }
    Ok(out)
}

/// date order via a max-heap on committer timestamps; stops early when a
/// limit applies and no path filter is set
fn date_order(
    objects: &ObjectStore,
    start: &[Oid],
    options: &WalkOptions,
) -> Result<Vec<(Oid, Commit)>> {
    let mut heap: BinaryHeap<(i64, Oid)> = BinaryHeap::new();
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for oid in start {
        if seen.insert(*oid) {
            let commit = objects.get_commit(oid)?;
            heap.push((commit.committer.when, *oid));
        }
    }
    while let Some((_, oid)) = heap.pop() {
        options.cancel.check()?;
        let commit = objects.get_commit(&oid)?;
        for parent in &commit.parents {
            if seen.insert(*parent) {
                let parent_commit = objects.get_commit(parent)?;
                heap.push((parent_commit.committer.when, *parent));
            }
        }
        out.push((oid, commit));
        if options.paths.is_empty() {
            if let Some(limit) = options.limit {
                if out.len() >= limit {
                    break;
                }
            }
        }
    }
    Ok(out)
}

/// topological order: a commit is emitted once every traversed child has
/// been emitted, newest-first among the ready set
fn topo_order(
    objects: &ObjectStore,
    start: &[Oid],
    options: &WalkOptions,
) -> Result<Vec<(Oid, Commit)>> {
    // load the reachable subgraph
    let mut commits: HashMap<Oid, Commit> = HashMap::new();
    let mut queue: VecDeque<Oid> = start.iter().copied().collect();
    while let Some(oid) = queue.pop_front() {
        options.cancel.check()?;
        if commits.contains_key(&oid) {
            continue;
        }
        let commit = objects.get_commit(&oid)?;
        for parent in &commit.parents {
            queue.push_back(*parent);
        }
        commits.insert(oid, commit);
    }

    // pending children per commit, within the traversed set
    let mut pending: HashMap<Oid, usize> = commits.keys().map(|oid| (*oid, 0)).collect();
    for commit in commits.values() {
        for parent in &commit.parents {
            if let Some(count) = pending.get_mut(parent) {
                *count += 1;
            }
        }
    }

    let mut ready: BinaryHeap<(i64, Oid)> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(oid, _)| (commits[oid].committer.when, *oid))
        .collect();

    let mut out = Vec::with_capacity(commits.len());
    while let Some((_, oid)) = ready.pop() {
        let commit = commits[&oid].clone();
        for parent in &commit.parents {
            if let Some(count) = pending.get_mut(parent) {
                *count -= 1;
                if *count == 0 {
                    ready.push((commits[parent].committer.when, *parent));
                }
            }
        }
        out.push((oid, commit));
    }
    Ok(out)
}

fn touches_paths(objects: &ObjectStore, commit: &Commit, paths: &[String]) -> Result<bool> {
    for path in paths {
        let now = tree_entry_at_path(objects, &commit.tree, path)?;
        let before = match commit.parents.first() {
            Some(parent) => {
                let parent_commit = objects.get_commit(parent)?;
                tree_entry_at_path(objects, &parent_commit.tree, path)?
            }
            None => None,
        };
        if now != before {
            return Ok(true);
        }
    }
    Ok(false)
}

/// is `a` an ancestor of `b` (inclusive: a commit is its own ancestor)
pub fn is_ancestor(objects: &ObjectStore, a: &Oid, b: &Oid) -> Result<bool> {
    if a == b {
        return Ok(true);
    }
    let mut queue = VecDeque::from([*b]);
    let mut seen = HashSet::from([*b]);
    while let Some(oid) = queue.pop_front() {
        let commit = objects.get_commit(&oid)?;
        for parent in &commit.parents {
            if parent == a {
                return Ok(true);
            }
            if seen.insert(*parent) {
                queue.push_back(*parent);
            }
        }
    }
    Ok(false)
}

/// every commit reachable from `start`, itself included
fn ancestor_set(objects: &ObjectStore, start: &Oid) -> Result<HashSet<Oid>> {
    let mut seen = HashSet::from([*start]);
    let mut queue = VecDeque::from([*start]);
    while let Some(oid) = queue.pop_front() {
        let commit = objects.get_commit(&oid)?;
        for parent in &commit.parents {
            if seen.insert(*parent) {
                queue.push_back(*parent);
            }
        }
    }
    Ok(seen)
}

/// `(ahead, behind)` of `a` relative to `b`
pub fn ahead_behind(objects: &ObjectStore, a: &Oid, b: &Oid) -> Result<(usize, usize)> {
    let from_a = ancestor_set(objects, a)?;
    let from_b = ancestor_set(objects, b)?;
    let ahead = from_a.difference(&from_b).count();
    let behind = from_b.difference(&from_a).count();
    Ok((ahead, behind))
}

/// first common ancestor hit by a breadth-first walk from `b` over the
/// ancestor set of `a`
pub fn find_merge_base(objects: &ObjectStore, a: &Oid, b: &Oid) -> Result<Option<Oid>> {
    let from_a = ancestor_set(objects, a)?;
    if from_a.contains(b) {
        return Ok(Some(*b));
    }
    let mut queue = VecDeque::from([*b]);
    let mut seen = HashSet::from([*b]);
    while let Some(oid) = queue.pop_front() {
        let commit = objects.get_commit(&oid)?;
        for parent in &commit.parents {
            if from_a.contains(parent) {
                return Ok(Some(*parent));
            }
            if seen.insert(*parent) {
                queue.push_back(*parent);
            }
        }
    }
    Ok(None)
}

/// all minimal common ancestors: common ancestors none of whose children
/// are themselves common ancestors
pub fn find_all_merge_bases(objects: &ObjectStore, a: &Oid, b: &Oid) -> Result<Vec<Oid>> {
    let from_a = ancestor_set(objects, a)?;
    let from_b = ancestor_set(objects, b)?;
    let common: HashSet<Oid> = from_a.intersection(&from_b).copied().collect();
    if common.is_empty() {
        return Ok(Vec::new());
    }

    // child edges within the union graph
    let mut has_common_child: HashSet<Oid> = HashSet::new();
    for oid in from_a.union(&from_b) {
        let commit = objects.get_commit(oid)?;
        if common.contains(oid) {
            for parent in &commit.parents {
                if common.contains(parent) {
                    has_common_child.insert(*parent);
                }
            }
        }
    }

    let mut bases: Vec<Oid> = common
        .into_iter()
        .filter(|oid| !has_common_child.contains(oid))
        .collect();
    bases.sort();
    Ok(bases)
}

/// merge base of many commits, reduced pairwise
pub fn find_octopus_merge_base(objects: &ObjectStore, commits: &[Oid]) -> Result<Option<Oid>> {
    let mut iter = commits.iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    let mut base = *first;
    for commit in iter {
        match find_merge_base(objects, &base, commit)? {
            Some(next) => base = next,
            None => return Ok(None),
        }
    }
    Ok(Some(base))
}

/// the commit on `branch_tip`'s first-parent chain the other history
/// forked from
pub fn find_fork_point(
    objects: &ObjectStore,
    branch_tip: &Oid,
    commit: &Oid,
) -> Result<Option<Oid>> {
    let mut current = Some(*branch_tip);
    while let Some(oid) = current {
        if is_ancestor(objects, &oid, commit)? {
            return Ok(Some(oid));
        }
        current = objects.get_commit(&oid)?.parents.first().copied();
    }
    Ok(None)
}

/// resolve a rev-range expression into the commits it selects, newest
/// first
///
/// supports `A..B` (reachable from B, not from A), `A...B` (symmetric
/// difference), `^X` exclusions, and plain revs; whitespace separates
/// multiple tokens.
pub fn resolve_rev_range(
    objects: &ObjectStore,
    refs: &RefStore,
    expr: &str,
) -> Result<Vec<(Oid, Commit)>> {
    let mut include: HashSet<Oid> = HashSet::new();
    let mut exclude: HashSet<Oid> = HashSet::new();

    let resolve = |rev: &str| -> Result<Oid> {
        resolve_start_point(objects, refs, rev)?
            .ok_or_else(|| Error::InvalidRevRange(format!("unknown rev: {rev}")))
    };

    for token in expr.split_whitespace() {
        if let Some((a, b)) = token.split_once("...") {
            let from_a = ancestor_set(objects, &resolve(a)?)?;
            let from_b = ancestor_set(objects, &resolve(b)?)?;
            include.extend(from_a.symmetric_difference(&from_b));
        } else if let Some((a, b)) = token.split_once("..") {
            if a.is_empty() || b.is_empty() {
                return Err(Error::InvalidRevRange(token.to_string()));
            }
            include.extend(ancestor_set(objects, &resolve(b)?)?);
            exclude.extend(ancestor_set(objects, &resolve(a)?)?);
        } else if let Some(rev) = token.strip_prefix('^') {
            exclude.extend(ancestor_set(objects, &resolve(rev)?)?);
        } else {
            include.extend(ancestor_set(objects, &resolve(token)?)?);
        }
    }

    let mut commits = Vec::new();
    for oid in include.difference(&exclude) {
        commits.push((*oid, objects.get_commit(oid)?));
    }
    commits.sort_by(|a, b| {
        b.1.committer
            .when
            .cmp(&a.1.committer.when)
            .then_with(|| a.0.cmp(&b.0))
    });
    Ok(commits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::object::{Signature, Tree};
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
            &Config::default(),
        );
        let refs = RefStore::new(rows, wal);
        (objects, refs)
    }

    fn commit_at(objects: &ObjectStore, parents: Vec<Oid>, when: i64) -> Oid {
        let tree = objects.put_tree(&Tree::empty()).unwrap();
        let sig = Signature::new("w", "w@example.com", when, 0);
        objects
            .put_commit(&Commit::new(tree, parents, sig.clone(), sig, format!("at {when}\n")))
            .unwrap()
    }

    /// c1 <- c2 <- c4 (merge of c2,c3)
    ///   \-- c3 --/
    fn diamond(objects: &ObjectStore) -> (Oid, Oid, Oid, Oid) {
        let c1 = commit_at(objects, vec![], 100);
        let c2 = commit_at(objects, vec![c1], 200);
        let c3 = commit_at(objects, vec![c1], 300);
        let c4 = commit_at(objects, vec![c2, c3], 400);
        (c1, c2, c3, c4)
    }

    #[test]
    fn test_date_order_walk() {
        let (objects, _) = harness();
        let (c1, c2, c3, c4) = diamond(&objects);

        let walked = walk_commits(&objects, &[c4], &WalkOptions::default()).unwrap();
        let oids: Vec<Oid> = walked.iter().map(|(oid, _)| *oid).collect();
        assert_eq!(oids, vec![c4, c3, c2, c1]);
    }

    #[test]
    fn test_topo_order_children_first() {
        let (objects, _) = harness();
        // c2's date is older than c1's: date order would invert them
        let c1 = commit_at(&objects, vec![], 500);
        let c2 = commit_at(&objects, vec![c1], 100);
        let c3 = commit_at(&objects, vec![c2], 900);

        let walked = walk_commits(
            &objects,
            &[c3],
            &WalkOptions {
                strategy: WalkStrategy::Topo,
                ..Default::default()
            },
        )
        .unwrap();
        let oids: Vec<Oid> = walked.iter().map(|(oid, _)| *oid).collect();
        assert_eq!(oids, vec![c3, c2, c1]);
    }

    #[test]
    fn test_reverse_walk() {
        let (objects, _) = harness();
        let (c1, _c2, _c3, c4) = diamond(&objects);

        let walked = walk_commits(
            &objects,
            &[c4],
            &WalkOptions {
                strategy: WalkStrategy::Reverse,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(walked.first().unwrap().0, c1);
        assert_eq!(walked.last().unwrap().0, c4);
    }

    #[test]
    fn test_walk_limit() {
        let (objects, _) = harness();
        let (_c1, _c2, c3, c4) = diamond(&objects);

        let walked = walk_commits(
            &objects,
            &[c4],
            &WalkOptions {
                limit: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
        let oids: Vec<Oid> = walked.iter().map(|(oid, _)| *oid).collect();
        assert_eq!(oids, vec![c4, c3]);
    }

    #[test]
    fn test_walk_path_filter() {
        use crate::object::{EntryMode, TreeEntry};
        let (objects, _) = harness();
        let sig = |when| Signature::new("w", "w@example.com", when, 0);

        let blob_a = objects.put_blob(b"a\n").unwrap();
        let blob_b = objects.put_blob(b"b\n").unwrap();
        let tree_1 = objects
            .put_tree(&Tree::new(vec![TreeEntry::new(EntryMode::Regular, "f.txt", blob_a)]).unwrap())
            .unwrap();
        let tree_2 = objects
            .put_tree(&Tree::new(vec![TreeEntry::new(EntryMode::Regular, "f.txt", blob_b)]).unwrap())
            .unwrap();

        let c1 = objects
            .put_commit(&Commit::new(tree_1, vec![], sig(100), sig(100), "add\n"))
            .unwrap();
        // c2 does not touch f.txt
        let c2 = objects
            .put_commit(&Commit::new(tree_1, vec![c1], sig(200), sig(200), "noop\n"))
            .unwrap();
        let c3 = objects
            .put_commit(&Commit::new(tree_2, vec![c2], sig(300), sig(300), "edit\n"))
            .unwrap();

        let walked = walk_commits(
            &objects,
            &[c3],
            &WalkOptions {
                paths: vec!["f.txt".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        let oids: Vec<Oid> = walked.iter().map(|(oid, _)| *oid).collect();
        assert_eq!(oids, vec![c3, c1]);
    }

    #[test]
    fn test_walk_cancellation() {
        let (objects, _) = harness();
        let (_, _, _, c4) = diamond(&objects);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            walk_commits(
                &objects,
                &[c4],
                &WalkOptions {
                    cancel,
                    ..Default::default()
                }
            ),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_is_ancestor() {
        let (objects, _) = harness();
        let (c1, c2, c3, c4) = diamond(&objects);

        assert!(is_ancestor(&objects, &c1, &c4).unwrap());
        assert!(is_ancestor(&objects, &c2, &c4).unwrap());
        assert!(is_ancestor(&objects, &c4, &c4).unwrap());
        assert!(!is_ancestor(&objects, &c4, &c1).unwrap());
        assert!(!is_ancestor(&objects, &c2, &c3).unwrap());
    }

    #[test]
    fn test_merge_base_diamond() {
        let (objects, _) = harness();
        let (c1, c2, c3, _c4) = diamond(&objects);

        let base = find_merge_base(&objects, &c2, &c3).unwrap().unwrap();
        assert_eq!(base, c1);

        // merge-base laws
        assert!(is_ancestor(&objects, &base, &c2).unwrap());
        assert!(is_ancestor(&objects, &base, &c3).unwrap());
    }

    #[test]
    fn test_merge_base_ancestor_case() {
        let (objects, _) = harness();
        let (_c1, c2, _c3, c4) = diamond(&objects);
        // when one side is an ancestor of the other, it is the base
        assert_eq!(find_merge_base(&objects, &c2, &c4).unwrap(), Some(c2));
        assert_eq!(find_merge_base(&objects, &c4, &c2).unwrap(), Some(c2));
    }

    #[test]
    fn test_merge_base_disjoint_histories() {
        let (objects, _) = harness();
        let a = commit_at(&objects, vec![], 100);
        let b = commit_at(&objects, vec![], 200);
        assert_eq!(find_merge_base(&objects, &a, &b).unwrap(), None);
    }

    #[test]
    fn test_all_merge_bases_criss_cross() {
        let (objects, _) = harness();
        // criss-cross: two minimal bases
        //   a---x---m1
        //    \ / \ /
        //     X   X
        //    / \ / \
        //   b---y---m2
        let a = commit_at(&objects, vec![], 100);
        let b = commit_at(&objects, vec![], 110);
        let x = commit_at(&objects, vec![a, b], 200);
        let y = commit_at(&objects, vec![a, b], 210);
        let m1 = commit_at(&objects, vec![x, y], 300);
        let m2 = commit_at(&objects, vec![x, y], 310);

        let mut bases = find_all_merge_bases(&objects, &m1, &m2).unwrap();
        bases.sort();
        let mut expected = vec![x, y];
        expected.sort();
        assert_eq!(bases, expected);
    }

    #[test]
    fn test_octopus_merge_base() {
        let (objects, _) = harness();
        let (c1, c2, c3, c4) = diamond(&objects);
        let c5 = commit_at(&objects, vec![c1], 500);

        assert_eq!(
            find_octopus_merge_base(&objects, &[c2, c3, c5]).unwrap(),
            Some(c1)
        );
        assert_eq!(find_octopus_merge_base(&objects, &[c4]).unwrap(), Some(c4));
        assert_eq!(find_octopus_merge_base(&objects, &[]).unwrap(), None);
    }

    #[test]
    fn test_ahead_behind() {
        let (objects, _) = harness();
        let (_c1, c2, c3, _c4) = diamond(&objects);
        // c2 and c3 each carry one commit the other lacks
        assert_eq!(ahead_behind(&objects, &c2, &c3).unwrap(), (1, 1));
        assert_eq!(ahead_behind(&objects, &c2, &c2).unwrap(), (0, 0));
    }

    #[test]
    fn test_fork_point() {
        let (objects, _) = harness();
        let c1 = commit_at(&objects, vec![], 100);
        let c2 = commit_at(&objects, vec![c1], 200);
        let c3 = commit_at(&objects, vec![c2], 300);
        let feature = commit_at(&objects, vec![c2], 250);

        assert_eq!(find_fork_point(&objects, &c3, &feature).unwrap(), Some(c2));
    }

    #[test]
    fn test_rev_range_two_dot() {
        let (objects, refs) = harness();
        let c1 = commit_at(&objects, vec![], 100);
        let c2 = commit_at(&objects, vec![c1], 200);
        let c3 = commit_at(&objects, vec![c2], 300);
        refs.set("refs/heads/old", &c1).unwrap();
        refs.set("refs/heads/new", &c3).unwrap();

        let range = resolve_rev_range(&objects, &refs, "old..new").unwrap();
        let oids: Vec<Oid> = range.iter().map(|(oid, _)| *oid).collect();
        assert_eq!(oids, vec![c3, c2]);
    }

    #[test]
    fn test_rev_range_three_dot() {
        let (objects, refs) = harness();
        let (c1, c2, c3, _c4) = diamond(&objects);
        refs.set("refs/heads/left", &c2).unwrap();
        refs.set("refs/heads/right", &c3).unwrap();
        let _ = c1;

        let range = resolve_rev_range(&objects, &refs, "left...right").unwrap();
        let mut oids: Vec<Oid> = range.iter().map(|(oid, _)| *oid).collect();
        oids.sort();
        let mut expected = vec![c2, c3];
        expected.sort();
        assert_eq!(oids, expected);
    }

    #[test]
    fn test_rev_range_caret_exclusion() {
        let (objects, refs) = harness();
        let c1 = commit_at(&objects, vec![], 100);
        let c2 = commit_at(&objects, vec![c1], 200);
        let c3 = commit_at(&objects, vec![c2], 300);
        refs.set("refs/heads/main", &c3).unwrap();

        let range =
            resolve_rev_range(&objects, &refs, &format!("main ^{}", c2.to_hex())).unwrap();
        let oids: Vec<Oid> = range.iter().map(|(oid, _)| *oid).collect();
        assert_eq!(oids, vec![c3]);
    }

    #[test]
    fn test_rev_range_bad_token() {
        let (objects, refs) = harness();
        assert!(matches!(
            resolve_rev_range(&objects, &refs, "..x"),
            Err(Error::InvalidRevRange(_))
        ));
        assert!(matches!(
            resolve_rev_range(&objects, &refs, "nosuchref"),
            Err(Error::InvalidRevRange(_))
        ));
    }
}
