use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::object::{EntryMode, Tree};
use crate::oid::Oid;
use crate::store::objects::ObjectStore;

/// change classification of one diff entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    TypeChanged,
    /// carries an unresolved merge conflict
    Unmerged,
}

impl DiffStatus {
    /// single-letter code, as porcelain output spells it
    pub fn code(&self) -> char {
        match self {
            DiffStatus::Added => 'A',
            DiffStatus::Deleted => 'D',
            DiffStatus::Modified => 'M',
            DiffStatus::Renamed => 'R',
            DiffStatus::Copied => 'C',
            DiffStatus::TypeChanged => 'T',
            DiffStatus::Unmerged => 'U',
        }
    }
}

/// one changed path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub status: DiffStatus,
    pub path: String,
    /// source path for renames and copies
    pub old_path: Option<String>,
    pub old_oid: Option<Oid>,
    pub new_oid: Option<Oid>,
    pub old_mode: Option<EntryMode>,
    pub new_mode: Option<EntryMode>,
    /// similarity percentage for renames and copies
    pub similarity: Option<u8>,
    pub is_binary: bool,
}

impl DiffEntry {
    fn plain(status: DiffStatus, path: String) -> Self {
        Self {
            status,
            path,
            old_path: None,
            old_oid: None,
            new_oid: None,
            old_mode: None,
            new_mode: None,
            similarity: None,
            is_binary: false,
        }
    }
}

/// options for [`diff_trees`]
#[derive(Clone, Debug)]
pub struct DiffOptions {
    /// run the rename pass after the plain diff
    pub detect_renames: bool,
    /// run the copy pass after the rename pass
    pub detect_copies: bool,
    /// minimum similarity percentage to accept a rename or copy
    pub similarity_threshold: u8,
    /// glob include list; empty means everything
    pub pathspecs: Vec<String>,
    /// glob exclude list, applied before includes
    pub exclude_paths: Vec<String>,
    /// read changed blobs and flag binary content
    pub detect_binary: bool,
    /// descend into subtrees
    pub recursive: bool,
    pub cancel: CancelToken,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            detect_renames: false,
            detect_copies: false,
            similarity_threshold: 50,
            pathspecs: Vec::new(),
            exclude_paths: Vec::new(),
            detect_binary: false,
            recursive: true,
            cancel: CancelToken::new(),
        }
    }
}

/// compare two trees
pub fn diff_trees(
    objects: &ObjectStore,
    old_root: &Oid,
    new_root: &Oid,
    options: &DiffOptions,
) -> Result<Vec<DiffEntry>> {
    let mut entries = Vec::new();
    if old_root != new_root {
        let old = objects.get_tree(old_root)?;
        let new = objects.get_tree(new_root)?;
        diff_tree_contents(objects, &old, &new, "", options, &mut entries)?;
    }

    if options.detect_renames || options.detect_copies {
        detect_renames_and_copies(objects, old_root, &mut entries, options)?;
    }

    let filter = PathFilter::new(&options.pathspecs, &options.exclude_paths)?;
    entries.retain(|e| filter.matches(&e.path) || e.old_path.as_deref().is_some_and(|p| filter.matches(p)));

    if options.detect_binary {
        for entry in &mut entries {
            let probe = entry.new_oid.or(entry.old_oid);
            if let Some(oid) = probe {
                if !matches!(entry.new_mode.or(entry.old_mode), Some(EntryMode::Subtree | EntryMode::Submodule)) {
                    entry.is_binary = is_binary_blob(&objects.get_blob(&oid)?);
                }
            }
        }
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn diff_tree_contents(
    objects: &ObjectStore,
    old: &Tree,
    new: &Tree,
    prefix: &str,
    options: &DiffOptions,
    out: &mut Vec<DiffEntry>,
) -> Result<()> {
    options.cancel.check()?;

    let mut names: Vec<&str> = old
        .entries()
        .iter()
        .chain(new.entries().iter())
        .map(|e| e.name.as_str())
        .collect();
    names.sort_unstable();
    names.dedup();

    for name in names {
        let path = join(prefix, name);
        let old_entry = old.get(name);
        let new_entry = new.get(name);

        match (old_entry, new_entry) {
            (None, Some(added)) => {
                if added.mode.is_subtree() && options.recursive {
                    report_subtree(objects, &added.oid, &path, DiffStatus::Added, options, out)?;
                } else {
                    let mut entry = DiffEntry::plain(DiffStatus::Added, path);
                    entry.new_oid = Some(added.oid);
                    entry.new_mode = Some(added.mode);
                    out.push(entry);
                }
            }
            (Some(deleted), None) => {
                if deleted.mode.is_subtree() && options.recursive {
                    report_subtree(objects, &deleted.oid, &path, DiffStatus::Deleted, options, out)?;
                } else {
                    let mut entry = DiffEntry::plain(DiffStatus::Deleted, path);
                    entry.old_oid = Some(deleted.oid);
                    entry.old_mode = Some(deleted.mode);
                    out.push(entry);
                }
            }
            (Some(a), Some(b)) => {
                if a.oid == b.oid && a.mode == b.mode {
                    continue;
                }
                match (a.mode.is_subtree(), b.mode.is_subtree()) {
                    (true, true) => {
                        if options.recursive {
                            let old_sub = objects.get_tree(&a.oid)?;
                            let new_sub = objects.get_tree(&b.oid)?;
                            diff_tree_contents(objects, &old_sub, &new_sub, &path, options, out)?;
                        } else {
                            let mut entry = DiffEntry::plain(DiffStatus::Modified, path);
                            entry.old_oid = Some(a.oid);
                            entry.new_oid = Some(b.oid);
                            entry.old_mode = Some(a.mode);
                            entry.new_mode = Some(b.mode);
                            out.push(entry);
                        }
                    }
                    (true, false) | (false, true) => {
                        // a subtree replaced by a file or vice versa: report
                        // both sides
                        if a.mode.is_subtree() && options.recursive {
                            report_subtree(objects, &a.oid, &path, DiffStatus::Deleted, options, out)?;
                        } else if !a.mode.is_subtree() {
                            let mut entry = DiffEntry::plain(DiffStatus::Deleted, path.clone());
                            entry.old_oid = Some(a.oid);
                            entry.old_mode = Some(a.mode);
                            out.push(entry);
                        }
                        if b.mode.is_subtree() && options.recursive {
                            report_subtree(objects, &b.oid, &path, DiffStatus::Added, options, out)?;
                        } else if !b.mode.is_subtree() {
                            let mut entry = DiffEntry::plain(DiffStatus::Added, path);
                            entry.new_oid = Some(b.oid);
                            entry.new_mode = Some(b.mode);
                            out.push(entry);
                        }
                    }
                    (false, false) => {
                        let status = if type_class(a.mode) != type_class(b.mode) {
                            DiffStatus::TypeChanged
                        } else {
                            DiffStatus::Modified
                        };
                        let mut entry = DiffEntry::plain(status, path);
                        entry.old_oid = Some(a.oid);
                        entry.new_oid = Some(b.oid);
                        entry.old_mode = Some(a.mode);
                        entry.new_mode = Some(b.mode);
                        out.push(entry);
                    }
                }
            }
            (None, None) => unreachable!("name came from one of the trees"),
        }
    }
    Ok(())
}

/// report every file under a subtree as added or deleted
fn report_subtree(
    objects: &ObjectStore,
    tree: &Oid,
    prefix: &str,
    status: DiffStatus,
    options: &DiffOptions,
    out: &mut Vec<DiffEntry>,
) -> Result<()> {
    for (path, entry) in objects.walk_tree(tree, false, &options.cancel)? {
        let full = join(prefix, &path);
        let mut diff_entry = DiffEntry::plain(status, full);
        match status {
            DiffStatus::Added => {
                diff_entry.new_oid = Some(entry.oid);
                diff_entry.new_mode = Some(entry.mode);
            }
            _ => {
                diff_entry.old_oid = Some(entry.oid);
                diff_entry.old_mode = Some(entry.mode);
            }
        }
        out.push(diff_entry);
    }
    Ok(())
}

/// mode classes whose crossings count as type changes
#[derive(PartialEq)]
enum TypeClass {
    File,
    Symlink,
    Submodule,
}

fn type_class(mode: EntryMode) -> TypeClass {
    match mode {
        EntryMode::Regular | EntryMode::Executable => TypeClass::File,
        EntryMode::Symlink => TypeClass::Symlink,
        EntryMode::Submodule => TypeClass::Submodule,
        EntryMode::Subtree => unreachable!("subtrees never reach type classification"),
    }
}

/// rename pass over add/delete pairs, then a copy pass over remaining
/// adds against every old-tree path
fn detect_renames_and_copies(
    objects: &ObjectStore,
    old_root: &Oid,
    entries: &mut Vec<DiffEntry>,
    options: &DiffOptions,
) -> Result<()> {
    if options.detect_renames {
        let adds: Vec<usize> = indexes_of(entries, DiffStatus::Added);
        let deletes: Vec<usize> = indexes_of(entries, DiffStatus::Deleted);

        // score every pair, take greedily from the best down
        let mut scored = Vec::new();
        for &a in &adds {
            for &d in &deletes {
                options.cancel.check()?;
                let score = similarity(objects, entries[d].old_oid, entries[a].new_oid)?;
                if score >= options.similarity_threshold {
                    scored.push((score, a, d));
                }
            }
        }
        scored.sort_by(|x, y| y.0.cmp(&x.0).then_with(|| x.1.cmp(&y.1)));

        let mut used_adds = Vec::new();
        let mut used_deletes = Vec::new();
        let mut remove = Vec::new();
        for (score, a, d) in scored {
            if used_adds.contains(&a) || used_deletes.contains(&d) {
                continue;
            }
            used_adds.push(a);
            used_deletes.push(d);

            entries[a].status = DiffStatus::Renamed;
            entries[a].old_path = Some(entries[d].path.clone());
            entries[a].old_oid = entries[d].old_oid;
            entries[a].old_mode = entries[d].old_mode;
            entries[a].similarity = Some(score);
            remove.push(d);
        }
        remove.sort_unstable();
        for d in remove.into_iter().rev() {
            entries.remove(d);
        }
    }

    if options.detect_copies {
        let old_files = objects.walk_tree(old_root, false, &options.cancel)?;
        for i in indexes_of(entries, DiffStatus::Added) {
            let mut best: Option<(u8, usize)> = None;
            for (j, (_, old_entry)) in old_files.iter().enumerate() {
                options.cancel.check()?;
                if old_entry.mode.is_subtree() {
                    continue;
                }
                let score = similarity(objects, Some(old_entry.oid), entries[i].new_oid)?;
                if score >= options.similarity_threshold
                    && best.map_or(true, |(b, _)| score > b)
                {
                    best = Some((score, j));
                }
            }
            if let Some((score, j)) = best {
                let (old_path, old_entry) = &old_files[j];
                entries[i].status = DiffStatus::Copied;
                entries[i].old_path = Some(old_path.clone());
                entries[i].old_oid = Some(old_entry.oid);
                entries[i].old_mode = Some(old_entry.mode);
                entries[i].similarity = Some(score);
            }
        }
    }
    Ok(())
}

fn indexes_of(entries: &[DiffEntry], status: DiffStatus) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.status == status)
        .map(|(i, _)| i)
        .collect()
}

/// similarity score in percent: equal oids are 100, otherwise the share
/// of matching bytes position-by-position, ignoring the trailing length
/// difference
fn similarity(objects: &ObjectStore, old: Option<Oid>, new: Option<Oid>) -> Result<u8> {
    let (Some(old), Some(new)) = (old, new) else {
        return Ok(0);
    };
    if old == new {
        return Ok(100);
    }
    let a = objects.get_blob(&old)?;
    let b = objects.get_blob(&new)?;
    let common = a.len().min(b.len());
    if common == 0 {
        return Ok(0);
    }
    let matching = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    Ok((matching * 100 / common) as u8)
}

/// binary sniff: NUL within the first 8000 bytes, with known image magic
/// short-circuiting
pub fn is_binary_blob(data: &[u8]) -> bool {
    if data.starts_with(b"\x89PNG") || data.starts_with(b"\xff\xd8\xff") || data.starts_with(b"GIF8")
    {
        return true;
    }
    data.iter().take(8000).any(|&b| b == 0)
}

struct PathFilter {
    includes: Vec<glob::Pattern>,
    excludes: Vec<glob::Pattern>,
}

impl PathFilter {
    fn new(pathspecs: &[String], exclude_paths: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<glob::Pattern>> {
            patterns
                .iter()
                .map(|p| glob::Pattern::new(p).map_err(|e| Error::GlobPattern(e.to_string())))
                .collect()
        };
        Ok(Self {
            includes: compile(pathspecs)?,
            excludes: compile(exclude_paths)?,
        })
    }

    fn matches(&self, path: &str) -> bool {
        if self.excludes.iter().any(|p| p.matches(path)) {
            return false;
        }
        self.includes.is_empty() || self.includes.iter().any(|p| p.matches(path))
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
