use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::object::{Commit, EntryMode, Signature, Tree, TreeEntry};
use crate::oid::Oid;
use crate::ops::diff::is_binary_blob;
use crate::ops::walk::{find_all_merge_bases, find_merge_base};
use crate::refs::{RefStore, HEADS_PREFIX};
use crate::store::objects::ObjectStore;
use crate::store::row::{decode_row, encode_row, Table};
use crate::store::wal::unix_now;

const STATE_KEY: &[u8] = b"state";

/// how an unresolved conflict failed to merge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// overlapping text edits
    Content,
    /// both sides added different content at one path
    AddAdd,
    /// deleted on ours, modified on theirs
    DeleteModify,
    /// modified on ours, deleted on theirs
    ModifyDelete,
    /// a file on one side, a directory on the other
    DirectoryFile,
    /// binary content never auto-merges
    Binary,
}

/// a path the merge could not decide
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub path: String,
    pub kind: ConflictKind,
    pub base: Option<Oid>,
    pub ours: Option<Oid>,
    pub theirs: Option<Oid>,
    /// blob with conflict markers, for content conflicts
    pub preview: Option<Oid>,
}

/// a conflict the caller has settled
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConflict {
    pub path: String,
    /// the staged result; None removes the path
    pub entry: Option<(u32, Oid)>,
}

/// which side settles a conflict
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    Ours,
    Theirs,
    Base,
}

/// options steering [`merge`]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// merge commit message; a default is synthesised when absent
    pub message: Option<String>,
    pub allow_fast_forward: bool,
    /// fail unless the merge is a fast-forward
    pub fast_forward_only: bool,
    /// single-parent commit of theirs' changes relative to base
    pub squash: bool,
    /// settle conflicts with `conflict_strategy` instead of stopping
    pub auto_resolve: bool,
    pub conflict_strategy: Option<ConflictResolution>,
    /// stage the merge but let the caller commit
    pub no_commit: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            message: None,
            allow_fast_forward: true,
            fast_forward_only: false,
            squash: false,
            auto_resolve: false,
            conflict_strategy: None,
            no_commit: false,
        }
    }
}

/// what a merge produced
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// ours already contains theirs
    UpToDate,
    /// HEAD moved forward to theirs, no commit created
    FastForward { new_head: Oid },
    /// a merge commit was created
    Merged { commit: Oid, tree: Oid },
    /// merged cleanly, staged for the caller to commit
    Staged { tree: Oid },
    /// conflicts persist in the merge state
    Conflicted { conflicts: Vec<MergeConflict> },
}

/// the persisted single-slot merge state; presence means a merge is in
/// progress
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeState {
    pub merge_head: Oid,
    pub orig_head: Oid,
    pub message: String,
    pub unresolved: Vec<MergeConflict>,
    pub resolved: Vec<ResolvedConflict>,
    pub options: MergeOptions,
    /// cleanly merged entries as `path -> (mode bits, oid)`
    pub merged_entries: BTreeMap<String, (u32, Oid)>,
}

/// read the current merge state, if a merge is in progress
pub fn merge_state(refs: &RefStore) -> Result<Option<MergeState>> {
    match refs.rows().get(Table::MergeState, STATE_KEY)? {
        Some(bytes) => Ok(Some(decode_row(&bytes)?)),
        None => Ok(None),
    }
}

fn put_state(refs: &RefStore, state: &MergeState) -> Result<()> {
    refs.rows()
        .put(Table::MergeState, STATE_KEY, &encode_row(state)?)
}

fn clear_state(refs: &RefStore) -> Result<()> {
    refs.rows().delete(Table::MergeState, STATE_KEY)?;
    Ok(())
}

/// three-way merge of `theirs` into `ours`
pub fn merge(
    objects: &ObjectStore,
    refs: &RefStore,
    config: &Config,
    ours: &Oid,
    theirs: &Oid,
    options: &MergeOptions,
    cancel: &CancelToken,
) -> Result<MergeOutcome> {
    if merge_state(refs)?.is_some() {
        return Err(Error::MergeInProgress);
    }
    // committer identity is a pre-flight requirement: fail before any
    // state is written
    if !options.no_commit {
        identity_signature(config)?;
    }

    if ours == theirs {
        return Ok(MergeOutcome::UpToDate);
    }
    let base = find_merge_base(objects, ours, theirs)?;
    if base.as_ref() == Some(theirs) {
        return Ok(MergeOutcome::UpToDate);
    }
    if base.as_ref() == Some(ours) && options.allow_fast_forward && !options.squash {
        move_head(refs, theirs)?;
        info!(%theirs, "fast-forward merge");
        return Ok(MergeOutcome::FastForward { new_head: *theirs });
    }
    if options.fast_forward_only {
        return Err(Error::FastForwardImpossible);
    }

    let base_tree = match base {
        Some(base) => match find_all_merge_bases(objects, ours, theirs)? {
            bases if bases.len() > 1 => {
                compute_recursive_merge_base(objects, &bases, cancel)?
            }
            _ => objects.get_commit(&base)?.tree,
        },
        None => objects.put_tree(&Tree::empty())?,
    };
    let ours_tree = objects.get_commit(ours)?.tree;
    let theirs_tree = objects.get_commit(theirs)?.tree;

    let mut result = merge_trees(objects, &base_tree, &ours_tree, &theirs_tree, cancel)?;

    if options.auto_resolve {
        if let Some(strategy) = options.conflict_strategy {
            for conflict in result.conflicts.drain(..) {
                let chosen = match strategy {
                    ConflictResolution::Ours => conflict.ours,
                    ConflictResolution::Theirs => conflict.theirs,
                    ConflictResolution::Base => conflict.base,
                };
                if let Some(oid) = chosen {
                    result
                        .entries
                        .insert(conflict.path, (mode_bits(EntryMode::Regular), oid));
                } else {
                    result.entries.remove(&conflict.path);
                }
            }
        }
    }

    let message = options.message.clone().unwrap_or_else(|| {
        format!("Merge commit '{theirs}'\n")
    });

    if !result.conflicts.is_empty() {
        let state = MergeState {
            merge_head: *theirs,
            orig_head: *ours,
            message,
            unresolved: result.conflicts.clone(),
            resolved: Vec::new(),
            options: options.clone(),
            merged_entries: result.entries,
        };
        put_state(refs, &state)?;
        debug!(conflicts = state.unresolved.len(), "merge stopped on conflicts");
        return Ok(MergeOutcome::Conflicted {
            conflicts: state.unresolved,
        });
    }

    let tree = build_tree(objects, &result.entries)?;
    if options.no_commit {
        let state = MergeState {
            merge_head: *theirs,
            orig_head: *ours,
            message,
            unresolved: Vec::new(),
            resolved: Vec::new(),
            options: options.clone(),
            merged_entries: result.entries,
        };
        put_state(refs, &state)?;
        return Ok(MergeOutcome::Staged { tree });
    }

    let commit = commit_merge(objects, refs, config, &tree, ours, theirs, &message, options.squash)?;
    Ok(MergeOutcome::Merged { commit, tree })
}

/// settle one conflicted path
pub fn resolve_conflict(
    objects: &ObjectStore,
    refs: &RefStore,
    path: &str,
    resolution: ConflictResolution,
    custom: Option<Vec<u8>>,
) -> Result<()> {
    let mut state = merge_state(refs)?.ok_or(Error::NoMergeInProgress)?;
    let position = state
        .unresolved
        .iter()
        .position(|c| c.path == path)
        .ok_or_else(|| Error::RefNotFound(format!("no conflict at {path}")))?;
    let conflict = state.unresolved.remove(position);

    let entry = match custom {
        Some(content) => Some((mode_bits(EntryMode::Regular), objects.put_blob(&content)?)),
        None => {
            let chosen = match resolution {
                ConflictResolution::Ours => conflict.ours,
                ConflictResolution::Theirs => conflict.theirs,
                ConflictResolution::Base => conflict.base,
            };
            chosen.map(|oid| (mode_bits(EntryMode::Regular), oid))
        }
    };

    match &entry {
        Some(staged) => {
            state.merged_entries.insert(path.to_string(), *staged);
        }
        None => {
            state.merged_entries.remove(path);
        }
    }
    state.resolved.push(ResolvedConflict {
        path: path.to_string(),
        entry,
    });
    put_state(refs, &state)?;
    debug!(path, ?resolution, "conflict resolved");
    Ok(())
}

/// finish a conflicted or staged merge
pub fn continue_merge(
    objects: &ObjectStore,
    refs: &RefStore,
    config: &Config,
) -> Result<MergeOutcome> {
    let state = merge_state(refs)?.ok_or(Error::NoMergeInProgress)?;
    if !state.unresolved.is_empty() {
        return Err(Error::UnresolvedConflicts(state.unresolved.len()));
    }
    if objects.get(&state.orig_head)?.is_none() {
        return Err(Error::ObjectNotFound(state.orig_head));
    }

    let tree = build_tree(objects, &state.merged_entries)?;
    let commit = commit_merge(
        objects,
        refs,
        config,
        &tree,
        &state.orig_head,
        &state.merge_head,
        &state.message,
        state.options.squash,
    )?;
    clear_state(refs)?;
    Ok(MergeOutcome::Merged { commit, tree })
}

/// abandon the in-progress merge and restore HEAD
pub fn abort_merge(refs: &RefStore) -> Result<()> {
    let state = merge_state(refs)?.ok_or(Error::NoMergeInProgress)?;
    move_head(refs, &state.orig_head)?;
    clear_state(refs)?;
    info!("merge aborted");
    Ok(())
}

fn commit_merge(
    objects: &ObjectStore,
    refs: &RefStore,
    config: &Config,
    tree: &Oid,
    ours: &Oid,
    theirs: &Oid,
    message: &str,
    squash: bool,
) -> Result<Oid> {
    let committer = identity_signature(config)?;
    let parents = if squash {
        vec![*ours]
    } else {
        vec![*ours, *theirs]
    };
    let commit = Commit::new(*tree, parents, committer.clone(), committer, message);
    let oid = objects.put_commit(&commit)?;
    move_head(refs, &oid)?;
    info!(commit = %oid, squash, "merge committed");
    Ok(oid)
}

fn identity_signature(config: &Config) -> Result<Signature> {
    let identity = config.identity.as_ref().ok_or(Error::MissingIdentity)?;
    Ok(Signature::new(
        identity.name.clone(),
        identity.email.clone(),
        unix_now(),
        0,
    ))
}

/// advance HEAD: through the current branch when attached, directly when
/// detached
fn move_head(refs: &RefStore, to: &Oid) -> Result<()> {
    match refs.current_branch()? {
        Some(branch) => refs.set(&format!("{HEADS_PREFIX}{branch}"), to),
        None => refs.detach_head(to),
    }
}

struct TreeMergeResult {
    entries: BTreeMap<String, (u32, Oid)>,
    conflicts: Vec<MergeConflict>,
}

/// per-path three-way decision over flattened entry maps
fn merge_trees(
    objects: &ObjectStore,
    base_tree: &Oid,
    ours_tree: &Oid,
    theirs_tree: &Oid,
    cancel: &CancelToken,
) -> Result<TreeMergeResult> {
    let base = entry_map(objects, base_tree, cancel)?;
    let ours = entry_map(objects, ours_tree, cancel)?;
    let theirs = entry_map(objects, theirs_tree, cancel)?;

    let mut paths: Vec<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    paths.sort();
    paths.dedup();

    let mut result = TreeMergeResult {
        entries: BTreeMap::new(),
        conflicts: Vec::new(),
    };

    for path in paths {
        cancel.check()?;
        let b = base.get(path);
        let o = ours.get(path);
        let t = theirs.get(path);

        // a file on one side where the other side grew a directory
        if directory_file_clash(path, o, &theirs) || directory_file_clash(path, t, &ours) {
            result.conflicts.push(MergeConflict {
                path: path.clone(),
                kind: ConflictKind::DirectoryFile,
                base: b.map(|e| e.1),
                ours: o.map(|e| e.1),
                theirs: t.map(|e| e.1),
                preview: None,
            });
            continue;
        }

        match (b, o, t) {
            (_, None, None) => {} // gone on both sides
            (Some(base_entry), Some(o), None) => {
                if o == base_entry {
                    // accept theirs' delete
                } else {
                    result.conflicts.push(MergeConflict {
                        path: path.clone(),
                        kind: ConflictKind::ModifyDelete,
                        base: b.map(|e| e.1),
                        ours: Some(o.1),
                        theirs: None,
                        preview: None,
                    });
                }
            }
            (Some(base_entry), None, Some(t)) => {
                if t == base_entry {
                    // accept ours' delete
                } else {
                    result.conflicts.push(MergeConflict {
                        path: path.clone(),
                        kind: ConflictKind::DeleteModify,
                        base: b.map(|e| e.1),
                        ours: None,
                        theirs: Some(t.1),
                        preview: None,
                    });
                }
            }
            (None, Some(o), Some(t)) => {
                if o == t {
                    result.entries.insert(path.clone(), *o);
                } else {
                    result.conflicts.push(MergeConflict {
                        path: path.clone(),
                        kind: ConflictKind::AddAdd,
                        base: None,
                        ours: Some(o.1),
                        theirs: Some(t.1),
                        preview: None,
                    });
                }
            }
            (None, Some(o), None) => {
                result.entries.insert(path.clone(), *o);
            }
            (None, None, Some(t)) => {
                result.entries.insert(path.clone(), *t);
            }
            (Some(b), Some(o), Some(t)) => {
                if o == t {
                    // both agree (includes the unchanged case)
                    result.entries.insert(path.clone(), *o);
                } else if o == b {
                    result.entries.insert(path.clone(), *t);
                } else if t == b {
                    result.entries.insert(path.clone(), *o);
                } else {
                    merge_entry_content(objects, path, b, o, t, &mut result)?;
                }
            }
        }
    }
    Ok(result)
}

/// all sides changed one path: try a line merge
fn merge_entry_content(
    objects: &ObjectStore,
    path: &str,
    base: &(u32, Oid),
    ours: &(u32, Oid),
    theirs: &(u32, Oid),
    result: &mut TreeMergeResult,
) -> Result<()> {
    let base_blob = objects.get_blob(&base.1)?;
    let ours_blob = objects.get_blob(&ours.1)?;
    let theirs_blob = objects.get_blob(&theirs.1)?;

    if is_binary_blob(&base_blob) || is_binary_blob(&ours_blob) || is_binary_blob(&theirs_blob) {
        result.conflicts.push(MergeConflict {
            path: path.to_string(),
            kind: ConflictKind::Binary,
            base: Some(base.1),
            ours: Some(ours.1),
            theirs: Some(theirs.1),
            preview: None,
        });
        return Ok(());
    }

    let merged = merge_text(&base_blob, &ours_blob, &theirs_blob);
    let mode = if ours.0 != base.0 { ours.0 } else { theirs.0 };
    let blob = objects.put_blob(merged.text.as_bytes())?;
    if merged.clean {
        result.entries.insert(path.to_string(), (mode, blob));
    } else {
        result.conflicts.push(MergeConflict {
            path: path.to_string(),
            kind: ConflictKind::Content,
            base: Some(base.1),
            ours: Some(ours.1),
            theirs: Some(theirs.1),
            preview: Some(blob),
        });
    }
    Ok(())
}

fn directory_file_clash(
    path: &str,
    side_entry: Option<&(u32, Oid)>,
    other_side: &BTreeMap<String, (u32, Oid)>,
) -> bool {
    if side_entry.is_none() {
        return false;
    }
    let prefix = format!("{path}/");
    other_side
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(p, _)| p.starts_with(&prefix))
}

/// flatten a tree into `path -> (mode bits, oid)` for files
fn entry_map(
    objects: &ObjectStore,
    tree: &Oid,
    cancel: &CancelToken,
) -> Result<BTreeMap<String, (u32, Oid)>> {
    let mut map = BTreeMap::new();
    for (path, entry) in objects.walk_tree(tree, false, cancel)? {
        map.insert(path, (mode_bits(entry.mode), entry.oid));
    }
    Ok(map)
}

fn mode_bits(mode: EntryMode) -> u32 {
    match mode {
        EntryMode::Regular => 0o100644,
        EntryMode::Executable => 0o100755,
        EntryMode::Symlink => 0o120000,
        EntryMode::Submodule => 0o160000,
        EntryMode::Subtree => 0o040000,
    }
}

fn mode_from_bits(bits: u32) -> EntryMode {
    match bits {
        0o100755 => EntryMode::Executable,
        0o120000 => EntryMode::Symlink,
        0o160000 => EntryMode::Submodule,
        0o040000 => EntryMode::Subtree,
        _ => EntryMode::Regular,
    }
}

/// rebuild a nested tree from a flat path map, bottom-up
pub(crate) fn build_tree(
    objects: &ObjectStore,
    entries: &BTreeMap<String, (u32, Oid)>,
) -> Result<Oid> {
    #[derive(Default)]
    struct Dir {
        files: Vec<(String, u32, Oid)>,
        dirs: BTreeMap<String, Dir>,
    }

    let mut root = Dir::default();
    for (path, (mode, oid)) in entries {
        let mut dir = &mut root;
        let mut components: Vec<&str> = path.split('/').collect();
        let file = components.pop().unwrap_or_default().to_string();
        for component in components {
            dir = dir.dirs.entry(component.to_string()).or_default();
        }
        dir.files.push((file, *mode, *oid));
    }

    fn write_dir(objects: &ObjectStore, dir: &Dir) -> Result<Oid> {
        let mut entries = Vec::new();
        for (name, sub) in &dir.dirs {
            let oid = write_dir(objects, sub)?;
            entries.push(TreeEntry::new(EntryMode::Subtree, name.clone(), oid));
        }
        for (name, mode, oid) in &dir.files {
            entries.push(TreeEntry::new(mode_from_bits(*mode), name.clone(), *oid));
        }
        objects.put_tree(&Tree::new(entries)?)
    }

    write_dir(objects, &root)
}

/// compute a virtual common-ancestor tree from several merge bases
///
/// the bases merge pairwise; text conflicts inside the virtual base keep
/// their markers, which the outer merge then treats as content.
pub fn compute_recursive_merge_base(
    objects: &ObjectStore,
    bases: &[Oid],
    cancel: &CancelToken,
) -> Result<Oid> {
    let mut virtual_tree = objects.get_commit(&bases[0])?.tree;
    for next in &bases[1..] {
        let next_tree = objects.get_commit(next)?.tree;
        let inner_base = match find_merge_base(objects, &bases[0], next)? {
            Some(base) => objects.get_commit(&base)?.tree,
            None => objects.put_tree(&Tree::empty())?,
        };
        let mut result = merge_trees(objects, &inner_base, &virtual_tree, &next_tree, cancel)?;
        // the virtual ancestor keeps marker-laden previews; the outer
        // merge sees them as plain content
        for conflict in result.conflicts.drain(..) {
            let staged = conflict
                .preview
                .or(conflict.ours)
                .or(conflict.theirs)
                .or(conflict.base);
            if let Some(oid) = staged {
                result
                    .entries
                    .insert(conflict.path, (mode_bits(EntryMode::Regular), oid));
            }
        }
        virtual_tree = build_tree(objects, &result.entries)?;
    }
    Ok(virtual_tree)
}

// ---- line-level three-way merge ----

struct MergedText {
    text: String,
    clean: bool,
}

/// one replaced run of base lines
#[derive(Debug, PartialEq)]
struct Hunk {
    /// first replaced base line
    start: usize,
    /// one past the last replaced base line
    end: usize,
    replacement: Vec<String>,
}

/// split into lines, normalising `\r\n` to `\n`
fn split_lines(data: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(data);
    let mut lines: Vec<String> = text.split('\n').map(|l| l.trim_end_matches('\r').to_string()).collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    lines
}

/// longest common subsequence via the classic DP backtrack
fn lcs(a: &[String], b: &[String]) -> Vec<(usize, usize)> {
    let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }
    let mut pairs = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

/// runs of base lines deleted together with their replacements
fn diff_hunks(base: &[String], side: &[String]) -> Vec<Hunk> {
    let common = lcs(base, side);
    let mut hunks = Vec::new();
    let (mut b, mut s) = (0usize, 0usize);

    for (bi, si) in common.iter().copied().chain(std::iter::once((base.len(), side.len()))) {
        if bi > b || si > s {
            hunks.push(Hunk {
                start: b,
                end: bi,
                replacement: side[s..si].to_vec(),
            });
        }
        b = bi + 1;
        s = si + 1;
    }
    hunks
}

/// three-way text merge with conflict markers
fn merge_text(base: &[u8], ours: &[u8], theirs: &[u8]) -> MergedText {
    let base_lines = split_lines(base);
    let ours_lines = split_lines(ours);
    let theirs_lines = split_lines(theirs);

    let ours_hunks = diff_hunks(&base_lines, &ours_lines);
    let theirs_hunks = diff_hunks(&base_lines, &theirs_lines);

    let mut out: Vec<String> = Vec::new();
    let mut clean = true;
    let mut pos = 0usize;
    let (mut i, mut j) = (0usize, 0usize);

    while i < ours_hunks.len() || j < theirs_hunks.len() {
        let next_ours = ours_hunks.get(i);
        let next_theirs = theirs_hunks.get(j);

        // the next hunk group begins at the earlier of the two sides
        let start = match (next_ours, next_theirs) {
            (Some(o), Some(t)) => o.start.min(t.start),
            (Some(o), None) => o.start,
            (None, Some(t)) => t.start,
            (None, None) => unreachable!("loop condition holds a hunk"),
        };

        // copy untouched base lines up to the group
        out.extend(base_lines[pos..start].iter().cloned());

        // grow the group while hunks from either side overlap it
        let mut end = start;
        let mut group_ours = Vec::new();
        let mut group_theirs = Vec::new();
        loop {
            let mut grew = false;
            while let Some(h) = ours_hunks.get(i) {
                if h.start <= end {
                    end = end.max(h.end);
                    group_ours.push(h);
                    i += 1;
                    grew = true;
                } else {
                    break;
                }
            }
            while let Some(h) = theirs_hunks.get(j) {
                if h.start <= end {
                    end = end.max(h.end);
                    group_theirs.push(h);
                    j += 1;
                    grew = true;
                } else {
                    break;
                }
            }
            if !grew {
                break;
            }
        }

        let ours_region = apply_hunks(&base_lines, start, end, &group_ours);
        let theirs_region = apply_hunks(&base_lines, start, end, &group_theirs);

        if group_theirs.is_empty() || ours_region == theirs_region {
            out.extend(ours_region);
        } else if group_ours.is_empty() {
            out.extend(theirs_region);
        } else {
            clean = false;
            out.push("<<<<<<< ours".to_string());
            out.extend(ours_region);
            out.push("=======".to_string());
            out.extend(theirs_region);
            out.push(">>>>>>> theirs".to_string());
        }
        pos = end;
    }
    out.extend(base_lines[pos..].iter().cloned());

    let mut text = out.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    MergedText { text, clean }
}

/// region [start, end) of the base with a side's hunks applied
fn apply_hunks(base: &[String], start: usize, end: usize, hunks: &[&Hunk]) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = start;
    for hunk in hunks {
        out.extend(base[pos..hunk.start].iter().cloned());
        out.extend(hunk.replacement.iter().cloned());
        pos = hunk.end;
    }
    out.extend(base[pos..end].iter().cloned());
    out
}
