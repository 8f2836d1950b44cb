use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::ops::diff::{diff_trees, DiffOptions, DiffStatus};
use crate::ops::tree_entry_at_path;
use crate::store::objects::ObjectStore;

/// one attributed line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlameLine {
    /// 1-based line number in the blamed version
    pub line_no: usize,
    /// commit that introduced the line
    pub oid: Oid,
    pub author: String,
    pub line: String,
}

/// attribute each line of `path` at `start` to the commit that introduced
/// it, following renames across history
///
/// the walk follows first parents; each step diffs the file against its
/// parent version and lines absent from the parent are pinned to the
/// child commit.
pub fn blame(
    objects: &ObjectStore,
    path: &str,
    start: &Oid,
    cancel: &CancelToken,
) -> Result<Vec<BlameLine>> {
    let start_commit = objects.get_commit(start)?;
    let blob = tree_entry_at_path(objects, &start_commit.tree, path)?
        .ok_or_else(|| Error::RefNotFound(format!("{path} not in {start}")))?;
    let lines = lines_of(&objects.get_blob(&blob)?);

    // (original line index, index in the version under inspection)
    let mut live: Vec<(usize, usize)> = (0..lines.len()).map(|i| (i, i)).collect();
    let mut attribution: Vec<Option<Oid>> = vec![None; lines.len()];

    let mut commit_oid = *start;
    let mut commit = start_commit;
    let mut current_path = path.to_string();
    let mut current_lines = lines.clone();

    while !live.is_empty() {
        cancel.check()?;
        let Some(parent_oid) = commit.parents.first().copied() else {
            // root commit introduced whatever is left
            for (orig, _) in live.drain(..) {
                attribution[orig] = Some(commit_oid);
            }
            break;
        };
        let parent = objects.get_commit(&parent_oid)?;

        // find the file in the parent, tracking renames
        let parent_path = match tree_entry_at_path(objects, &parent.tree, &current_path)? {
            Some(_) => Some(current_path.clone()),
            None => rename_source(objects, &parent.tree, &commit.tree, &current_path, cancel)?,
        };

        match parent_path {
            None => {
                // the file first appears in this commit
                for (orig, _) in live.drain(..) {
                    attribution[orig] = Some(commit_oid);
                }
                break;
            }
            Some(parent_path) => {
                let parent_blob = tree_entry_at_path(objects, &parent.tree, &parent_path)?
                    .ok_or_else(|| Error::RefNotFound(parent_path.clone()))?;
                let parent_lines = lines_of(&objects.get_blob(&parent_blob)?);

                // lines surviving into the parent carry over; the rest were
                // introduced here
                let mapping = line_mapping(&current_lines, &parent_lines);
                let mut still_live = Vec::new();
                for (orig, cur) in live.drain(..) {
                    match mapping.iter().find(|(c, _)| *c == cur) {
                        Some((_, parent_idx)) => still_live.push((orig, *parent_idx)),
                        None => attribution[orig] = Some(commit_oid),
                    }
                }
                live = still_live;

                commit_oid = parent_oid;
                commit = parent;
                current_path = parent_path;
                current_lines = parent_lines;
            }
        }
    }

    let mut out = Vec::with_capacity(lines.len());
    for (i, line) in lines.into_iter().enumerate() {
        let oid = attribution[i].unwrap_or(*start);
        let author = objects.get_commit(&oid)?.author.name;
        out.push(BlameLine {
            line_no: i + 1,
            oid,
            author,
            line,
        });
    }
    Ok(out)
}

/// the path in `parent_tree` that was renamed to `path` in `child_tree`
fn rename_source(
    objects: &ObjectStore,
    parent_tree: &Oid,
    child_tree: &Oid,
    path: &str,
    cancel: &CancelToken,
) -> Result<Option<String>> {
    let entries = diff_trees(
        objects,
        parent_tree,
        child_tree,
        &DiffOptions {
            detect_renames: true,
            cancel: cancel.clone(),
            ..Default::default()
        },
    )?;
    Ok(entries
        .into_iter()
        .find(|e| e.status == DiffStatus::Renamed && e.path == path)
        .and_then(|e| e.old_path))
}

fn lines_of(data: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(data);
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    lines
}

/// positions of child lines that survive into the parent, via LCS
fn line_mapping(child: &[String], parent: &[String]) -> Vec<(usize, usize)> {
    let mut table = vec![vec![0usize; parent.len() + 1]; child.len() + 1];
    for i in (0..child.len()).rev() {
        for j in (0..parent.len()).rev() {
            table[i][j] = if child[i] == parent[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }
    let mut pairs = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < child.len() && j < parent.len() {
        if child[i] == parent[j] {
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
