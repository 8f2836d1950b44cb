use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::oid::Oid;

/// entry mode of a tree entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryMode {
    /// regular file, 100644
    Regular,
    /// executable file, 100755
    Executable,
    /// symbolic link, 120000
    Symlink,
    /// submodule (gitlink), 160000
    Submodule,
    /// subtree, 040000
    Subtree,
}

impl EntryMode {
    /// octal string as it appears in tree payloads (no leading zero)
    pub fn as_octal(&self) -> &'static str {
        match self {
            EntryMode::Regular => "100644",
            EntryMode::Executable => "100755",
            EntryMode::Symlink => "120000",
            EntryMode::Submodule => "160000",
            EntryMode::Subtree => "40000",
        }
    }

    /// parse an octal mode string
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "100644" => Ok(EntryMode::Regular),
            "100755" => Ok(EntryMode::Executable),
            "120000" => Ok(EntryMode::Symlink),
            "160000" => Ok(EntryMode::Submodule),
            "40000" | "040000" => Ok(EntryMode::Subtree),
            other => Err(Error::InvalidObject(format!("invalid entry mode: {other}"))),
        }
    }

    /// does this entry point at another tree
    pub fn is_subtree(&self) -> bool {
        matches!(self, EntryMode::Subtree)
    }
}

/// a single tree entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub name: String,
    pub oid: Oid,
}

impl TreeEntry {
    pub fn new(mode: EntryMode, name: impl Into<String>, oid: Oid) -> Self {
        Self {
            mode,
            name: name.into(),
            oid,
        }
    }
}

/// an ordered set of tree entries
///
/// the sort order (directories compared with a trailing `/`) is part of the
/// hashed content, so `Tree::new` canonicalises on construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// create a tree, validating names and sorting canonically
    pub fn new(mut entries: Vec<TreeEntry>) -> Result<Self> {
        for entry in &entries {
            validate_entry_name(&entry.name)?;
        }

        entries.sort_by(|a, b| compare_entries(a, b));

        for window in entries.windows(2) {
            if window[0].name == window[1].name {
                return Err(Error::InvalidObject(format!(
                    "duplicate tree entry name: {}",
                    window[0].name
                )));
            }
        }

        Ok(Self { entries })
    }

    /// the empty tree
    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    /// entries in canonical order
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// consume and return entries
    pub fn into_entries(self) -> Vec<TreeEntry> {
        self.entries
    }

    /// look up an entry by name
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// serialise to the canonical tree payload
    ///
    /// per entry: `mode SP name NUL 20-byte-raw-oid`
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.as_octal().as_bytes());
            out.push(b' ');
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }

    /// parse a tree payload, rejecting malformed or duplicate entries
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut rest = payload;

        while !rest.is_empty() {
            let sp = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| Error::InvalidObject("tree entry missing mode".to_string()))?;
            let mode_str = std::str::from_utf8(&rest[..sp])
                .map_err(|_| Error::InvalidObject("tree mode is not utf-8".to_string()))?;
            let mode = EntryMode::parse(mode_str)?;
            rest = &rest[sp + 1..];

            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::InvalidObject("tree entry missing name terminator".to_string()))?;
            let name = std::str::from_utf8(&rest[..nul])
                .map_err(|_| Error::InvalidObject("tree entry name is not utf-8".to_string()))?
                .to_string();
            rest = &rest[nul + 1..];

            if rest.len() < 20 {
                return Err(Error::InvalidObject("truncated tree entry oid".to_string()));
            }
            let oid = Oid::from_slice(&rest[..20])?;
            rest = &rest[20..];

            entries.push(TreeEntry { mode, name, oid });
        }

        // Tree::new re-validates names, re-sorts, and rejects duplicates
        Tree::new(entries)
    }
}

/// canonical tree sort: byte order with directories compared as `name/`
fn compare_entries(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let a_name = a.name.as_bytes();
    let b_name = b.name.as_bytes();
    let common = a_name.len().min(b_name.len());

    match a_name[..common].cmp(&b_name[..common]) {
        Ordering::Equal => {}
        other => return other,
    }

    let a_next = a_name.get(common).copied().or(if a.mode.is_subtree() {
        Some(b'/')
    } else {
        None
    });
    let b_next = b_name.get(common).copied().or(if b.mode.is_subtree() {
        Some(b'/')
    } else {
        None
    });

    match (a_next, b_next) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| {
            // identical up to one trailing `/`; compare remaining bytes
            a_name[common..].cmp(&b_name[common..])
        }),
    }
}

/// validate a tree entry name
fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidObject("empty tree entry name".to_string()));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidObject(format!(
            "tree entry name cannot be '{name}'"
        )));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(Error::InvalidObject(format!(
            "tree entry name cannot contain '/' or NUL: {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::hash_object;
    use crate::object::Kind;

    fn oid(n: u8) -> Oid {
        Oid::from_bytes([n; 20])
    }

    #[test]
    fn test_tree_sorts_entries() {
        let tree = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "zebra", oid(1)),
            TreeEntry::new(EntryMode::Regular, "apple", oid(2)),
        ])
        .unwrap();

        assert_eq!(tree.entries()[0].name, "apple");
        assert_eq!(tree.entries()[1].name, "zebra");
    }

    #[test]
    fn test_tree_directory_sorts_with_trailing_slash() {
        // git orders "foo.txt" before the directory "foo" because the
        // directory compares as "foo/" and '.' < '/'
        let tree = Tree::new(vec![
            TreeEntry::new(EntryMode::Subtree, "foo", oid(1)),
            TreeEntry::new(EntryMode::Regular, "foo.txt", oid(2)),
        ])
        .unwrap();

        assert_eq!(tree.entries()[0].name, "foo.txt");
        assert_eq!(tree.entries()[1].name, "foo");
    }

    #[test]
    fn test_tree_rejects_duplicates() {
        let result = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "same", oid(1)),
            TreeEntry::new(EntryMode::Regular, "same", oid(2)),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tree_rejects_bad_names() {
        for bad in ["", ".", "..", "a/b", "nul\0byte"] {
            let result = Tree::new(vec![TreeEntry::new(EntryMode::Regular, bad, oid(1))]);
            assert!(result.is_err(), "accepted invalid name {bad:?}");
        }
    }

    #[test]
    fn test_tree_serialize_parse_roundtrip() {
        let tree = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "greeting.txt", oid(1)),
            TreeEntry::new(EntryMode::Executable, "run.sh", oid(2)),
            TreeEntry::new(EntryMode::Subtree, "sub", oid(3)),
            TreeEntry::new(EntryMode::Symlink, "link", oid(4)),
        ])
        .unwrap();

        let payload = tree.serialize();
        let parsed = Tree::parse(&payload).unwrap();
        assert_eq!(tree, parsed);
    }

    #[test]
    fn test_tree_canonical_hash_is_order_independent() {
        let a = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "b", oid(2)),
            TreeEntry::new(EntryMode::Regular, "a", oid(1)),
        ])
        .unwrap();
        let b = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "a", oid(1)),
            TreeEntry::new(EntryMode::Regular, "b", oid(2)),
        ])
        .unwrap();

        assert_eq!(
            hash_object(Kind::Tree, &a.serialize()),
            hash_object(Kind::Tree, &b.serialize())
        );
    }

    #[test]
    fn test_known_tree_oid() {
        // tree with one entry: 100644 greeting.txt -> blob of "hello\n"
        let blob = hash_object(Kind::Blob, b"hello\n");
        let tree = Tree::new(vec![TreeEntry::new(EntryMode::Regular, "greeting.txt", blob)]).unwrap();
        let oid = hash_object(Kind::Tree, &tree.serialize());
        assert_eq!(oid.to_hex(), "57e9529754dc514a3ec10db2ff882018fbe1fcbf");
    }

    #[test]
    fn test_parse_truncated_tree() {
        let tree = Tree::new(vec![TreeEntry::new(EntryMode::Regular, "f", oid(1))]).unwrap();
        let mut payload = tree.serialize();
        payload.truncate(payload.len() - 5);
        assert!(Tree::parse(&payload).is_err());
    }

    #[test]
    fn test_empty_tree_serializes_empty() {
        assert!(Tree::empty().serialize().is_empty());
        assert_eq!(Tree::parse(b"").unwrap(), Tree::empty());
    }

    #[test]
    fn test_subtree_mode_accepts_padded_octal() {
        assert_eq!(EntryMode::parse("040000").unwrap(), EntryMode::Subtree);
        assert_eq!(EntryMode::parse("40000").unwrap(), EntryMode::Subtree);
    }
}
