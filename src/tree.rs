//! Source-control tree shapes as seen by the checkout/diff engines.
//!
//! These are the minimal shapes the core needs from the (external)
//! object store; they are not a general source-control tree API.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

use crate::ids::RootId;

fn ascii_eq_ignore_case(a: &OsStr, b: &OsStr) -> bool {
    a.as_bytes().eq_ignore_ascii_case(b.as_bytes())
}

/// One of the four tree entry kinds named in spec.md's glossary.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub enum TreeEntryType {
    /// A subdirectory (another tree).
    Tree,
    /// A regular, non-executable file.
    RegularFile,
    /// A regular, executable file.
    ExecutableFile,
    /// A symbolic link.
    Symlink,
}

impl TreeEntryType {
    /// Whether this entry type denotes a directory.
    pub fn is_dir(self) -> bool {
        matches!(self, TreeEntryType::Tree)
    }

    /// Whether this entry type denotes a symlink.
    pub fn is_symlink(self) -> bool {
        matches!(self, TreeEntryType::Symlink)
    }
}

/// A single named entry within a [`Tree`].
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeEntry {
    /// Entry name within its parent tree.
    pub name: OsString,
    /// What kind of entry this is.
    pub entry_type: TreeEntryType,
    /// Content-addressed id of the entry's contents (a sub-tree hash for
    /// `Tree` entries, a blob hash otherwise).
    pub hash: RootId,
}

/// An immutable, content-addressed directory as fetched from the object
/// store. Entries are kept in a `BTreeMap` so iteration is in a stable,
/// name-sorted order, which keeps diff output deterministic.
#[derive(Clone, Default, Debug)]
pub struct Tree {
    entries: BTreeMap<OsString, TreeEntry>,
}

impl Tree {
    /// Build a tree from a set of entries.
    pub fn new(entries: impl IntoIterator<Item = TreeEntry>) -> Self {
        Tree {
            entries: entries.into_iter().map(|e| (e.name.clone(), e)).collect(),
        }
    }

    /// Look up an entry by name. When `case_sensitive` is false, falls back
    /// to an ASCII case-insensitive scan if the exact name isn't present
    /// (spec.md §3 `Mount::case_sensitive`).
    pub fn get(&self, name: &OsStr, case_sensitive: bool) -> Option<&TreeEntry> {
        if let Some(entry) = self.entries.get(name) {
            return Some(entry);
        }
        if case_sensitive {
            return None;
        }
        self.entries.values().find(|entry| ascii_eq_ignore_case(&entry.name, name))
    }

    /// Iterate entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::RootId;

    fn entry(name: &str) -> TreeEntry {
        TreeEntry {
            name: OsString::from(name),
            entry_type: TreeEntryType::RegularFile,
            hash: RootId::new(vec![0]),
        }
    }

    #[test]
    fn case_sensitive_lookup_requires_exact_match() {
        let tree = Tree::new([entry("README.md")]);
        assert!(tree.get(OsStr::new("readme.md"), true).is_none());
        assert!(tree.get(OsStr::new("README.md"), true).is_some());
    }

    #[test]
    fn case_insensitive_lookup_falls_back_to_ascii_fold() {
        let tree = Tree::new([entry("README.md")]);
        assert_eq!(
            tree.get(OsStr::new("readme.md"), false).unwrap().name,
            OsString::from("README.md")
        );
    }
}
