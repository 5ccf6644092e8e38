//! `JournalDiffCallback` — accumulates unclean paths observed during a
//! diff (spec.md §4.8).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::diff::DiffCallback;
use crate::error::MountError;

/// Accumulates removed and modified paths into a synchronized set.
/// Additions and ignored files are not unclean; diff errors are logged
/// and otherwise ignored (policy: do not add to the unclean set, per
/// spec.md §4.8).
pub struct JournalDiffCallback {
    unclean: Mutex<BTreeSet<PathBuf>>,
}

impl JournalDiffCallback {
    /// A fresh callback with no paths recorded yet.
    pub fn new() -> Self {
        JournalDiffCallback {
            unclean: Mutex::new(BTreeSet::new()),
        }
    }

    /// Drain the accumulated unclean-path set atomically.
    pub fn steal_unclean_paths(&self) -> BTreeSet<PathBuf> {
        std::mem::take(&mut *self.unclean.lock())
    }
}

impl Default for JournalDiffCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffCallback for JournalDiffCallback {
    fn ignored_file(&self, _path: &Path) {}

    fn added_file(&self, _path: &Path) {}

    fn removed_file(&self, path: &Path) {
        self.unclean.lock().insert(path.to_path_buf());
    }

    fn modified_file(&self, path: &Path) {
        self.unclean.lock().insert(path.to_path_buf());
    }

    fn diff_error(&self, path: &Path, err: &MountError) {
        log::warn!("diff error at {path:?}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_removed_and_modified_are_unclean() {
        let cb = JournalDiffCallback::new();
        cb.added_file(Path::new("new"));
        cb.ignored_file(Path::new("ign"));
        cb.removed_file(Path::new("gone"));
        cb.modified_file(Path::new("changed"));
        cb.diff_error(Path::new("bad"), &MountError::NotFound);

        let unclean = cb.steal_unclean_paths();
        assert_eq!(
            unclean,
            BTreeSet::from([PathBuf::from("gone"), PathBuf::from("changed")])
        );
    }

    #[test]
    fn steal_drains_the_set() {
        let cb = JournalDiffCallback::new();
        cb.removed_file(Path::new("gone"));
        assert_eq!(cb.steal_unclean_paths().len(), 1);
        assert!(cb.steal_unclean_paths().is_empty());
    }
}
