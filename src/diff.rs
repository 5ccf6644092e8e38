//! `DiffEngine` — streams a tree-vs-working-copy diff with a pluggable
//! callback and ignore stack (spec.md §4.3).

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::error::{MountError, MountResult};
use crate::external::{
    FetchContext, ObjectStore, ParentMismatchEvent, StructuredLogger, WorkingTree,
};
use crate::ids::{InodeNumber, RootId};
use crate::parent_commit::{ParentCommit, LOCK_TIMEOUT};
use crate::tree::{Tree, TreeEntry, TreeEntryType};

/// Receives diff events as the engine walks the tree (spec.md §4.3).
pub trait DiffCallback: Send + Sync {
    /// A path matched the ignore stack.
    fn ignored_file(&self, path: &Path);
    /// A path exists in the working copy but not in the target tree.
    fn added_file(&self, path: &Path);
    /// A path exists in the target tree but not in the working copy.
    fn removed_file(&self, path: &Path);
    /// A path exists in both but its content or kind differs.
    fn modified_file(&self, path: &Path);
    /// Walking a single path failed; the rest of the diff continues.
    fn diff_error(&self, path: &Path, err: &MountError);
}

/// Decides which untracked paths the diff should treat as ignored
/// (spec.md §4.3 "top-level gitignore stack").
pub trait IgnoreMatcher: Send + Sync {
    /// Whether `path` matches an ignore rule.
    fn is_ignored(&self, path: &Path) -> bool;
}

/// An ignore matcher that never ignores anything.
pub struct NullIgnoreMatcher;

impl IgnoreMatcher for NullIgnoreMatcher {
    fn is_ignored(&self, _path: &Path) -> bool {
        false
    }
}

/// Bundles the knobs a diff call needs: the callback, whether ignored
/// paths are reported at all, case sensitivity, and the ignore stack.
pub struct DiffContext<'a> {
    /// Sink for diff events.
    pub callback: &'a dyn DiffCallback,
    /// Whether ignored paths are reported via `ignored_file` at all.
    pub list_ignored: bool,
    /// Whether name comparisons are case-sensitive (spec.md §3 `Mount`).
    pub case_sensitive: bool,
    /// Ignore stack consulted for untracked working-copy entries.
    pub ignore: &'a dyn IgnoreMatcher,
}

/// Streams differences between a working-copy subtree and a
/// content-addressed target tree.
pub struct DiffEngine<'a> {
    tree: &'a dyn WorkingTree,
    object_store: &'a dyn ObjectStore,
}

impl<'a> DiffEngine<'a> {
    /// Build an engine against `tree`, fetching target trees from
    /// `object_store`.
    pub fn new(tree: &'a dyn WorkingTree, object_store: &'a dyn ObjectStore) -> Self {
        DiffEngine { tree, object_store }
    }

    /// Diff `root_inode` against the tree identified by `target_root_id`.
    pub async fn diff(
        &self,
        ctx: &DiffContext<'_>,
        root_inode: InodeNumber,
        target_root_id: &RootId,
        fetch_ctx: &FetchContext,
    ) -> MountResult<()> {
        let target_tree = self.object_store.get_root_tree(target_root_id, fetch_ctx).await?;
        self.diff_dir(ctx, root_inode, &target_tree, Path::new(""), fetch_ctx)
            .await;
        Ok(())
    }

    /// Diff with parent enforcement (spec.md §4.3): requires
    /// `parent_commit` currently equal `expected`, failing with
    /// `OutOfDateParent` and a `ParentMismatch` telemetry event otherwise.
    pub async fn diff_with_parent_enforcement(
        &self,
        ctx: &DiffContext<'_>,
        root_inode: InodeNumber,
        parent_commit: &ParentCommit,
        expected: &RootId,
        logger: &dyn StructuredLogger,
        fetch_ctx: &FetchContext,
    ) -> MountResult<()> {
        let guard = parent_commit.acquire_reader_timeout(LOCK_TIMEOUT).await?;
        if guard.as_bytes() != expected.as_bytes() {
            let actual = guard.clone();
            drop(guard);
            logger.parent_mismatch(ParentMismatchEvent {
                expected: expected.clone(),
                actual: actual.clone(),
            });
            return Err(MountError::OutOfDateParent {
                expected: expected.clone(),
                actual,
            });
        }
        drop(guard);
        self.diff(ctx, root_inode, expected, fetch_ctx).await
    }

    fn diff_dir<'b>(
        &'b self,
        ctx: &'b DiffContext<'b>,
        dir_inode: InodeNumber,
        target_tree: &'b Tree,
        path_prefix: &'b Path,
        fetch_ctx: &'b FetchContext,
    ) -> Pin<Box<dyn Future<Output = ()> + 'b>> {
        Box::pin(async move {
            let working_children = match self.tree.list_children(dir_inode).await {
                Ok(children) => children,
                Err(err) => {
                    ctx.callback.diff_error(path_prefix, &err);
                    return;
                }
            };

            let mut seen: BTreeSet<OsString> = BTreeSet::new();
            for (name, child_inode) in &working_children {
                let target_entry = target_tree.get(name, ctx.case_sensitive);
                if let Some(entry) = target_entry {
                    // Mark the target tree's own name as matched, not the
                    // working-tree name, so a case-insensitive match doesn't
                    // leave the target entry looking unmatched below.
                    seen.insert(entry.name.clone());
                }
                let full_path = path_prefix.join(name);
                if let Err(err) = self.diff_entry(ctx, *child_inode, target_entry, &full_path, fetch_ctx).await {
                    ctx.callback.diff_error(&full_path, &err);
                }
            }

            for entry in target_tree.iter() {
                if !seen.contains(&entry.name) {
                    ctx.callback.removed_file(&path_prefix.join(&entry.name));
                }
            }
        })
    }

    async fn diff_entry(
        &self,
        ctx: &DiffContext<'_>,
        child_inode: InodeNumber,
        target_entry: Option<&TreeEntry>,
        full_path: &Path,
        fetch_ctx: &FetchContext,
    ) -> MountResult<()> {
        let Some(entry) = target_entry else {
            if ctx.ignore.is_ignored(full_path) {
                if ctx.list_ignored {
                    ctx.callback.ignored_file(full_path);
                }
            } else {
                ctx.callback.added_file(full_path);
            }
            return Ok(());
        };

        let working_kind = self.tree.entry_kind(child_inode).await?;
        if working_kind != entry.entry_type {
            ctx.callback.modified_file(full_path);
            return Ok(());
        }

        if entry.entry_type == TreeEntryType::Tree {
            let subtree = self.object_store.get_root_tree(&entry.hash, fetch_ctx).await?;
            self.diff_dir(ctx, child_inode, &subtree, full_path, fetch_ctx).await;
        } else {
            let working_hash = self.tree.content_hash(child_inode).await?;
            if working_hash.as_bytes() != entry.hash.as_bytes() {
                ctx.callback.modified_file(full_path);
            }
        }
        Ok(())
    }
}
