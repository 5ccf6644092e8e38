//! `CheckoutEngine` — the multi-phase commit-switch transaction
//! (spec.md §4.2).

use std::collections::BTreeSet;
use std::future::Future;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, UNIX_EPOCH};

use tokio::sync::Mutex as AsyncMutex;

use crate::config::CheckoutMode;
use crate::diff::{DiffContext, DiffEngine, NullIgnoreMatcher};
use crate::error::{MountError, MountResult};
use crate::external::{Clock, FaultInjector, FetchContext, FinishedCheckoutEvent, Journal, ObjectStore, StructuredLogger, WorkingTree};
use crate::ids::{InodeNumber, RootId};
use crate::journal_diff::JournalDiffCallback;
use crate::parent_commit::{ParentCommit, LOCK_TIMEOUT};
use crate::tree::{Tree, TreeEntry, TreeEntryType};

/// Atomic "last checkout time," released-store/acquire-load per
/// spec.md §5.
pub struct LastCheckoutTime(AtomicU64);

impl LastCheckoutTime {
    /// A last-checkout-time with no checkout recorded yet.
    pub fn new() -> Self {
        LastCheckoutTime(AtomicU64::new(0))
    }

    /// Record a checkout at `clock`'s current time.
    pub fn touch(&self, clock: &dyn Clock) {
        let secs = clock
            .now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.0.store(secs, Ordering::Release);
    }

    /// Seconds since epoch of the last recorded checkout, or 0 if none.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for LastCheckoutTime {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of conflict a path hit during checkout apply.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum ConflictKind {
    /// Locally modified and also changed by the target commit.
    ModifiedModified,
    /// Locally modified but removed by the target commit.
    ModifiedRemoved,
    /// Entry kind (file/dir/symlink) differs between working copy and
    /// target tree at an otherwise-conflicting path.
    TypeMismatch,
}

/// One conflict surfaced by a checkout (spec.md §4.2 phase 8).
#[derive(Clone, Debug)]
pub struct Conflict {
    /// Path, relative to mount root, that conflicted.
    pub path: PathBuf,
    /// What kind of conflict this was.
    pub kind: ConflictKind,
}

/// Per-phase timing recorded for a checkout (spec.md §4.2 "`CheckoutTimes`
/// stopwatch").
#[derive(Clone, Copy, Debug)]
pub struct CheckoutTimes {
    /// Total wall-clock time for the whole transaction.
    pub total: Duration,
    /// Time spent in the diff phase. Zero in `DryRun`, which skips it.
    pub diff: Duration,
    /// Time spent applying the checkout.
    pub apply: Duration,
}

/// Result of a completed checkout transaction.
#[derive(Clone, Debug)]
pub struct CheckoutOutcome {
    /// Conflicts observed while applying the checkout.
    pub conflicts: Vec<Conflict>,
    /// Per-phase timings.
    pub times: CheckoutTimes,
}

/// Drives a single checkout transaction against a working tree.
pub struct CheckoutEngine<'a> {
    tree: &'a dyn WorkingTree,
    object_store: &'a dyn ObjectStore,
    fault_injector: &'a dyn FaultInjector,
    logger: &'a dyn StructuredLogger,
    clock: &'a dyn Clock,
    case_sensitive: bool,
}

impl<'a> CheckoutEngine<'a> {
    /// Build an engine against the given collaborators. `case_sensitive`
    /// mirrors `MountConfig::case_sensitive` and governs both the
    /// unclean-path diff and the apply phase's name lookups.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree: &'a dyn WorkingTree,
        object_store: &'a dyn ObjectStore,
        fault_injector: &'a dyn FaultInjector,
        logger: &'a dyn StructuredLogger,
        clock: &'a dyn Clock,
        case_sensitive: bool,
    ) -> Self {
        CheckoutEngine {
            tree,
            object_store,
            fault_injector,
            logger,
            clock,
            case_sensitive,
        }
    }

    /// Run a checkout transaction from `ParentCommit`'s current value to
    /// `target_root_id`, per spec.md §4.2's eleven phases.
    #[allow(clippy::too_many_arguments)]
    pub async fn checkout(
        &self,
        parent_commit: &ParentCommit,
        rename_lock: &AsyncMutex<()>,
        root_inode: InodeNumber,
        journal: &dyn Journal,
        last_checkout_time: &LastCheckoutTime,
        mode: CheckoutMode,
        target_root_id: RootId,
        mount_path: &Path,
    ) -> MountResult<CheckoutOutcome> {
        let start = Instant::now();

        // Phase 1: acquire the parent writer lock.
        let mut parent_guard = parent_commit.acquire_writer_timeout(LOCK_TIMEOUT).await?;
        let old_root_id = parent_guard.clone();

        // Phase 2.
        last_checkout_time.touch(self.clock);

        // Phase 3.
        self.fault_injector.check("checkout", mount_path).await?;

        // Phase 4: fetch old and new trees in parallel.
        let fetch_ctx = FetchContext::new();
        let (old_tree, new_tree) = tokio::try_join!(
            self.object_store.get_root_tree(&old_root_id, &fetch_ctx),
            self.object_store.get_root_tree(&target_root_id, &fetch_ctx),
        )?;

        // Phase 5: diff against the old tree to find unclean paths.
        let diff_start = Instant::now();
        let unclean = if mode != CheckoutMode::DryRun {
            let callback = JournalDiffCallback::new();
            let diff_ctx = DiffContext {
                callback: &callback,
                list_ignored: false,
                case_sensitive: self.case_sensitive,
                ignore: &NullIgnoreMatcher,
            };
            let diff_engine = DiffEngine::new(self.tree, self.object_store);
            diff_engine
                .diff(&diff_ctx, root_inode, &old_root_id, &fetch_ctx)
                .await?;
            callback.steal_unclean_paths()
        } else {
            BTreeSet::new()
        };
        let diff_elapsed = diff_start.elapsed();

        // Phase 6: acquire the rename lock.
        let rename_guard = rename_lock.lock().await;

        // Phase 7.
        self.fault_injector.check("inodeCheckout", mount_path).await?;

        // Phase 8: apply (or, in DryRun, just collect conflicts).
        let apply_start = Instant::now();
        let mut conflicts = Vec::new();
        let dry_run = mode == CheckoutMode::DryRun;
        let apply_mode = if dry_run { CheckoutMode::DryRun } else { mode };
        self.apply_dir(
            root_inode,
            &old_tree,
            &new_tree,
            &unclean,
            apply_mode,
            Path::new(""),
            &fetch_ctx,
            &mut conflicts,
        )
        .await?;
        let apply_elapsed = apply_start.elapsed();

        // Phase 9: finish.
        if !dry_run {
            *parent_guard = target_root_id.clone();
        }
        drop(parent_guard);
        drop(rename_guard);

        // Phase 10: journal append.
        if !dry_run {
            if unclean.is_empty() {
                journal
                    .record_hash_update(Some(old_root_id.clone()), target_root_id.clone())
                    .await;
            } else {
                journal
                    .record_unclean_paths(old_root_id.clone(), target_root_id.clone(), unclean.clone())
                    .await;
            }
        }

        // Phase 11: telemetry.
        let total = start.elapsed();
        self.logger.finished_checkout(FinishedCheckoutEvent {
            mode,
            duration: total,
            success: true,
            trees_fetched: fetch_ctx.trees_fetched(),
            blobs_fetched: fetch_ctx.blobs_fetched(),
        });

        Ok(CheckoutOutcome {
            conflicts,
            times: CheckoutTimes {
                total,
                diff: diff_elapsed,
                apply: apply_elapsed,
            },
        })
    }

    fn apply_dir<'b>(
        &'b self,
        dir_inode: InodeNumber,
        old_tree: &'b Tree,
        new_tree: &'b Tree,
        unclean: &'b BTreeSet<PathBuf>,
        mode: CheckoutMode,
        path_prefix: &'b Path,
        fetch_ctx: &'b FetchContext,
        conflicts: &'b mut Vec<Conflict>,
    ) -> Pin<Box<dyn Future<Output = MountResult<()>> + 'b>> {
        Box::pin(async move {
            let working_children = self.tree.list_children(dir_inode).await?;
            let mut seen: BTreeSet<std::ffi::OsString> = BTreeSet::new();

            for (name, child_inode) in &working_children {
                let full_path = path_prefix.join(name);
                let target_entry = new_tree.get(name, self.case_sensitive);
                let old_entry = old_tree.get(name, self.case_sensitive);
                // Mark the target tree's own name as matched, not the
                // working-tree name, so a case-insensitive match doesn't
                // get re-materialized by the pass below as "new".
                if let Some(entry) = target_entry {
                    seen.insert(entry.name.clone());
                }

                match target_entry {
                    None => {
                        // Dropped by the target commit.
                        if old_entry.is_none() {
                            // Never tracked; leave the local file alone.
                            continue;
                        }
                        if unclean.contains(&full_path) {
                            conflicts.push(Conflict {
                                path: full_path.clone(),
                                kind: ConflictKind::ModifiedRemoved,
                            });
                            if mode != CheckoutMode::Force {
                                continue;
                            }
                        }
                        self.tree.remove_entry(dir_inode, name).await?;
                    }
                    Some(entry) => {
                        let unchanged_by_checkout = old_entry
                            .map(|o| o.hash.as_bytes() == entry.hash.as_bytes() && o.entry_type == entry.entry_type)
                            .unwrap_or(false);
                        if unchanged_by_checkout {
                            continue;
                        }

                        let mut blocked = false;
                        if unclean.contains(&full_path) {
                            let working_kind = self.tree.entry_kind(*child_inode).await?;
                            let kind = if working_kind != entry.entry_type {
                                ConflictKind::TypeMismatch
                            } else {
                                ConflictKind::ModifiedModified
                            };
                            conflicts.push(Conflict {
                                path: full_path.clone(),
                                kind,
                            });
                            blocked = mode != CheckoutMode::Force;
                        }
                        if blocked || mode == CheckoutMode::DryRun {
                            continue;
                        }

                        self.materialize(dir_inode, entry, fetch_ctx).await?;
                        if entry.entry_type == TreeEntryType::Tree {
                            let new_subtree = self.object_store.get_root_tree(&entry.hash, fetch_ctx).await?;
                            let old_subtree = match old_entry {
                                Some(o) if o.entry_type == TreeEntryType::Tree => {
                                    self.object_store.get_root_tree(&o.hash, fetch_ctx).await?
                                }
                                _ => Tree::default(),
                            };
                            self.apply_dir(
                                *child_inode,
                                &old_subtree,
                                &new_subtree,
                                unclean,
                                mode,
                                &full_path,
                                fetch_ctx,
                                conflicts,
                            )
                            .await?;
                        }
                    }
                }
            }

            if mode != CheckoutMode::DryRun {
                for entry in new_tree.iter() {
                    if seen.contains(&entry.name) {
                        continue;
                    }
                    let full_path = path_prefix.join(&entry.name);
                    let child_inode = self.materialize(dir_inode, entry, fetch_ctx).await?;
                    if entry.entry_type == TreeEntryType::Tree {
                        let new_subtree = self.object_store.get_root_tree(&entry.hash, fetch_ctx).await?;
                        self.apply_dir(
                            child_inode,
                            &Tree::default(),
                            &new_subtree,
                            unclean,
                            mode,
                            &full_path,
                            fetch_ctx,
                            conflicts,
                        )
                        .await?;
                    }
                }
            }

            Ok(())
        })
    }

    async fn materialize(
        &self,
        parent: InodeNumber,
        entry: &TreeEntry,
        fetch_ctx: &FetchContext,
    ) -> MountResult<InodeNumber> {
        match entry.entry_type {
            TreeEntryType::Tree => match self.tree.mkdir(parent, &entry.name).await {
                Ok(ino) => Ok(ino),
                Err(MountError::AlreadyExists) => self
                    .tree
                    .lookup_child(parent, &entry.name)
                    .await?
                    .ok_or(MountError::NotFound),
                Err(other) => Err(other),
            },
            TreeEntryType::RegularFile | TreeEntryType::ExecutableFile => {
                let content = self.object_store.get_blob_content(&entry.hash, fetch_ctx).await?;
                self.tree
                    .write_file(
                        parent,
                        &entry.name,
                        entry.entry_type == TreeEntryType::ExecutableFile,
                        content,
                    )
                    .await
            }
            TreeEntryType::Symlink => {
                let content = self.object_store.get_blob_content(&entry.hash, fetch_ctx).await?;
                let target = PathBuf::from(std::ffi::OsString::from_vec(content));
                self.tree.create_symlink(parent, &entry.name, &target).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{LogStructuredLogger, NoFaultInjector, SystemClock};
    use crate::ids::RootId;
    use crate::testing::{MockObjectStore, MockWorkingTree};
    use std::ffi::OsStr;

    fn tree_with(entries: Vec<(&str, TreeEntry)>) -> Tree {
        Tree::new(entries.into_iter().map(|(_, e)| e))
    }

    fn file_entry(store: &MockObjectStore, name: &str, content: &[u8]) -> TreeEntry {
        let hash = store.insert_blob(content.to_vec());
        TreeEntry {
            name: std::ffi::OsString::from(name),
            entry_type: TreeEntryType::RegularFile,
            hash,
        }
    }

    #[tokio::test]
    async fn init_then_checkout_applies_cleanly() {
        let store = MockObjectStore::new();
        let r0 = RootId::new(vec![0]);
        let r1 = RootId::new(vec![1]);
        store.insert(
            &r0,
            tree_with(vec![
                ("a", file_entry(&store, "a", b"1")),
                ("b", file_entry(&store, "b", b"2")),
            ]),
        );
        store.insert(
            &r1,
            tree_with(vec![
                ("a", file_entry(&store, "a", b"1")),
                ("b", file_entry(&store, "b", b"3")),
                ("c", file_entry(&store, "c", b"4")),
            ]),
        );

        let working = MockWorkingTree::new();
        working
            .create_file_with_content(working.root(), OsStr::new("a"), b"1".to_vec())
            .await
            .unwrap();
        working
            .create_file_with_content(working.root(), OsStr::new("b"), b"2".to_vec())
            .await
            .unwrap();

        let parent_commit = ParentCommit::new(r0.clone());
        let rename_lock = AsyncMutex::new(());
        let journal = crate::testing::MockJournal::new();
        let last_checkout_time = LastCheckoutTime::new();
        let fault_injector = NoFaultInjector;
        let logger = LogStructuredLogger;
        let clock = SystemClock;

        let engine = CheckoutEngine::new(&working, &store, &fault_injector, &logger, &clock, true);
        let outcome = engine
            .checkout(
                &parent_commit,
                &rename_lock,
                working.root(),
                &journal,
                &last_checkout_time,
                CheckoutMode::Normal,
                r1.clone(),
                Path::new("/mnt"),
            )
            .await
            .unwrap();

        assert!(outcome.conflicts.is_empty());
        assert_eq!(parent_commit.current().await.as_bytes(), r1.as_bytes());

        let b = working.lookup_child(working.root(), OsStr::new("b")).await.unwrap().unwrap();
        assert_eq!(working.file_content(b).unwrap(), b"3");
        let c = working.lookup_child(working.root(), OsStr::new("c")).await.unwrap().unwrap();
        assert_eq!(working.file_content(c).unwrap(), b"4");

        let entries = journal.entries();
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            crate::testing::JournalEntry::UncleanPaths { paths, .. } => {
                assert_eq!(paths, &std::collections::BTreeSet::from([PathBuf::from("b")]));
            }
            other => panic!("expected unclean-paths entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dry_run_does_not_mutate() {
        let store = MockObjectStore::new();
        let r0 = RootId::new(vec![0]);
        let r1 = RootId::new(vec![1]);
        store.insert(&r0, tree_with(vec![("b", file_entry(&store, "b", b"2"))]));
        store.insert(&r1, tree_with(vec![("b", file_entry(&store, "b", b"3"))]));

        let working = MockWorkingTree::new();
        working
            .create_file_with_content(working.root(), OsStr::new("b"), b"2".to_vec())
            .await
            .unwrap();

        let parent_commit = ParentCommit::new(r0.clone());
        let rename_lock = AsyncMutex::new(());
        let journal = crate::testing::MockJournal::new();
        let last_checkout_time = LastCheckoutTime::new();
        let fault_injector = NoFaultInjector;
        let logger = LogStructuredLogger;
        let clock = SystemClock;

        let engine = CheckoutEngine::new(&working, &store, &fault_injector, &logger, &clock, true);
        engine
            .checkout(
                &parent_commit,
                &rename_lock,
                working.root(),
                &journal,
                &last_checkout_time,
                CheckoutMode::DryRun,
                r1.clone(),
                Path::new("/mnt"),
            )
            .await
            .unwrap();

        assert_eq!(parent_commit.current().await.as_bytes(), r0.as_bytes());
        let b = working.lookup_child(working.root(), OsStr::new("b")).await.unwrap().unwrap();
        assert_eq!(working.file_content(b).unwrap(), b"2");
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn checkout_fails_while_another_holds_the_parent_lock() {
        let store = MockObjectStore::new();
        let r0 = RootId::new(vec![0]);
        let r1 = RootId::new(vec![1]);
        store.insert(&r0, Tree::default());
        store.insert(&r1, Tree::default());

        let working = MockWorkingTree::new();
        let parent_commit = ParentCommit::new(r0.clone());
        let rename_lock = AsyncMutex::new(());
        let journal = crate::testing::MockJournal::new();
        let last_checkout_time = LastCheckoutTime::new();
        let fault_injector = NoFaultInjector;
        let logger = LogStructuredLogger;
        let clock = SystemClock;

        // Hold the writer lock for longer than the engine's bounded
        // acquire wait, simulating a concurrent in-flight checkout.
        let _holder = parent_commit.acquire_writer_timeout(LOCK_TIMEOUT).await.unwrap();
        let holder_task = tokio::spawn(async move {
            tokio::time::sleep(LOCK_TIMEOUT + Duration::from_millis(200)).await;
            drop(_holder);
        });

        let engine = CheckoutEngine::new(&working, &store, &fault_injector, &logger, &clock, true);
        let err = engine
            .checkout(
                &parent_commit,
                &rename_lock,
                working.root(),
                &journal,
                &last_checkout_time,
                CheckoutMode::Normal,
                r1.clone(),
                Path::new("/mnt"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::CheckoutInProgress));
        assert_eq!(parent_commit.current().await.as_bytes(), r0.as_bytes());

        holder_task.await.unwrap();
    }
}
