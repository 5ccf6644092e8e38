//! `Mount` and its `LifecycleOrchestrator` operations (spec.md §3, §4.1,
//! §6): the aggregate that owns every other component in this crate and
//! exposes the entry points callers actually drive a mount through.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::channel::{ChannelAttach, ChannelHandle};
use crate::checkout::{CheckoutEngine, CheckoutOutcome, LastCheckoutTime};
use crate::config::{CheckoutMode, MountConfig, OverlayType};
use crate::diff::{DiffContext, DiffEngine};
use crate::dir_ensure::DirectoryEnsurer;
use crate::dot_eden::DotEdenSetup;
use crate::error::{MountError, MountResult};
use crate::external::{
    Clock, FaultInjector, FetchContext, InodeMap, Journal, ObjectStore, Overlay,
    PrivilegedHelper, ProgressReporter, SerializedInodeMap, StructuredLogger, WorkingTree,
};
use crate::handshake::{MountingHandshake, Promise, PromiseOutcome};
use crate::ids::{next_mount_generation, InodeNumber, MountGeneration, RootId};
use crate::parent_commit::ParentCommit;
use crate::state::{AtomicMountState, MountState};
use crate::symlink::SymlinkResolver;
use crate::tree::Tree;

/// Upper bound on concurrent tree prefetches (spec.md §5
/// "`prefetches_in_progress`: atomic counter bounded by configuration").
/// The source leaves the bound itself to configuration; this crate has no
/// tunable for it yet, so it is a fixed constant.
const MAX_CONCURRENT_PREFETCHES: u32 = 4;

/// The mount lifecycle and checkout engine's top-level aggregate
/// (spec.md §3 `Mount`). Owns every other component in the crate and is
/// the sole entry point callers drive a mount through; its methods here
/// are what spec.md §2 names the `LifecycleOrchestrator`.
pub struct Mount {
    config: MountConfig,
    object_store: Arc<dyn ObjectStore>,
    overlay: Arc<dyn Overlay>,
    inode_map: Arc<dyn InodeMap>,
    journal: Arc<dyn Journal>,
    tree: Arc<dyn WorkingTree>,
    helper: Arc<dyn PrivilegedHelper>,
    clock: Arc<dyn Clock>,
    fault_injector: Arc<dyn FaultInjector>,
    logger: Arc<dyn StructuredLogger>,
    state: AtomicMountState,
    parent_commit: ParentCommit,
    handshake: MountingHandshake,
    last_checkout_time: LastCheckoutTime,
    rename_lock: AsyncMutex<()>,
    prefetches_in_progress: AtomicU32,
    mount_generation: MountGeneration,
    channel: Mutex<ChannelHandle>,
    dot_eden_inode: Mutex<Option<InodeNumber>>,
    channel_completion: Promise,
    bind_mounts: Mutex<BTreeSet<PathBuf>>,
}

impl Mount {
    /// Build a mount against the given configuration and collaborators.
    /// `initialize` must be called before any other operation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MountConfig,
        object_store: Arc<dyn ObjectStore>,
        overlay: Arc<dyn Overlay>,
        inode_map: Arc<dyn InodeMap>,
        journal: Arc<dyn Journal>,
        tree: Arc<dyn WorkingTree>,
        helper: Arc<dyn PrivilegedHelper>,
        clock: Arc<dyn Clock>,
        fault_injector: Arc<dyn FaultInjector>,
        logger: Arc<dyn StructuredLogger>,
    ) -> Self {
        let parent_commit = ParentCommit::new(config.configured_parent.clone());
        Mount {
            config,
            object_store,
            overlay,
            inode_map,
            journal,
            tree,
            helper,
            clock,
            fault_injector,
            logger,
            state: AtomicMountState::new(),
            parent_commit,
            handshake: MountingHandshake::new(),
            last_checkout_time: LastCheckoutTime::new(),
            rename_lock: AsyncMutex::new(()),
            prefetches_in_progress: AtomicU32::new(0),
            mount_generation: next_mount_generation(),
            channel: Mutex::new(ChannelHandle::None),
            dot_eden_inode: Mutex::new(None),
            channel_completion: Promise::new(),
            bind_mounts: Mutex::new(BTreeSet::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MountState {
        self.state.load()
    }

    /// This mount instance's generation (spec.md §3).
    pub fn mount_generation(&self) -> MountGeneration {
        self.mount_generation
    }

    /// The root id currently presented by the mount.
    pub async fn current_parent(&self) -> RootId {
        self.parent_commit.current().await
    }

    // ---- initialize -----------------------------------------------------

    /// `UNINITIALIZED → INITIALIZING → {INITIALIZED, INIT_ERROR}`
    /// (spec.md §4.1).
    pub async fn initialize(
        &self,
        progress: &dyn ProgressReporter,
        takeover_snapshot: Option<&SerializedInodeMap>,
    ) -> MountResult<()> {
        self.state
            .transition(&[MountState::Uninitialized], MountState::Initializing)?;

        match self.run_initialize(progress, takeover_snapshot).await {
            Ok(()) => {
                self.state
                    .transition(&[MountState::Initializing], MountState::Initialized)?;
                Ok(())
            }
            Err(err) => {
                let _ = self
                    .state
                    .transition(&[MountState::Initializing], MountState::InitError);
                Err(err)
            }
        }
    }

    async fn run_initialize(
        &self,
        progress: &dyn ProgressReporter,
        takeover_snapshot: Option<&SerializedInodeMap>,
    ) -> MountResult<()> {
        self.fault_injector.check("mount", &self.config.mount_path).await?;

        self.journal
            .record_hash_update(None, self.config.configured_parent.clone())
            .await;

        self.overlay.initialize(&self.config.mount_path, progress).await?;

        // Use the overlay's persisted root directory if `overlay_type`
        // says modifications persist across mounts; otherwise the root
        // inode is materialized from the configured parent's tree.
        let overlay_persists = self.config.overlay_type == OverlayType::OnDisk;
        if overlay_persists {
            if self.overlay.persisted_root_dir().await.is_none() {
                let fetch_ctx = FetchContext::new();
                self.object_store
                    .get_root_tree(&self.config.configured_parent, &fetch_ctx)
                    .await?;
            }
        } else {
            let fetch_ctx = FetchContext::new();
            self.object_store
                .get_root_tree(&self.config.configured_parent, &fetch_ctx)
                .await?;
        }

        match takeover_snapshot {
            Some(snapshot) => {
                self.inode_map
                    .initialize_from_takeover(self.tree.root(), snapshot)
                    .await?;
            }
            None if overlay_persists => {
                self.inode_map.initialize_from_overlay(self.tree.root()).await?;
            }
            None => {
                self.inode_map.initialize(self.tree.root()).await?;
            }
        }

        let dot_eden_setup = DotEdenSetup::new(&*self.tree);
        let dot_eden_inode = dot_eden_setup
            .run(
                &self.config.mount_path,
                &self.config.server_socket_path,
                &self.config.client_directory,
            )
            .await?;
        *self.dot_eden_inode.lock() = Some(dot_eden_inode);

        Ok(())
    }

    // ---- start_channel ---------------------------------------------------

    /// `INITIALIZED → STARTING → {RUNNING, CHANNEL_ERROR}` (spec.md §4.1).
    pub async fn start_channel(&self, read_only: bool) -> MountResult<()> {
        self.state
            .transition(&[MountState::Initialized], MountState::Starting)?;

        let _ = tokio::fs::create_dir_all(&self.config.mount_path).await;

        let attach = ChannelAttach::new(&*self.helper, &self.handshake);
        match attach.attach(&self.config, read_only).await {
            Ok(handle) => {
                *self.channel.lock() = handle;
                self.state
                    .transition(&[MountState::Starting], MountState::Running)?;
                Ok(())
            }
            Err(err) => {
                // Tolerant: a concurrent destroy/shutdown may already have
                // moved the state machine past STARTING.
                if self
                    .state
                    .transition(&[MountState::Starting], MountState::ChannelError)
                    .is_err()
                {
                    log::warn!("channel attach failed after state advanced past STARTING: {err}");
                }
                Err(err)
            }
        }
    }

    // ---- unmount -----------------------------------------------------------

    /// Idempotent detach from the kernel-channel driver (spec.md §4.1,
    /// §5 Cancellation).
    pub async fn unmount(&self) -> MountResult<()> {
        let (promise, created) = self.handshake.start_unmount();
        if !created {
            return promise.wait().await.map_err(|_| MountError::MountCancelled);
        }

        if !self.handshake.mount_started() {
            promise.fulfill(Ok(()));
            return Ok(());
        }

        let (mount_promise, _) = self.handshake.start_mount();
        let _ = mount_promise.wait().await;

        let handle = std::mem::replace(&mut *self.channel.lock(), ChannelHandle::None);
        let attach = ChannelAttach::new(&*self.helper, &self.handshake);
        let result = attach.detach(&handle, &self.config.mount_path).await;

        match &result {
            Ok(()) => promise.fulfill(Ok(())),
            Err(err) => promise.fulfill(Err(Arc::new(MountError::External(err.to_string())))),
        }
        result
    }

    // ---- shutdown / destroy -------------------------------------------------

    /// Tear the mount down, optionally serializing the inode map for a
    /// successor process to take over (spec.md §4.1 `shutdown`).
    pub async fn shutdown(
        &self,
        do_takeover: bool,
        allow_not_started: bool,
    ) -> MountResult<SerializedInodeMap> {
        let mut from = vec![
            MountState::Running,
            MountState::Starting,
            MountState::InitError,
            MountState::ChannelError,
        ];
        if allow_not_started {
            from.extend([
                MountState::Uninitialized,
                MountState::Initializing,
                MountState::Initialized,
            ]);
        }
        self.state.transition(&from, MountState::ShuttingDown)?;

        let snapshot = self.run_shutdown_body(do_takeover).await;
        let prev = self.state.force(MountState::ShutDown);
        if prev == MountState::Destroying {
            self.self_delete();
        }
        snapshot
    }

    async fn run_shutdown_body(&self, do_takeover: bool) -> MountResult<SerializedInodeMap> {
        self.journal.cancel_all_subscribers().await;
        let snapshot = self.inode_map.shutdown(do_takeover).await?;
        self.overlay.close().await?;
        Ok(snapshot)
    }

    /// Irreversibly tear the mount down (spec.md §4.1 `destroy`).
    /// `DESTROYING → DESTROYING` is an invariant violation, not a
    /// recoverable condition.
    pub async fn destroy(&self) -> MountResult<()> {
        let prev = self.state.force(MountState::Destroying);
        match prev {
            MountState::Destroying => Err(MountError::IllegalStateTransition {
                actual: MountState::Destroying,
                attempted: MountState::Destroying,
            }),
            MountState::ShutDown => {
                self.self_delete();
                Ok(())
            }
            MountState::ShuttingDown => {
                // A shutdown already in flight owns the transition to
                // SHUT_DOWN; observe it, then self-delete.
                while self.state.load() != MountState::ShutDown {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                self.self_delete();
                Ok(())
            }
            _ if self.dot_eden_inode.lock().is_none() => {
                // No root inode was ever constructed; nothing to tear down.
                self.self_delete();
                Ok(())
            }
            _ => {
                let _ = self.run_shutdown_body(false).await;
                self.state.force(MountState::ShutDown);
                self.self_delete();
                Ok(())
            }
        }
    }

    fn self_delete(&self) {
        log::info!("mount at {:?} torn down", self.config.mount_path);
    }

    // ---- exposed operations (spec.md §6) ------------------------------------

    /// Run a checkout transaction against the given target root id.
    pub async fn checkout(&self, mode: CheckoutMode, target_root_id: RootId) -> MountResult<CheckoutOutcome> {
        let engine = CheckoutEngine::new(
            &*self.tree,
            &*self.object_store,
            &*self.fault_injector,
            &*self.logger,
            &*self.clock,
            self.config.case_sensitive,
        );
        engine
            .checkout(
                &self.parent_commit,
                &self.rename_lock,
                self.tree.root(),
                &*self.journal,
                &self.last_checkout_time,
                mode,
                target_root_id,
                &self.config.mount_path,
            )
            .await
    }

    /// Diff the working copy against `target_root_id`, optionally
    /// requiring `ParentCommit` to currently equal it.
    pub async fn diff(
        &self,
        ctx: &DiffContext<'_>,
        target_root_id: &RootId,
        enforce_parent: bool,
    ) -> MountResult<()> {
        let engine = DiffEngine::new(&*self.tree, &*self.object_store);
        let fetch_ctx = FetchContext::new();
        if enforce_parent {
            engine
                .diff_with_parent_enforcement(
                    ctx,
                    self.tree.root(),
                    &self.parent_commit,
                    target_root_id,
                    &*self.logger,
                    &fetch_ctx,
                )
                .await
        } else {
            engine.diff(ctx, self.tree.root(), target_root_id, &fetch_ctx).await
        }
    }

    /// Unconditionally replace the current parent, journaling the change
    /// (spec.md §8 "Round-trip laws").
    pub async fn reset_parent(&self, new: RootId) -> RootId {
        let old = self.parent_commit.reset(new.clone()).await;
        self.journal.record_hash_update(Some(old.clone()), new).await;
        old
    }

    /// Fetch the tree for the current parent commit.
    pub async fn get_root_tree(&self) -> MountResult<Tree> {
        let current = self.parent_commit.current().await;
        let fetch_ctx = FetchContext::new();
        self.object_store.get_root_tree(&current, &fetch_ctx).await
    }

    /// Resolve a mount-relative path to an inode, following symlinks.
    pub async fn get_inode(&self, path: &Path) -> MountResult<InodeNumber> {
        let looked_up = self.tree.lookup_path(path).await?;
        SymlinkResolver::new(&*self.tree).resolve(looked_up).await
    }

    /// Read a file inode's full content, following symlinks.
    pub async fn load_file_contents(&self, inode: InodeNumber) -> MountResult<Vec<u8>> {
        let resolved = SymlinkResolver::new(&*self.tree).resolve(inode).await?;
        self.tree.read_file_content(resolved).await
    }

    /// Resolve `path`, then read its content.
    pub async fn load_file_contents_from_path(&self, path: &Path) -> MountResult<Vec<u8>> {
        let inode = self.get_inode(path).await?;
        self.tree.read_file_content(inode).await
    }

    /// `mkdir -p` against the working tree.
    pub async fn ensure_directory_exists(&self, path: &Path) -> MountResult<InodeNumber> {
        DirectoryEnsurer::new(&*self.tree).ensure(path).await
    }

    /// POSIX-only. Ownership metadata lives with the (external) inode
    /// map, which this crate does not own; this validates `inode` exists
    /// and otherwise records the call as a no-op.
    pub async fn chown(&self, inode: InodeNumber, _uid: u32, _gid: u32) -> MountResult<()> {
        self.tree.entry_kind(inode).await?;
        Ok(())
    }

    /// POSIX-only. Force `path` to materialize the blob identified by
    /// `object_id`, without running a full checkout.
    pub async fn set_path_object_id(&self, path: &Path, object_id: RootId) -> MountResult<()> {
        let parent_path = path.parent().unwrap_or_else(|| Path::new(""));
        let name = path.file_name().ok_or(MountError::NotFound)?;
        let parent_inode = self.tree.lookup_path(parent_path).await?;
        let fetch_ctx = FetchContext::new();
        let content = self.object_store.get_blob_content(&object_id, &fetch_ctx).await?;
        self.tree.write_file(parent_inode, name, false, content).await?;
        Ok(())
    }

    /// Bind-mount `client_path` at `mount_path` through the privileged
    /// helper, recording it for takeover payloads.
    pub async fn add_bind_mount(&self, client_path: &Path, mount_path: &Path) -> MountResult<()> {
        self.helper.bind_mount(mount_path, client_path).await?;
        self.bind_mounts.lock().insert(mount_path.to_path_buf());
        Ok(())
    }

    /// Undo a bind mount previously added with [`Mount::add_bind_mount`].
    pub async fn remove_bind_mount(&self, mount_path: &Path) -> MountResult<()> {
        self.helper.bind_unmount(mount_path).await?;
        self.bind_mounts.lock().remove(mount_path);
        Ok(())
    }

    /// Prefetch the tree for `root_id`, bounded by
    /// [`MAX_CONCURRENT_PREFETCHES`] in-flight prefetches. Returns whether
    /// a lease was available. Unlike the source, which dispatches the
    /// fetch onto a background executor and returns immediately, this
    /// fetches inline and releases the lease before returning — this
    /// crate has no executor of its own to hand the work to.
    pub async fn try_start_tree_prefetch(&self, root_id: &RootId) -> bool {
        let before = self.prefetches_in_progress.fetch_add(1, Ordering::AcqRel);
        if before >= MAX_CONCURRENT_PREFETCHES {
            self.prefetches_in_progress.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        let fetch_ctx = FetchContext::new();
        let _ = self.object_store.get_root_tree(root_id, &fetch_ctx).await;
        self.prefetches_in_progress.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// The promise fulfilled once the attached channel's completion is
    /// observed (e.g. the kernel unmounted the filesystem out from under
    /// the mount).
    pub fn channel_completion_promise(&self) -> Promise {
        self.channel_completion.clone()
    }

    /// Fulfill the channel-completion promise. Called by whatever drives
    /// the attached channel's event loop once it terminates; out of
    /// scope for this crate to invoke on its own (spec.md §1).
    pub fn notify_channel_completed(&self, outcome: PromiseOutcome) {
        self.channel_completion.fulfill(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountProtocol;
    use crate::external::{LogStructuredLogger, NoFaultInjector, NullProgressReporter, SystemClock};
    use crate::testing::{MockCollaborators, MockWorkingTree};
    use std::sync::Arc;

    fn build_mount(parent: RootId) -> (Mount, MockCollaborators, Arc<MockWorkingTree>) {
        let collaborators = MockCollaborators::new();
        let tree = Arc::new(MockWorkingTree::new());
        let config = MountConfig::new(
            PathBuf::from("/mnt"),
            PathBuf::from("/client"),
            parent,
            MountProtocol::Fuse,
            PathBuf::from("/client/socket"),
        );
        let mount = Mount::new(
            config,
            collaborators.object_store.clone(),
            collaborators.overlay.clone(),
            collaborators.inode_map.clone(),
            collaborators.journal.clone(),
            tree.clone(),
            collaborators.helper.clone(),
            Arc::new(SystemClock),
            Arc::new(NoFaultInjector),
            Arc::new(LogStructuredLogger),
        );
        (mount, collaborators, tree)
    }

    #[tokio::test]
    async fn initialize_reaches_initialized_and_seeds_parent() {
        let r0 = RootId::new(vec![0]);
        let (mount, collaborators, _tree) = build_mount(r0.clone());
        collaborators.object_store.insert(&r0, Tree::default());

        mount.initialize(&NullProgressReporter, None).await.unwrap();

        assert_eq!(mount.state(), MountState::Initialized);
        assert_eq!(mount.current_parent().await.as_bytes(), r0.as_bytes());
        assert_eq!(collaborators.journal.entries().len(), 1);
    }

    #[tokio::test]
    async fn start_channel_reaches_running() {
        let r0 = RootId::new(vec![0]);
        let (mount, collaborators, _tree) = build_mount(r0.clone());
        collaborators.object_store.insert(&r0, Tree::default());

        mount.initialize(&NullProgressReporter, None).await.unwrap();
        mount.start_channel(false).await.unwrap();

        assert_eq!(mount.state(), MountState::Running);
        let options = collaborators.helper.last_channel_options.lock().unwrap();
        assert_eq!(options.threads, mount.config.channel_threads());
        assert_eq!(options.request_timeout, mount.config.request_timeout());
        assert_eq!(options.max_in_flight_requests, mount.config.max_in_flight_requests());
        assert_eq!(options.owner_uid, mount.config.owner_uid);
        assert_eq!(options.owner_gid, mount.config.owner_gid);
        assert_eq!(options.require_utf8, mount.config.require_utf8);
    }

    #[tokio::test]
    async fn unmount_before_any_mount_resolves_immediately() {
        let r0 = RootId::new(vec![0]);
        let (mount, _collaborators, _tree) = build_mount(r0);
        mount.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn unmount_during_start_channel_fails_device_unmounted() {
        let r0 = RootId::new(vec![0]);
        let (mount, collaborators, _tree) = build_mount(r0.clone());
        collaborators.object_store.insert(&r0, Tree::default());
        mount.initialize(&NullProgressReporter, None).await.unwrap();
        *collaborators.helper.mount_delay.lock() = Some(Duration::from_millis(50));

        let start_future = mount.start_channel(false);
        let unmount_future = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            mount.unmount().await
        };

        let (start_result, unmount_result) = tokio::join!(start_future, unmount_future);
        assert!(matches!(
            start_result.unwrap_err(),
            MountError::DeviceUnmountedDuringInitialization
        ));
        assert!(unmount_result.is_ok());
        assert_eq!(mount.state(), MountState::ChannelError);
    }

    #[tokio::test]
    async fn reset_parent_updates_value_and_journals() {
        let r0 = RootId::new(vec![0]);
        let r1 = RootId::new(vec![1]);
        let (mount, collaborators, _tree) = build_mount(r0.clone());

        let old = mount.reset_parent(r1.clone()).await;

        assert_eq!(old.as_bytes(), r0.as_bytes());
        assert_eq!(mount.current_parent().await.as_bytes(), r1.as_bytes());
        assert_eq!(collaborators.journal.entries().len(), 1);
    }

    #[tokio::test]
    async fn destroy_before_initialize_self_deletes_immediately() {
        let r0 = RootId::new(vec![0]);
        let (mount, _collaborators, _tree) = build_mount(r0);
        mount.destroy().await.unwrap();
        assert_eq!(mount.state(), MountState::Destroying);
    }

    #[tokio::test]
    async fn destroy_after_initialize_runs_shutdown() {
        let r0 = RootId::new(vec![0]);
        let (mount, collaborators, _tree) = build_mount(r0.clone());
        collaborators.object_store.insert(&r0, Tree::default());
        mount.initialize(&NullProgressReporter, None).await.unwrap();

        mount.destroy().await.unwrap();

        assert_eq!(mount.state(), MountState::ShutDown);
    }

    #[tokio::test]
    async fn destroy_twice_is_a_fatal_bug() {
        let r0 = RootId::new(vec![0]);
        let (mount, _collaborators, _tree) = build_mount(r0);
        mount.destroy().await.unwrap();
        let err = mount.destroy().await.unwrap_err();
        assert!(matches!(err, MountError::IllegalStateTransition { .. }));
    }

    #[tokio::test]
    async fn checkout_through_mount_updates_parent() {
        let r0 = RootId::new(vec![0]);
        let r1 = RootId::new(vec![1]);
        let (mount, collaborators, _tree) = build_mount(r0.clone());
        collaborators.object_store.insert(&r0, Tree::default());
        collaborators.object_store.insert(&r1, Tree::default());
        mount.initialize(&NullProgressReporter, None).await.unwrap();

        let outcome = mount
            .checkout(CheckoutMode::Normal, r1.clone())
            .await
            .unwrap();

        assert!(outcome.conflicts.is_empty());
        assert_eq!(mount.current_parent().await.as_bytes(), r1.as_bytes());
    }

    #[tokio::test]
    async fn ensure_directory_set_object_id_then_read_back() {
        let r0 = RootId::new(vec![0]);
        let (mount, collaborators, _tree) = build_mount(r0.clone());
        collaborators.object_store.insert(&r0, Tree::default());
        mount.initialize(&NullProgressReporter, None).await.unwrap();

        mount.ensure_directory_exists(Path::new("a/b")).await.unwrap();
        let blob = collaborators.object_store.insert_blob(b"hello".to_vec());
        mount
            .set_path_object_id(Path::new("a/b/file"), blob)
            .await
            .unwrap();

        let content = mount
            .load_file_contents_from_path(Path::new("a/b/file"))
            .await
            .unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn prefetch_lease_is_released_after_each_call() {
        let r0 = RootId::new(vec![0]);
        let (mount, collaborators, _tree) = build_mount(r0.clone());
        collaborators.object_store.insert(&r0, Tree::default());

        for _ in 0..(MAX_CONCURRENT_PREFETCHES as usize + 2) {
            assert!(mount.try_start_tree_prefetch(&r0).await);
        }
        assert_eq!(mount.prefetches_in_progress.load(Ordering::Acquire), 0);
    }
}
