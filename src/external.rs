//! External collaborators (spec.md §1, §6).
//!
//! The object store, overlay, inode map, journal, kernel-channel drivers,
//! privileged mount helper, and telemetry sink are explicitly out of
//! scope for this crate; it only specifies the interfaces it consumes.
//! Each trait uses `#[async_trait]` so collaborators can be held as
//! `Arc<dyn Trait>` while still exposing `async fn`, the same shape the
//! teacher reserves for its optional `async`/`experimental` feature but
//! which this crate requires unconditionally (see SPEC_FULL.md's Ambient
//! stack section).

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::error::MountResult;
use crate::ids::{InodeNumber, RootId};
use crate::tree::{Tree, TreeEntry, TreeEntryType};

/// Per-request fetch statistics, merged into the checkout/diff summary
/// telemetry event (spec.md §6 "Fetch statistics exposed via a
/// per-request context").
#[derive(Default, Debug)]
pub struct FetchContext {
    trees_fetched: AtomicU64,
    blobs_fetched: AtomicU64,
}

impl FetchContext {
    /// A fresh, zeroed context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tree fetch.
    pub fn record_tree_fetch(&self) {
        self.trees_fetched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a blob fetch.
    pub fn record_blob_fetch(&self) {
        self.blobs_fetched.fetch_add(1, Ordering::Relaxed);
    }

    /// Merge another context's counts into this one (spec.md §4.2 phase 5
    /// "Merge fetch-context statistics").
    pub fn merge(&self, other: &FetchContext) {
        self.trees_fetched
            .fetch_add(other.trees_fetched.load(Ordering::Relaxed), Ordering::Relaxed);
        self.blobs_fetched
            .fetch_add(other.blobs_fetched.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    /// Trees fetched so far.
    pub fn trees_fetched(&self) -> u64 {
        self.trees_fetched.load(Ordering::Relaxed)
    }

    /// Blobs fetched so far.
    pub fn blobs_fetched(&self) -> u64 {
        self.blobs_fetched.load(Ordering::Relaxed)
    }
}

/// Content-addressed blob/tree fetcher (spec.md §6).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the root tree for a commit's root id.
    async fn get_root_tree(&self, root_id: &RootId, ctx: &FetchContext) -> MountResult<Tree>;

    /// Fetch a single named entry out of the tree identified by `root_id`.
    async fn get_tree_entry_for_root_id(
        &self,
        root_id: &RootId,
        entry_type: TreeEntryType,
        basename: &OsStr,
        ctx: &FetchContext,
    ) -> MountResult<TreeEntry>;

    /// Fetch a blob's raw content by its content hash, used by
    /// `CheckoutEngine` to materialize file content for entries added or
    /// modified by a checkout.
    async fn get_blob_content(&self, hash: &RootId, ctx: &FetchContext) -> MountResult<Vec<u8>>;
}

/// A directory entry as persisted by the overlay.
#[derive(Clone, Debug)]
pub struct OverlayDirEntry {
    /// Entry name.
    pub name: std::ffi::OsString,
    /// Inode number assigned to the entry.
    pub inode: InodeNumber,
    /// Kind of entry.
    pub kind: TreeEntryType,
}

/// Progress callback used by long-running setup phases (spec.md §4.1,
/// §6 `initialize(mount_path, progress_cb)`).
pub trait ProgressReporter: Send + Sync {
    /// Report `completed` out of `total` steps done.
    fn report(&self, completed: u64, total: u64);
}

/// A no-op progress reporter, useful for tests and callers that don't
/// care about progress.
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {
    fn report(&self, _completed: u64, _total: u64) {}
}

/// Local, persisted, per-inode storage for modifications (spec.md §6).
#[async_trait]
pub trait Overlay: Send + Sync {
    /// Initialize the overlay at `mount_path`, reporting progress.
    async fn initialize(
        &self,
        mount_path: &Path,
        progress: &dyn ProgressReporter,
    ) -> MountResult<()>;

    /// Load a persisted directory's entries, if the overlay has one for
    /// `inode`.
    async fn load_overlay_dir(&self, inode: InodeNumber) -> MountResult<Option<Vec<OverlayDirEntry>>>;

    /// Close the overlay, flushing any pending state.
    async fn close(&self) -> MountResult<()>;

    /// Whether this overlay persists across mounts.
    fn is_persistent(&self) -> bool;

    /// The persisted root directory's entries, if any (spec.md §4.1
    /// "if the overlay has a persisted root directory, use it").
    async fn persisted_root_dir(&self) -> Option<Vec<OverlayDirEntry>>;
}

/// Opaque, serialized inode-map snapshot handed across a takeover
/// (spec.md §6 `shutdown(do_takeover) -> SerializedInodeMap`).
#[derive(Clone, Debug, Default)]
pub struct SerializedInodeMap(pub Vec<u8>);

/// Bidirectional registry of inode numbers to inode objects (spec.md §6).
#[async_trait]
pub trait InodeMap: Send + Sync {
    /// Seed the map from scratch, given the already-constructed root
    /// inode.
    async fn initialize(&self, root_inode: InodeNumber) -> MountResult<()>;

    /// Seed the map from the overlay's persisted directory structure.
    async fn initialize_from_overlay(&self, root_inode: InodeNumber) -> MountResult<()>;

    /// Seed the map from a takeover snapshot produced by a predecessor's
    /// `shutdown(do_takeover = true)`.
    async fn initialize_from_takeover(
        &self,
        root_inode: InodeNumber,
        serialized: &SerializedInodeMap,
    ) -> MountResult<()>;

    /// Tear the map down, optionally serializing it for a successor
    /// process to take over.
    async fn shutdown(&self, do_takeover: bool) -> MountResult<SerializedInodeMap>;

    /// The root inode, once initialized.
    fn root_inode(&self) -> InodeNumber;

    /// Inodes currently referenced by the kernel driver (i.e. not yet
    /// forgotten), used by checkout phase 6 to decide which inodes are
    /// safe to unload.
    fn referenced_inodes(&self) -> Vec<InodeNumber>;

    /// Mark the map as belonging to an unmounted filesystem, so a
    /// subsequent takeover payload reports it correctly (spec.md §4.4
    /// Completion handling).
    fn set_unmounted(&self);
}

/// Append-only log of changes (spec.md §6).
#[async_trait]
pub trait Journal: Send + Sync {
    /// Record a hash-update entry (`old -> new`; `old` is `None` only for
    /// the very first entry written during `initialize`).
    async fn record_hash_update(&self, old: Option<RootId>, new: RootId);

    /// Record an unclean-paths entry for a completed checkout.
    async fn record_unclean_paths(&self, old: RootId, new: RootId, paths: BTreeSet<PathBuf>);

    /// Cancel all journal subscribers, called during shutdown.
    async fn cancel_all_subscribers(&self);
}

/// Opaque handle to a FUSE device fd obtained from the privileged helper.
#[derive(Debug)]
pub struct RawFuseDevice {
    fd: std::os::unix::io::RawFd,
}

impl RawFuseDevice {
    /// Wrap a raw fd obtained from the privileged helper.
    pub fn from_raw_fd(fd: std::os::unix::io::RawFd) -> Self {
        RawFuseDevice { fd }
    }

    /// The wrapped fd.
    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.fd
    }
}

/// Channel-startup tunables read from `MountConfig` (spec.md §4.4), handed
/// to the privileged helper the same way the teacher's
/// `mnt::mount_options::Config` carries `n_threads` alongside its mount
/// options into `Session::new`.
#[derive(Clone, Copy, Debug)]
pub struct ChannelOptions {
    /// Worker thread/task count dispatching channel requests.
    pub threads: usize,
    /// Per-request timeout enforced on the channel driver.
    pub request_timeout: Duration,
    /// Max requests the channel may have in flight at once.
    pub max_in_flight_requests: u32,
    /// Owning uid reported for files served through the channel.
    pub owner_uid: u32,
    /// Owning gid reported for files served through the channel.
    pub owner_gid: u32,
    /// Whether the channel driver should reject non-UTF-8 path components.
    pub require_utf8: bool,
}

/// Privilege-separated mount helper (spec.md §6).
#[async_trait]
pub trait PrivilegedHelper: Send + Sync {
    /// Request a FUSE device fd for `path`.
    async fn fuse_mount(
        &self,
        path: &Path,
        read_only: bool,
        options: &ChannelOptions,
    ) -> MountResult<RawFuseDevice>;

    /// Ask the helper to unmount the FUSE mount at `path`.
    async fn fuse_unmount(&self, path: &Path) -> MountResult<()>;

    /// Register an NFS mount with the helper.
    async fn nfs_mount(
        &self,
        path: &Path,
        mountd_addr: std::net::SocketAddr,
        nfsd_addr: std::net::SocketAddr,
        read_only: bool,
        io_size: u32,
        options: &ChannelOptions,
    ) -> MountResult<()>;

    /// Ask the helper to unmount the NFS mount at `path`.
    async fn nfs_unmount(&self, path: &Path) -> MountResult<()>;

    /// Bind-mount `source` at `target`.
    async fn bind_mount(&self, target: &Path, source: &Path) -> MountResult<()>;

    /// Undo a bind mount.
    async fn bind_unmount(&self, path: &Path) -> MountResult<()>;
}

/// Read-only view of wall-clock time, for deterministic tests
/// (spec.md §3 `clock` collaborator).
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> SystemTime;
}

/// The real system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Deterministic failure injection, keyed by a named gate plus the
/// mount's path (spec.md §4.1, §4.2 "Pass fault-injection gate").
#[async_trait]
pub trait FaultInjector: Send + Sync {
    /// Check whether the named gate should be allowed to proceed for
    /// `path`. The default (no injector configured) always allows.
    async fn check(&self, gate: &str, path: &Path) -> MountResult<()>;
}

/// A fault injector that never blocks anything.
pub struct NoFaultInjector;

#[async_trait]
impl FaultInjector for NoFaultInjector {
    async fn check(&self, _gate: &str, _path: &Path) -> MountResult<()> {
        Ok(())
    }
}

/// `FinishedCheckout` telemetry event (spec.md §6).
#[derive(Clone, Debug)]
pub struct FinishedCheckoutEvent {
    /// Checkout mode used.
    pub mode: crate::config::CheckoutMode,
    /// Wall-clock duration of the whole checkout.
    pub duration: Duration,
    /// Whether the checkout succeeded.
    pub success: bool,
    /// Trees fetched during the checkout.
    pub trees_fetched: u64,
    /// Blobs fetched during the checkout.
    pub blobs_fetched: u64,
}

/// `ParentMismatch` telemetry event (spec.md §6, §4.3).
#[derive(Clone, Debug)]
pub struct ParentMismatchEvent {
    /// Root id the caller expected.
    pub expected: RootId,
    /// Root id actually current.
    pub actual: RootId,
}

/// Structured logger sink for the two named telemetry events
/// (spec.md §6).
pub trait StructuredLogger: Send + Sync {
    /// Emit a `FinishedCheckout` event.
    fn finished_checkout(&self, event: FinishedCheckoutEvent);

    /// Emit a `ParentMismatch` event.
    fn parent_mismatch(&self, event: ParentMismatchEvent);
}

/// A structured logger that forwards events to the `log` facade at
/// `info`/`warn` level, matching the teacher's use of `log::{info, warn}`
/// throughout `session.rs` and `channel.rs` for operational events.
pub struct LogStructuredLogger;

impl StructuredLogger for LogStructuredLogger {
    fn finished_checkout(&self, event: FinishedCheckoutEvent) {
        log::info!(
            "FinishedCheckout {{ mode: {:?}, duration_s: {:.3}, success: {}, trees_fetched: {}, blobs_fetched: {} }}",
            event.mode,
            event.duration.as_secs_f64(),
            event.success,
            event.trees_fetched,
            event.blobs_fetched,
        );
    }

    fn parent_mismatch(&self, event: ParentMismatchEvent) {
        log::warn!(
            "ParentMismatch {{ expected: {:?}, actual: {:?} }}",
            event.expected,
            event.actual,
        );
    }
}

/// The working inode hierarchy that `DotEdenSetup`, `DirectoryEnsurer`,
/// `SymlinkResolver` and `DiffEngine` operate on. This stands in for the
/// combination of the (external) inode map and overlay that the real
/// system consults when walking the live tree; the core only needs the
/// narrow slice of operations named in spec.md §4.5-§4.8.
#[async_trait]
pub trait WorkingTree: Send + Sync {
    /// The root directory's inode.
    fn root(&self) -> InodeNumber;

    /// Look up a child of `parent` by name.
    async fn lookup_child(&self, parent: InodeNumber, name: &OsStr) -> MountResult<Option<InodeNumber>>;

    /// List the immediate children of a directory inode, used by
    /// `DiffEngine` to detect entries removed from the working copy.
    async fn list_children(&self, parent: InodeNumber) -> MountResult<Vec<(OsString, InodeNumber)>>;

    /// The kind of entry `inode` is.
    async fn entry_kind(&self, inode: InodeNumber) -> MountResult<TreeEntryType>;

    /// Create a directory named `name` under `parent`. Fails with
    /// `AlreadyExists` if an entry with that name already exists
    /// (regardless of kind) so callers can distinguish "won the mkdir
    /// race" from "lost it to a non-directory".
    async fn mkdir(&self, parent: InodeNumber, name: &OsStr) -> MountResult<InodeNumber>;

    /// Create a symlink named `name` under `parent` pointing at `target`.
    async fn create_symlink(
        &self,
        parent: InodeNumber,
        name: &OsStr,
        target: &Path,
    ) -> MountResult<InodeNumber>;

    /// Read a symlink's target.
    async fn read_symlink(&self, inode: InodeNumber) -> MountResult<PathBuf>;

    /// Read a regular or executable file inode's full content.
    async fn read_file_content(&self, inode: InodeNumber) -> MountResult<Vec<u8>>;

    /// A content hash for a file or symlink inode's current working-copy
    /// content, comparable against a [`crate::tree::TreeEntry::hash`] to
    /// detect modification without transferring the content itself.
    async fn content_hash(&self, inode: InodeNumber) -> MountResult<RootId>;

    /// Create or overwrite a regular/executable file named `name` under
    /// `parent` with `content`, creating it if absent.
    async fn write_file(
        &self,
        parent: InodeNumber,
        name: &OsStr,
        executable: bool,
        content: Vec<u8>,
    ) -> MountResult<InodeNumber>;

    /// Remove whichever entry named `name` exists under `parent`.
    async fn remove_entry(&self, parent: InodeNumber, name: &OsStr) -> MountResult<()>;

    /// The path from mount root to `inode`, if the tree can resolve one.
    async fn path_of(&self, inode: InodeNumber) -> MountResult<PathBuf>;

    /// Resolve a `/`-joined relative path to an inode, descending one
    /// component at a time from `root()`.
    async fn lookup_path(&self, path: &Path) -> MountResult<InodeNumber> {
        let mut current = self.root();
        for component in path.components() {
            use std::path::Component;
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => continue,
                Component::ParentDir => return Err(crate::error::MountError::NotFound),
                Component::Normal(name) => {
                    current = self
                        .lookup_child(current, name)
                        .await?
                        .ok_or(crate::error::MountError::NotFound)?;
                }
            }
        }
        Ok(current)
    }
}
