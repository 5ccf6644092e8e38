//! In-memory mock collaborators used by this crate's own test suite.
//!
//! Grounded in the example pack's
//! `other_examples/df4a2bd1_divmain-treebeard__src-overlay-inode_manager.rs.rs`,
//! which uses a `parking_lot::Mutex<u64>` inode counter starting above the
//! FUSE root inode and a `HashMap`-backed inode table — the same shape
//! used here, scaled down to what the core's tests need.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::{OsStr, OsString};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{MountError, MountResult};
use crate::external::{
    FetchContext, Journal, ObjectStore, Overlay, OverlayDirEntry, PrivilegedHelper,
    ProgressReporter, RawFuseDevice, SerializedInodeMap, WorkingTree,
};
use crate::ids::InodeNumber;
use crate::tree::{Tree, TreeEntry, TreeEntryType};

/// Deterministic content hash used to build both [`MockWorkingTree`]
/// content hashes and matching [`crate::tree::TreeEntry`] hashes in
/// tests, so modification-detection has something meaningful to compare.
pub fn hash_bytes(bytes: &[u8]) -> crate::ids::RootId {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    crate::ids::RootId::new(hasher.finish().to_le_bytes().to_vec())
}

enum NodeKind {
    Dir { children: BTreeMap<OsString, InodeNumber> },
    File { content: Vec<u8>, executable: bool },
    Symlink { target: PathBuf },
}

struct Node {
    parent: InodeNumber,
    name: OsString,
    kind: NodeKind,
}

struct Inner {
    next_ino: u64,
    nodes: HashMap<InodeNumber, Node>,
}

/// An in-memory [`WorkingTree`] for tests.
pub struct MockWorkingTree {
    inner: Mutex<Inner>,
}

impl MockWorkingTree {
    /// A fresh tree with just a root directory.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            InodeNumber::ROOT,
            Node {
                parent: InodeNumber::ROOT,
                name: OsString::new(),
                kind: NodeKind::Dir {
                    children: BTreeMap::new(),
                },
            },
        );
        MockWorkingTree {
            inner: Mutex::new(Inner { next_ino: 2, nodes }),
        }
    }

    fn alloc(&self, inner: &mut Inner) -> InodeNumber {
        let ino = InodeNumber(inner.next_ino);
        inner.next_ino += 1;
        ino
    }

    /// Test helper: create a regular file.
    pub async fn create_file(&self, parent: InodeNumber, name: &OsStr) -> MountResult<InodeNumber> {
        let mut inner = self.inner.lock();
        if Self::child_named(&inner, parent, name).is_some() {
            return Err(MountError::AlreadyExists);
        }
        let ino = self.alloc(&mut inner);
        inner.nodes.insert(
            ino,
            Node {
                parent,
                name: name.to_owned(),
                kind: NodeKind::File {
                    content: Vec::new(),
                    executable: false,
                },
            },
        );
        Self::add_child(&mut inner, parent, name, ino)?;
        Ok(ino)
    }

    /// Test helper: create a regular file with the given content.
    pub async fn create_file_with_content(
        &self,
        parent: InodeNumber,
        name: &OsStr,
        content: Vec<u8>,
    ) -> MountResult<InodeNumber> {
        let ino = self.create_file(parent, name).await?;
        self.set_file_content(ino, content);
        Ok(ino)
    }

    /// Test helper: overwrite a file inode's content in place.
    pub fn set_file_content(&self, inode: InodeNumber, content: Vec<u8>) {
        let mut inner = self.inner.lock();
        if let Some(node) = inner.nodes.get_mut(&inode) {
            if let NodeKind::File { content: c, .. } = &mut node.kind {
                *c = content;
            }
        }
    }

    /// Test helper: read a file inode's content.
    pub fn file_content(&self, inode: InodeNumber) -> MountResult<Vec<u8>> {
        let inner = self.inner.lock();
        match &inner.nodes.get(&inode).ok_or(MountError::NotFound)?.kind {
            NodeKind::File { content, .. } => Ok(content.clone()),
            _ => Err(MountError::NotADirectory),
        }
    }

    /// Test helper: number of direct children under `parent`.
    pub async fn child_count(&self, parent: InodeNumber) -> usize {
        let inner = self.inner.lock();
        match &inner.nodes.get(&parent).unwrap().kind {
            NodeKind::Dir { children } => children.len(),
            _ => 0,
        }
    }

    fn child_named(inner: &Inner, parent: InodeNumber, name: &OsStr) -> Option<InodeNumber> {
        match &inner.nodes.get(&parent)?.kind {
            NodeKind::Dir { children } => children.get(name).copied(),
            _ => None,
        }
    }

    fn add_child(
        inner: &mut Inner,
        parent: InodeNumber,
        name: &OsStr,
        child: InodeNumber,
    ) -> MountResult<()> {
        match &mut inner.nodes.get_mut(&parent).ok_or(MountError::NotFound)?.kind {
            NodeKind::Dir { children } => {
                children.insert(name.to_owned(), child);
                Ok(())
            }
            _ => Err(MountError::NotADirectory),
        }
    }
}

impl Default for MockWorkingTree {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkingTree for MockWorkingTree {
    fn root(&self) -> InodeNumber {
        InodeNumber::ROOT
    }

    async fn lookup_child(&self, parent: InodeNumber, name: &OsStr) -> MountResult<Option<InodeNumber>> {
        let inner = self.inner.lock();
        Ok(Self::child_named(&inner, parent, name))
    }

    async fn list_children(&self, parent: InodeNumber) -> MountResult<Vec<(OsString, InodeNumber)>> {
        let inner = self.inner.lock();
        match &inner.nodes.get(&parent).ok_or(MountError::NotFound)?.kind {
            NodeKind::Dir { children } => {
                Ok(children.iter().map(|(n, i)| (n.clone(), *i)).collect())
            }
            _ => Err(MountError::NotADirectory),
        }
    }

    async fn entry_kind(&self, inode: InodeNumber) -> MountResult<TreeEntryType> {
        let inner = self.inner.lock();
        let node = inner.nodes.get(&inode).ok_or(MountError::NotFound)?;
        Ok(match node.kind {
            NodeKind::Dir { .. } => TreeEntryType::Tree,
            NodeKind::File { executable: true, .. } => TreeEntryType::ExecutableFile,
            NodeKind::File { executable: false, .. } => TreeEntryType::RegularFile,
            NodeKind::Symlink { .. } => TreeEntryType::Symlink,
        })
    }

    async fn write_file(
        &self,
        parent: InodeNumber,
        name: &OsStr,
        executable: bool,
        content: Vec<u8>,
    ) -> MountResult<InodeNumber> {
        let mut inner = self.inner.lock();
        if let Some(existing) = Self::child_named(&inner, parent, name) {
            match inner.nodes.get_mut(&existing) {
                Some(Node { kind: NodeKind::File { content: c, executable: e }, .. }) => {
                    *c = content;
                    *e = executable;
                    return Ok(existing);
                }
                _ => return Err(MountError::NotADirectory),
            }
        }
        let ino = self.alloc(&mut inner);
        inner.nodes.insert(
            ino,
            Node {
                parent,
                name: name.to_owned(),
                kind: NodeKind::File { content, executable },
            },
        );
        Self::add_child(&mut inner, parent, name, ino)?;
        Ok(ino)
    }

    async fn mkdir(&self, parent: InodeNumber, name: &OsStr) -> MountResult<InodeNumber> {
        let mut inner = self.inner.lock();
        if Self::child_named(&inner, parent, name).is_some() {
            return Err(MountError::AlreadyExists);
        }
        let ino = self.alloc(&mut inner);
        inner.nodes.insert(
            ino,
            Node {
                parent,
                name: name.to_owned(),
                kind: NodeKind::Dir {
                    children: BTreeMap::new(),
                },
            },
        );
        Self::add_child(&mut inner, parent, name, ino)?;
        Ok(ino)
    }

    async fn create_symlink(
        &self,
        parent: InodeNumber,
        name: &OsStr,
        target: &Path,
    ) -> MountResult<InodeNumber> {
        let mut inner = self.inner.lock();
        if let Some(existing) = Self::child_named(&inner, parent, name) {
            // DotEdenSetup re-creates with new contents; remove first.
            inner.nodes.remove(&existing);
            if let NodeKind::Dir { children } = &mut inner.nodes.get_mut(&parent).unwrap().kind {
                children.remove(name);
            }
        }
        let ino = self.alloc(&mut inner);
        inner.nodes.insert(
            ino,
            Node {
                parent,
                name: name.to_owned(),
                kind: NodeKind::Symlink {
                    target: target.to_owned(),
                },
            },
        );
        Self::add_child(&mut inner, parent, name, ino)?;
        Ok(ino)
    }

    async fn read_symlink(&self, inode: InodeNumber) -> MountResult<PathBuf> {
        let inner = self.inner.lock();
        match &inner.nodes.get(&inode).ok_or(MountError::NotFound)?.kind {
            NodeKind::Symlink { target } => Ok(target.clone()),
            _ => Err(MountError::NotFound),
        }
    }

    async fn read_file_content(&self, inode: InodeNumber) -> MountResult<Vec<u8>> {
        let inner = self.inner.lock();
        match &inner.nodes.get(&inode).ok_or(MountError::NotFound)?.kind {
            NodeKind::File { content, .. } => Ok(content.clone()),
            _ => Err(MountError::NotADirectory),
        }
    }

    async fn content_hash(&self, inode: InodeNumber) -> MountResult<crate::ids::RootId> {
        let inner = self.inner.lock();
        let node = inner.nodes.get(&inode).ok_or(MountError::NotFound)?;
        match &node.kind {
            NodeKind::File { content, .. } => Ok(hash_bytes(content)),
            NodeKind::Symlink { target } => {
                Ok(hash_bytes(target.as_os_str().as_encoded_bytes()))
            }
            NodeKind::Dir { .. } => Err(MountError::NotADirectory),
        }
    }

    async fn remove_entry(&self, parent: InodeNumber, name: &OsStr) -> MountResult<()> {
        let mut inner = self.inner.lock();
        let child = Self::child_named(&inner, parent, name).ok_or(MountError::NotFound)?;
        inner.nodes.remove(&child);
        if let NodeKind::Dir { children } = &mut inner.nodes.get_mut(&parent).unwrap().kind {
            children.remove(name);
        }
        Ok(())
    }

    async fn path_of(&self, inode: InodeNumber) -> MountResult<PathBuf> {
        let inner = self.inner.lock();
        let mut components = Vec::new();
        let mut current = inode;
        loop {
            if current == InodeNumber::ROOT {
                break;
            }
            let node = inner.nodes.get(&current).ok_or(MountError::NotFound)?;
            components.push(node.name.clone());
            current = node.parent;
        }
        components.reverse();
        Ok(components.into_iter().collect())
    }
}

/// An in-memory [`ObjectStore`] serving trees and blobs registered up
/// front.
pub struct MockObjectStore {
    trees: Mutex<HashMap<Vec<u8>, Tree>>,
    blobs: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MockObjectStore {
    /// An object store with no trees or blobs registered.
    pub fn new() -> Self {
        MockObjectStore {
            trees: Mutex::new(HashMap::new()),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Register the tree for a given root id.
    pub fn insert(&self, root_id: &crate::ids::RootId, tree: Tree) {
        self.trees.lock().insert(root_id.as_bytes().to_vec(), tree);
    }

    /// Register a blob's content under its content hash, computed with
    /// [`hash_bytes`] so it matches hashes built by test fixtures.
    pub fn insert_blob(&self, content: Vec<u8>) -> crate::ids::RootId {
        let hash = hash_bytes(&content);
        self.blobs.lock().insert(hash.as_bytes().to_vec(), content);
        hash
    }
}

impl Default for MockObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn get_root_tree(&self, root_id: &crate::ids::RootId, ctx: &FetchContext) -> MountResult<Tree> {
        ctx.record_tree_fetch();
        self.trees
            .lock()
            .get(root_id.as_bytes())
            .cloned()
            .ok_or(MountError::NotFound)
    }

    async fn get_tree_entry_for_root_id(
        &self,
        root_id: &crate::ids::RootId,
        _entry_type: TreeEntryType,
        basename: &OsStr,
        ctx: &FetchContext,
    ) -> MountResult<TreeEntry> {
        ctx.record_blob_fetch();
        let trees = self.trees.lock();
        let tree = trees.get(root_id.as_bytes()).ok_or(MountError::NotFound)?;
        tree.get(basename).cloned().ok_or(MountError::NotFound)
    }

    async fn get_blob_content(
        &self,
        hash: &crate::ids::RootId,
        _ctx: &FetchContext,
    ) -> MountResult<Vec<u8>> {
        self.blobs
            .lock()
            .get(hash.as_bytes())
            .cloned()
            .ok_or(MountError::NotFound)
    }
}

/// An in-memory [`Overlay`] with no persisted state (the common test
/// case per spec.md §4.1's "else from scratch" branch).
pub struct MockOverlay {
    persistent: bool,
}

impl MockOverlay {
    /// An overlay with no persisted state.
    pub fn new(persistent: bool) -> Self {
        MockOverlay { persistent }
    }
}

#[async_trait]
impl Overlay for MockOverlay {
    async fn initialize(&self, _mount_path: &Path, progress: &dyn ProgressReporter) -> MountResult<()> {
        progress.report(1, 1);
        Ok(())
    }

    async fn load_overlay_dir(&self, _inode: InodeNumber) -> MountResult<Option<Vec<OverlayDirEntry>>> {
        Ok(None)
    }

    async fn close(&self) -> MountResult<()> {
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }

    async fn persisted_root_dir(&self) -> Option<Vec<OverlayDirEntry>> {
        None
    }
}

/// An in-memory [`crate::external::InodeMap`] tracking only what the core
/// needs to observe: the root inode and a referenced-inode set.
pub struct MockInodeMap {
    root: Mutex<Option<InodeNumber>>,
    referenced: Mutex<Vec<InodeNumber>>,
    unmounted: std::sync::atomic::AtomicBool,
}

impl MockInodeMap {
    /// A fresh, uninitialized inode map.
    pub fn new() -> Self {
        MockInodeMap {
            root: Mutex::new(None),
            referenced: Mutex::new(Vec::new()),
            unmounted: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Register an inode as referenced by the kernel driver, so a later
    /// `shutdown(do_takeover = true)` carries it into the snapshot.
    pub fn add_referenced(&self, inode: InodeNumber) {
        self.referenced.lock().push(inode);
    }

    /// Encode root inode + referenced inodes as
    /// `[root, count, referenced...]`, little-endian `u64`s.
    fn serialize(root: InodeNumber, referenced: &[InodeNumber]) -> SerializedInodeMap {
        let mut bytes = Vec::with_capacity(8 * (2 + referenced.len()));
        bytes.extend_from_slice(&root.0.to_le_bytes());
        bytes.extend_from_slice(&(referenced.len() as u64).to_le_bytes());
        for inode in referenced {
            bytes.extend_from_slice(&inode.0.to_le_bytes());
        }
        SerializedInodeMap(bytes)
    }

    /// Inverse of [`Self::serialize`].
    fn deserialize(snapshot: &SerializedInodeMap) -> (InodeNumber, Vec<InodeNumber>) {
        let bytes = &snapshot.0;
        let root = InodeNumber(u64::from_le_bytes(bytes[0..8].try_into().unwrap()));
        let count = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
        let referenced = (0..count)
            .map(|i| {
                let start = 16 + i * 8;
                InodeNumber(u64::from_le_bytes(bytes[start..start + 8].try_into().unwrap()))
            })
            .collect();
        (root, referenced)
    }
}

impl Default for MockInodeMap {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::external::InodeMap for MockInodeMap {
    async fn initialize(&self, root_inode: InodeNumber) -> MountResult<()> {
        *self.root.lock() = Some(root_inode);
        Ok(())
    }

    async fn initialize_from_overlay(&self, root_inode: InodeNumber) -> MountResult<()> {
        *self.root.lock() = Some(root_inode);
        Ok(())
    }

    async fn initialize_from_takeover(
        &self,
        _root_inode: InodeNumber,
        serialized: &SerializedInodeMap,
    ) -> MountResult<()> {
        let (root, referenced) = Self::deserialize(serialized);
        *self.root.lock() = Some(root);
        *self.referenced.lock() = referenced;
        Ok(())
    }

    async fn shutdown(&self, _do_takeover: bool) -> MountResult<SerializedInodeMap> {
        // `shutdown` is reachable with `allow_not_started` before
        // `initialize` ever ran (e.g. a mount torn down straight out of
        // `InitError`), so there may be no root inode yet.
        let root = self.root.lock().unwrap_or(InodeNumber(0));
        let referenced = self.referenced.lock().clone();
        Ok(Self::serialize(root, &referenced))
    }

    fn root_inode(&self) -> InodeNumber {
        self.root.lock().expect("inode map not initialized")
    }

    fn referenced_inodes(&self) -> Vec<InodeNumber> {
        self.referenced.lock().clone()
    }

    fn set_unmounted(&self) {
        self.unmounted.store(true, Ordering::SeqCst);
    }
}

/// An in-memory [`Journal`] recording every entry for inspection in
/// tests.
pub struct MockJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

/// One recorded journal entry.
#[derive(Clone, Debug)]
pub enum JournalEntry {
    /// A hash-update entry.
    HashUpdate {
        /// Prior root id, if any.
        old: Option<crate::ids::RootId>,
        /// New root id.
        new: crate::ids::RootId,
    },
    /// An unclean-paths entry.
    UncleanPaths {
        /// Prior root id.
        old: crate::ids::RootId,
        /// New root id.
        new: crate::ids::RootId,
        /// Paths whose working-copy content differs from committed
        /// content.
        paths: BTreeSet<PathBuf>,
    },
}

impl MockJournal {
    /// A journal with no entries.
    pub fn new() -> Self {
        MockJournal {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// All entries recorded so far, in order.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }
}

impl Default for MockJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Journal for MockJournal {
    async fn record_hash_update(&self, old: Option<crate::ids::RootId>, new: crate::ids::RootId) {
        self.entries.lock().push(JournalEntry::HashUpdate { old, new });
    }

    async fn record_unclean_paths(
        &self,
        old: crate::ids::RootId,
        new: crate::ids::RootId,
        paths: BTreeSet<PathBuf>,
    ) {
        self.entries
            .lock()
            .push(JournalEntry::UncleanPaths { old, new, paths });
    }

    async fn cancel_all_subscribers(&self) {}
}

/// An in-memory [`PrivilegedHelper`] that always succeeds, handing out
/// incrementing fake fds.
pub struct MockPrivilegedHelper {
    next_fd: AtomicU64,
    /// If set, `fuse_mount` sleeps this long before returning, so tests
    /// can race an `unmount()` against an in-flight attach.
    pub mount_delay: Mutex<Option<std::time::Duration>>,
    /// The `ChannelOptions` most recently passed to `fuse_mount`/`nfs_mount`,
    /// so tests can assert `MountConfig`'s tunables actually reach the
    /// channel-attach path.
    pub last_channel_options: Mutex<Option<crate::external::ChannelOptions>>,
}

impl MockPrivilegedHelper {
    /// A helper with no artificial delay.
    pub fn new() -> Self {
        MockPrivilegedHelper {
            next_fd: AtomicU64::new(3),
            mount_delay: Mutex::new(None),
            last_channel_options: Mutex::new(None),
        }
    }
}

impl Default for MockPrivilegedHelper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrivilegedHelper for MockPrivilegedHelper {
    async fn fuse_mount(
        &self,
        _path: &Path,
        _read_only: bool,
        options: &crate::external::ChannelOptions,
    ) -> MountResult<RawFuseDevice> {
        if let Some(delay) = *self.mount_delay.lock() {
            tokio::time::sleep(delay).await;
        }
        *self.last_channel_options.lock() = Some(*options);
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed) as i32;
        Ok(RawFuseDevice::from_raw_fd(fd))
    }

    async fn fuse_unmount(&self, _path: &Path) -> MountResult<()> {
        Ok(())
    }

    async fn nfs_mount(
        &self,
        _path: &Path,
        _mountd_addr: SocketAddr,
        _nfsd_addr: SocketAddr,
        _read_only: bool,
        _io_size: u32,
        options: &crate::external::ChannelOptions,
    ) -> MountResult<()> {
        *self.last_channel_options.lock() = Some(*options);
        Ok(())
    }

    async fn nfs_unmount(&self, _path: &Path) -> MountResult<()> {
        Ok(())
    }

    async fn bind_mount(&self, _target: &Path, _source: &Path) -> MountResult<()> {
        Ok(())
    }

    async fn bind_unmount(&self, _path: &Path) -> MountResult<()> {
        Ok(())
    }
}

/// Convenience bundle of mock collaborators for constructing a `Mount`
/// in tests.
pub struct MockCollaborators {
    /// Object store.
    pub object_store: Arc<MockObjectStore>,
    /// Overlay.
    pub overlay: Arc<MockOverlay>,
    /// Inode map.
    pub inode_map: Arc<MockInodeMap>,
    /// Journal.
    pub journal: Arc<MockJournal>,
    /// Privileged helper.
    pub helper: Arc<MockPrivilegedHelper>,
}

impl MockCollaborators {
    /// A fresh, empty set of mock collaborators.
    pub fn new() -> Self {
        MockCollaborators {
            object_store: Arc::new(MockObjectStore::new()),
            overlay: Arc::new(MockOverlay::new(false)),
            inode_map: Arc::new(MockInodeMap::new()),
            journal: Arc::new(MockJournal::new()),
            helper: Arc::new(MockPrivilegedHelper::new()),
        }
    }
}

impl Default for MockCollaborators {
    fn default() -> Self {
        Self::new()
    }
}
