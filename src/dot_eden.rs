//! `DotEdenSetup` — materializes the `.eden` control directory and its
//! symlinks (spec.md §4.5).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::MountResult;
use crate::external::WorkingTree;
use crate::ids::InodeNumber;
use crate::tree::TreeEntryType;

const DOT_EDEN: &str = ".eden";

/// One of the four control symlinks `.eden` carries.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ControlSymlink {
    /// `.eden/this-dir` points back at `.eden` itself.
    ThisDir,
    /// `.eden/root` points at the mount root.
    Root,
    /// `.eden/socket` points at the server's socket path.
    Socket,
    /// `.eden/client` points at the per-mount client directory.
    Client,
}

impl ControlSymlink {
    fn name(self) -> &'static str {
        match self {
            ControlSymlink::ThisDir => "this-dir",
            ControlSymlink::Root => "root",
            ControlSymlink::Socket => "socket",
            ControlSymlink::Client => "client",
        }
    }

    const ALL: [ControlSymlink; 4] = [
        ControlSymlink::ThisDir,
        ControlSymlink::Root,
        ControlSymlink::Socket,
        ControlSymlink::Client,
    ];
}

/// Materializes and repairs `.eden`'s four control symlinks, then locks
/// the directory's inode number against further modification.
pub struct DotEdenSetup<'a> {
    tree: &'a dyn WorkingTree,
    locked: AtomicBool,
}

impl<'a> DotEdenSetup<'a> {
    /// Build a setup helper against `tree`.
    pub fn new(tree: &'a dyn WorkingTree) -> Self {
        DotEdenSetup {
            tree,
            locked: AtomicBool::new(false),
        }
    }

    /// Whether `.eden`'s inode has been recorded, after which further
    /// modification through this helper is rejected (spec.md §3
    /// invariant).
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Run setup: ensure `.eden` exists, create or repair each control
    /// symlink (errors per symlink are logged and swallowed — mount
    /// proceeds regardless), then lock the directory.
    pub async fn run(
        &self,
        mount_path: &Path,
        socket_path: &Path,
        client_directory: &Path,
    ) -> MountResult<InodeNumber> {
        let dot_eden = match self.tree.lookup_child(self.tree.root(), std::ffi::OsStr::new(DOT_EDEN)).await? {
            Some(existing) => existing,
            None => self.tree.mkdir(self.tree.root(), std::ffi::OsStr::new(DOT_EDEN)).await?,
        };

        let this_dir_target = mount_path.join(DOT_EDEN);
        let targets = [
            (ControlSymlink::ThisDir, this_dir_target.as_path()),
            (ControlSymlink::Root, mount_path),
            (ControlSymlink::Socket, socket_path),
            (ControlSymlink::Client, client_directory),
        ];

        for (symlink, target) in targets {
            if let Err(err) = self.install_symlink(dot_eden, symlink, target).await {
                log::warn!("failed to install .eden/{}: {err}", symlink.name());
            }
        }

        self.locked.store(true, Ordering::Release);
        Ok(dot_eden)
    }

    async fn install_symlink(
        &self,
        dot_eden: InodeNumber,
        symlink: ControlSymlink,
        target: &Path,
    ) -> MountResult<()> {
        let name = std::ffi::OsStr::new(symlink.name());
        match self.tree.lookup_child(dot_eden, name).await? {
            None => {
                self.tree.create_symlink(dot_eden, name, target).await?;
            }
            Some(existing) => match self.tree.entry_kind(existing).await? {
                TreeEntryType::Tree => {
                    log::warn!(".eden/{} exists as a directory; leaving it in place", symlink.name());
                }
                TreeEntryType::Symlink => {
                    let current = self.tree.read_symlink(existing).await?;
                    if current != target {
                        self.tree.remove_entry(dot_eden, name).await?;
                        self.tree.create_symlink(dot_eden, name, target).await?;
                    }
                }
                TreeEntryType::RegularFile | TreeEntryType::ExecutableFile => {
                    self.tree.remove_entry(dot_eden, name).await?;
                    self.tree.create_symlink(dot_eden, name, target).await?;
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockWorkingTree;
    use std::ffi::OsStr;

    #[tokio::test]
    async fn creates_all_four_symlinks() {
        let tree = MockWorkingTree::new();
        let setup = DotEdenSetup::new(&tree);
        let dot_eden = setup
            .run(Path::new("/mnt"), Path::new("/mnt/.eden-state/socket"), Path::new("/mnt/.eden-state/client"))
            .await
            .unwrap();

        for symlink in ControlSymlink::ALL {
            let child = tree
                .lookup_child(dot_eden, OsStr::new(symlink.name()))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(tree.entry_kind(child).await.unwrap(), TreeEntryType::Symlink);
        }
        assert!(setup.is_locked());
    }

    #[tokio::test]
    async fn repairs_symlink_with_wrong_target() {
        let tree = MockWorkingTree::new();
        let dot_eden = tree.mkdir(tree.root(), OsStr::new(DOT_EDEN)).await.unwrap();
        tree.create_symlink(dot_eden, OsStr::new("root"), Path::new("/wrong"))
            .await
            .unwrap();

        let setup = DotEdenSetup::new(&tree);
        setup
            .run(Path::new("/mnt"), Path::new("/sock"), Path::new("/client"))
            .await
            .unwrap();

        let root_link = tree.lookup_child(dot_eden, OsStr::new("root")).await.unwrap().unwrap();
        assert_eq!(tree.read_symlink(root_link).await.unwrap(), PathBuf::from("/mnt"));
    }

    #[tokio::test]
    async fn replaces_non_symlink_file() {
        let tree = MockWorkingTree::new();
        let dot_eden = tree.mkdir(tree.root(), OsStr::new(DOT_EDEN)).await.unwrap();
        tree.create_file(dot_eden, OsStr::new("socket")).await.unwrap();

        let setup = DotEdenSetup::new(&tree);
        setup
            .run(Path::new("/mnt"), Path::new("/sock"), Path::new("/client"))
            .await
            .unwrap();

        let socket_link = tree.lookup_child(dot_eden, OsStr::new("socket")).await.unwrap().unwrap();
        assert_eq!(tree.entry_kind(socket_link).await.unwrap(), TreeEntryType::Symlink);
    }
}
