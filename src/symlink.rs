//! `SymlinkResolver` — bounded symlink chain resolution with loop
//! detection (spec.md §4.6).

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use crate::error::{MountError, MountResult};
use crate::external::WorkingTree;
use crate::ids::InodeNumber;
use crate::tree::TreeEntryType;

/// Maximum symlink chain depth before resolution fails with `ELOOP`
/// (spec.md §4.6, §8).
pub const MAX_SYMLINK_DEPTH: u32 = 40;

/// Resolves symlinks against a [`WorkingTree`], following spec.md §4.6's
/// rules: non-symlinks pass through unchanged; a chain longer than
/// [`MAX_SYMLINK_DEPTH`] hops fails with `Loop`; an inode with no
/// resolvable path fails with `NotFound`.
pub struct SymlinkResolver<'a> {
    tree: &'a dyn WorkingTree,
}

impl<'a> SymlinkResolver<'a> {
    /// Build a resolver against `tree`.
    pub fn new(tree: &'a dyn WorkingTree) -> Self {
        SymlinkResolver { tree }
    }

    /// Resolve `inode`, following symlink chains. Returns `inode`
    /// unchanged if it is not a symlink.
    pub async fn resolve(&self, inode: InodeNumber) -> MountResult<InodeNumber> {
        self.resolve_depth(inode, 0).await
    }

    /// Recursive async fns produce an infinitely-sized future type; box
    /// the recursive call to erase it.
    fn resolve_depth(
        &self,
        inode: InodeNumber,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = MountResult<InodeNumber>> + '_>> {
        Box::pin(async move {
            if depth > MAX_SYMLINK_DEPTH {
                return Err(MountError::Loop);
            }
            if self.tree.entry_kind(inode).await? != TreeEntryType::Symlink {
                return Ok(inode);
            }

            let target = self.tree.read_symlink(inode).await?;
            let own_path = self.tree.path_of(inode).await?;
            let parent_dir = own_path.parent().unwrap_or_else(|| Path::new(""));
            let joined = parent_dir.join(&target);
            let normalized = normalize(&joined)?;

            let next = self.tree.lookup_path(&normalized).await?;
            self.resolve_depth(next, depth + 1).await
        })
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
/// A leading `..` that would escape the root is a normalization error.
fn normalize(path: &Path) -> MountResult<PathBuf> {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                match out.last() {
                    Some(Component::Normal(_)) => {
                        out.pop();
                    }
                    _ => return Err(MountError::NotFound),
                }
            }
            Component::RootDir | Component::Prefix(_) => {}
            normal @ Component::Normal(_) => out.push(normal),
        }
    }
    Ok(out.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::WorkingTree;
    use crate::testing::MockWorkingTree;
    use std::ffi::OsStr;

    #[tokio::test]
    async fn non_symlink_resolves_to_itself() {
        let tree = MockWorkingTree::new();
        let dir = tree.mkdir(tree.root(), OsStr::new("d")).await.unwrap();
        let resolver = SymlinkResolver::new(&tree);
        assert_eq!(resolver.resolve(dir).await.unwrap(), dir);
    }

    #[tokio::test]
    async fn loop_is_detected() {
        let tree = MockWorkingTree::new();
        tree.create_symlink(tree.root(), OsStr::new("a"), Path::new("b"))
            .await
            .unwrap();
        tree.create_symlink(tree.root(), OsStr::new("b"), Path::new("a"))
            .await
            .unwrap();
        let a = tree.lookup_child(tree.root(), OsStr::new("a")).await.unwrap().unwrap();
        let resolver = SymlinkResolver::new(&tree);
        let err = resolver.resolve(a).await.unwrap_err();
        assert!(matches!(err, MountError::Loop));
    }

    #[tokio::test]
    async fn chain_within_bound_resolves() {
        let tree = MockWorkingTree::new();
        let target = tree.mkdir(tree.root(), OsStr::new("target")).await.unwrap();
        let mut prev_name = "target".to_string();
        for i in 0..MAX_SYMLINK_DEPTH - 1 {
            let name = format!("link{i}");
            tree.create_symlink(tree.root(), OsStr::new(&name), Path::new(&prev_name))
                .await
                .unwrap();
            prev_name = name;
        }
        let head = tree
            .lookup_child(tree.root(), OsStr::new(&prev_name))
            .await
            .unwrap()
            .unwrap();
        let resolver = SymlinkResolver::new(&tree);
        assert_eq!(resolver.resolve(head).await.unwrap(), target);
    }
}
