//! `DirectoryEnsurer` — idempotent, race-tolerant recursive `mkdir -p`
//! against the inode tree (spec.md §4.7).

use std::path::Path;

use crate::error::{MountError, MountResult};
use crate::external::WorkingTree;
use crate::ids::InodeNumber;
use crate::tree::TreeEntryType;

/// Ensures every component of a path exists as a directory under the
/// working tree's root, tolerating concurrent creators racing on the
/// same component.
pub struct DirectoryEnsurer<'a> {
    tree: &'a dyn WorkingTree,
}

impl<'a> DirectoryEnsurer<'a> {
    /// Build an ensurer against `tree`.
    pub fn new(tree: &'a dyn WorkingTree) -> Self {
        DirectoryEnsurer { tree }
    }

    /// Guarantee every component of `path` exists as a directory,
    /// returning the final directory's inode.
    pub async fn ensure(&self, path: &Path) -> MountResult<InodeNumber> {
        let mut current = self.tree.root();
        for component in path.components() {
            use std::path::Component;
            let name = match component {
                Component::Normal(name) => name,
                _ => continue,
            };
            current = self.ensure_component(current, name).await?;
        }
        Ok(current)
    }

    async fn ensure_component(
        &self,
        parent: InodeNumber,
        name: &std::ffi::OsStr,
    ) -> MountResult<InodeNumber> {
        loop {
            if let Some(existing) = self.tree.lookup_child(parent, name).await? {
                return match self.tree.entry_kind(existing).await? {
                    TreeEntryType::Tree => Ok(existing),
                    _ => Err(MountError::AlreadyExists),
                };
            }
            match self.tree.mkdir(parent, name).await {
                Ok(inode) => return Ok(inode),
                // A concurrent creator won the race: restart this
                // component rather than failing (spec.md §4.7).
                Err(MountError::AlreadyExists) => continue,
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::WorkingTree;
    use crate::testing::MockWorkingTree;
    use std::sync::Arc;

    #[tokio::test]
    async fn ensures_nested_path() {
        let tree = MockWorkingTree::new();
        let ensurer = DirectoryEnsurer::new(&tree);
        let leaf = ensurer.ensure(Path::new("x/y/z")).await.unwrap();
        assert_eq!(tree.entry_kind(leaf).await.unwrap(), TreeEntryType::Tree);
        assert_eq!(tree.path_of(leaf).await.unwrap(), Path::new("x/y/z"));
    }

    #[tokio::test]
    async fn component_that_is_a_file_fails() {
        let tree = MockWorkingTree::new();
        tree.create_file(tree.root(), std::ffi::OsStr::new("x"))
            .await
            .unwrap();
        let ensurer = DirectoryEnsurer::new(&tree);
        let err = ensurer.ensure(Path::new("x/y")).await.unwrap_err();
        assert!(matches!(err, MountError::AlreadyExists));
    }

    #[tokio::test]
    async fn concurrent_ensures_agree_on_one_inode() {
        let tree = Arc::new(MockWorkingTree::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let tree = tree.clone();
            handles.push(tokio::spawn(async move {
                let ensurer = DirectoryEnsurer::new(&*tree);
                ensurer.ensure(Path::new("x/y/z")).await.unwrap()
            }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        let first = results[0];
        assert!(results.iter().all(|&r| r == first));
        assert_eq!(tree.child_count(tree.root()).await, 1);
    }
}
