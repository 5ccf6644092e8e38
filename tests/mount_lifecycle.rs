//! End-to-end scenarios against `Mount`, driving it the way an embedding
//! application would: construct, initialize, checkout, unmount, shut
//! down. Uses the in-memory mock collaborators from `testing`, so
//! `Mount` itself is the only thing under test.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eden_mount_core::{
    CheckoutMode, InodeMap, LogStructuredLogger, Mount, MountConfig, MountError, MountProtocol,
    NoFaultInjector, NullProgressReporter, RootId, SystemClock, Tree, TreeEntry, TreeEntryType,
};
use eden_mount_core::testing::{MockCollaborators, MockWorkingTree};

fn build_mount(parent: RootId) -> (Mount, MockCollaborators, Arc<MockWorkingTree>) {
    let collaborators = MockCollaborators::new();
    let tree = Arc::new(MockWorkingTree::new());
    let config = MountConfig::new(
        PathBuf::from("/mnt/checkout"),
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

fn file_entry(store: &eden_mount_core::testing::MockObjectStore, name: &str, content: &[u8]) -> TreeEntry {
    let hash = store.insert_blob(content.to_vec());
    TreeEntry {
        name: std::ffi::OsString::from(name),
        entry_type: TreeEntryType::RegularFile,
        hash,
    }
}

/// spec.md §8 scenario 1: init-then-checkout.
#[tokio::test]
async fn init_then_checkout_matches_scenario() {
    let r0 = RootId::new(vec![0]);
    let r1 = RootId::new(vec![1]);
    let (mount, collaborators, tree) = build_mount(r0.clone());

    collaborators.object_store.insert(
        &r0,
        Tree::new([
            file_entry(&collaborators.object_store, "a", b"1"),
            file_entry(&collaborators.object_store, "b", b"2"),
        ]),
    );
    collaborators.object_store.insert(
        &r1,
        Tree::new([
            file_entry(&collaborators.object_store, "a", b"1"),
            file_entry(&collaborators.object_store, "b", b"3"),
            file_entry(&collaborators.object_store, "c", b"4"),
        ]),
    );

    mount.initialize(&NullProgressReporter, None).await.unwrap();
    tree.create_file_with_content(tree.root(), OsStr::new("a"), b"1".to_vec())
        .await
        .unwrap();
    tree.create_file_with_content(tree.root(), OsStr::new("b"), b"2".to_vec())
        .await
        .unwrap();

    let outcome = mount.checkout(CheckoutMode::Normal, r1.clone()).await.unwrap();

    assert!(outcome.conflicts.is_empty());
    assert_eq!(mount.current_parent().await.as_bytes(), r1.as_bytes());

    let b_content = mount.load_file_contents_from_path(Path::new("b")).await.unwrap();
    assert_eq!(b_content, b"3");
    let c_content = mount.load_file_contents_from_path(Path::new("c")).await.unwrap();
    assert_eq!(c_content, b"4");

    // One hash-update entry from `initialize`, one unclean-paths entry
    // (b) from the checkout; c was added fresh, not unclean.
    assert_eq!(collaborators.journal.entries().len(), 2);
}

/// spec.md §8 scenario 2: dry-run checkout leaves everything untouched.
#[tokio::test]
async fn dry_run_checkout_does_not_mutate() {
    let r0 = RootId::new(vec![0]);
    let r1 = RootId::new(vec![1]);
    let (mount, collaborators, tree) = build_mount(r0.clone());

    collaborators
        .object_store
        .insert(&r0, Tree::new([file_entry(&collaborators.object_store, "b", b"2")]));
    collaborators
        .object_store
        .insert(&r1, Tree::new([file_entry(&collaborators.object_store, "b", b"3")]));

    mount.initialize(&NullProgressReporter, None).await.unwrap();
    tree.create_file_with_content(tree.root(), OsStr::new("b"), b"2".to_vec())
        .await
        .unwrap();
    let entries_before = collaborators.journal.entries().len();

    let outcome = mount.checkout(CheckoutMode::DryRun, r1.clone()).await.unwrap();

    assert!(outcome.conflicts.is_empty());
    assert_eq!(mount.current_parent().await.as_bytes(), r0.as_bytes());
    let b_content = mount.load_file_contents_from_path(Path::new("b")).await.unwrap();
    assert_eq!(b_content, b"2");
    assert_eq!(collaborators.journal.entries().len(), entries_before);
}

/// spec.md §8 scenario 3: of two concurrent checkouts, exactly one wins.
#[tokio::test]
async fn concurrent_checkouts_exactly_one_wins() {
    let r0 = RootId::new(vec![0]);
    let r1 = RootId::new(vec![1]);
    let r2 = RootId::new(vec![2]);
    let (mount, collaborators, _tree) = build_mount(r0.clone());
    collaborators.object_store.insert(&r0, Tree::default());
    collaborators.object_store.insert(&r1, Tree::default());
    collaborators.object_store.insert(&r2, Tree::default());
    mount.initialize(&NullProgressReporter, None).await.unwrap();

    let mount = Arc::new(mount);
    let m1 = mount.clone();
    let m2 = mount.clone();
    let (res1, res2) = tokio::join!(
        tokio::spawn(async move { m1.checkout(CheckoutMode::Normal, r1.clone()).await }),
        tokio::spawn(async move { m2.checkout(CheckoutMode::Normal, r2.clone()).await }),
    );
    let res1 = res1.unwrap();
    let res2 = res2.unwrap();

    let successes = [res1.is_ok(), res2.is_ok()].iter().filter(|&&ok| ok).count();
    assert_eq!(successes, 1);
    let failures = [&res1, &res2]
        .iter()
        .filter(|r| matches!(r, Err(MountError::CheckoutInProgress)))
        .count();
    assert_eq!(failures, 1);

    let final_parent = mount.current_parent().await;
    assert!(final_parent.as_bytes() == [1] || final_parent.as_bytes() == [2]);
}

/// spec.md §8 scenario 5: unmount racing start_channel.
#[tokio::test]
async fn unmount_during_start_channel() {
    let r0 = RootId::new(vec![0]);
    let (mount, collaborators, _tree) = build_mount(r0.clone());
    collaborators.object_store.insert(&r0, Tree::default());
    mount.initialize(&NullProgressReporter, None).await.unwrap();
    *collaborators.helper.mount_delay.lock() = Some(std::time::Duration::from_millis(50));

    let mount = Arc::new(mount);
    let m1 = mount.clone();
    let m2 = mount.clone();
    let (start_result, unmount_result) = tokio::join!(
        tokio::spawn(async move { m1.start_channel(false).await }),
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            m2.unmount().await
        }),
    );

    assert!(matches!(
        start_result.unwrap().unwrap_err(),
        MountError::DeviceUnmountedDuringInitialization
    ));
    assert!(unmount_result.unwrap().is_ok());
}

/// spec.md §8 round-trip law: `shutdown(do_takeover=true)` yields a
/// snapshot a successor mount's `initialize(takeover=...)` accepts, and
/// the successor's inode map ends up with the same live inodes as the
/// predecessor's.
#[tokio::test]
async fn takeover_round_trip_accepts_predecessor_snapshot() {
    use eden_mount_core::InodeNumber;

    let r0 = RootId::new(vec![0]);
    let (mount, collaborators, _tree) = build_mount(r0.clone());
    collaborators.object_store.insert(&r0, Tree::default());
    mount.initialize(&NullProgressReporter, None).await.unwrap();
    collaborators.inode_map.add_referenced(InodeNumber(42));
    collaborators.inode_map.add_referenced(InodeNumber(43));

    let snapshot = mount.shutdown(true, true).await.unwrap();

    let (successor, successor_collaborators, _successor_tree) = build_mount(r0.clone());
    successor_collaborators.object_store.insert(&r0, Tree::default());
    successor
        .initialize(&NullProgressReporter, Some(&snapshot))
        .await
        .unwrap();

    assert_eq!(successor.current_parent().await.as_bytes(), r0.as_bytes());
    assert_eq!(
        successor_collaborators.inode_map.referenced_inodes(),
        vec![InodeNumber(42), InodeNumber(43)]
    );
}

/// spec.md §8 invariant: `reset_parent` round-trips and journals.
#[tokio::test]
async fn reset_parent_round_trip_law() {
    let r0 = RootId::new(vec![0]);
    let r9 = RootId::new(vec![9]);
    let (mount, collaborators, _tree) = build_mount(r0.clone());

    let old = mount.reset_parent(r9.clone()).await;

    assert_eq!(old.as_bytes(), r0.as_bytes());
    assert_eq!(mount.current_parent().await.as_bytes(), r9.as_bytes());
    assert_eq!(collaborators.journal.entries().len(), 1);
}
