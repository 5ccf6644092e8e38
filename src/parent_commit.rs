//! `ParentCommit` — reader/writer-locked holder of the current commit
//! root id (spec.md §3, §5).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::{MountError, MountResult};
use crate::ids::RootId;

/// Default acquire-timeout used by the checkout path and parent-enforcing
/// diffs (spec.md §5 Timeouts).
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Reader/writer-locked holder of the mount's current parent commit.
#[derive(Debug)]
pub struct ParentCommit {
    inner: Arc<RwLock<RootId>>,
}

impl ParentCommit {
    /// Create a new holder seeded with `initial`.
    pub fn new(initial: RootId) -> Self {
        ParentCommit {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Read the current value. Never blocks longer than an uncontended
    /// lock acquisition; readers observe either the old or new value but
    /// never an intermediate state (spec.md §5 Ordering guarantees).
    pub async fn current(&self) -> RootId {
        self.inner.read().await.clone()
    }

    /// Acquire the writer lock with a bounded timeout, failing with
    /// `CheckoutInProgress` if another writer already holds it past the
    /// deadline. The guard is owned so it can be carried across await
    /// points inside a checkout context for the transaction's lifetime.
    pub async fn acquire_writer_timeout(
        &self,
        timeout: Duration,
    ) -> MountResult<OwnedRwLockWriteGuard<RootId>> {
        tokio::time::timeout(timeout, self.inner.clone().write_owned())
            .await
            .map_err(|_| MountError::CheckoutInProgress)
    }

    /// Acquire the reader lock with a bounded timeout, used by
    /// parent-enforcing diffs (spec.md §4.3).
    pub async fn acquire_reader_timeout(
        &self,
        timeout: Duration,
    ) -> MountResult<OwnedRwLockReadGuard<RootId>> {
        tokio::time::timeout(timeout, self.inner.clone().read_owned())
            .await
            .map_err(|_| MountError::CheckoutInProgress)
    }

    /// Unconditionally replace the current value, used by `reset_parent`.
    /// Blocks until any outstanding writer releases; unbounded per
    /// spec.md §5 ("unbounded elsewhere").
    pub async fn reset(&self, new: RootId) -> RootId {
        let mut guard = self.inner.write().await;
        std::mem::replace(&mut *guard, new)
    }
}
