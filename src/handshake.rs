//! `MountingHandshake` — tracks mount-start and unmount-start promises for
//! cancellation (spec.md §3, §5 Cancellation).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::MountError;

/// Outcome of a fulfilled promise: success, or the (shared) error that
/// caused it to fail.
pub type PromiseOutcome = Result<(), Arc<MountError>>;

/// A once-set-never-cleared, multi-waiter promise. Backed by a `watch`
/// channel so any number of callers can await the same outcome, mirroring
/// the teacher's `tokio::sync::oneshot`-per-subscriber pattern in
/// `session.rs`'s `ActiveSession::destroy_signals`, generalized to allow
/// repeated awaits of the same event.
#[derive(Clone)]
pub struct Promise {
    tx: Arc<watch::Sender<Option<PromiseOutcome>>>,
}

impl Promise {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Promise { tx: Arc::new(tx) }
    }

    /// Fulfill the promise. Only the first call has any effect; later
    /// calls are no-ops, preserving "never cleared, never replaced".
    pub fn fulfill(&self, outcome: PromiseOutcome) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(outcome);
                true
            }
        });
    }

    /// Whether the promise has already been fulfilled.
    pub fn is_fulfilled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait for the promise to be fulfilled and return its outcome.
    pub async fn wait(&self) -> PromiseOutcome {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without ever fulfilling: treat as cancelled.
                return Err(Arc::new(MountError::MountCancelled));
            }
        }
    }
}

/// Tracks the mount-start and unmount-start promises used to coordinate
/// cancellation between `start_channel` and `unmount` (spec.md §4.4,
/// §5 Cancellation).
pub struct MountingHandshake {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    channel_mount_promise: Option<Promise>,
    channel_unmount_promise: Option<Promise>,
}

impl MountingHandshake {
    /// A fresh handshake with neither promise started.
    pub fn new() -> Self {
        MountingHandshake {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Returns the mount promise, creating it if this is the first call.
    /// `bool` is true if this call created it (i.e. this caller owns
    /// fulfilling it).
    pub fn start_mount(&self) -> (Promise, bool) {
        let mut inner = self.inner.lock();
        if let Some(p) = &inner.channel_mount_promise {
            (p.clone(), false)
        } else {
            let p = Promise::new();
            inner.channel_mount_promise = Some(p.clone());
            (p, true)
        }
    }

    /// Returns the unmount promise, creating it if this is the first call.
    pub fn start_unmount(&self) -> (Promise, bool) {
        let mut inner = self.inner.lock();
        if let Some(p) = &inner.channel_unmount_promise {
            (p.clone(), false)
        } else {
            let p = Promise::new();
            inner.channel_unmount_promise = Some(p.clone());
            (p, true)
        }
    }

    /// Whether a mount attempt has ever been started.
    pub fn mount_started(&self) -> bool {
        self.inner.lock().channel_mount_promise.is_some()
    }

    /// Whether an unmount has ever been started. Used by `ChannelAttach`
    /// to detect that it should abort mid-attach.
    pub fn unmount_started(&self) -> bool {
        self.inner.lock().channel_unmount_promise.is_some()
    }

    /// The mount promise, if one has been started.
    pub fn channel_mount_promise(&self) -> Option<Promise> {
        self.inner.lock().channel_mount_promise.clone()
    }

    /// The unmount promise, if one has been started.
    pub fn channel_unmount_promise(&self) -> Option<Promise> {
        self.inner.lock().channel_unmount_promise.clone()
    }
}

impl Default for MountingHandshake {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn promise_fulfills_once_for_all_waiters() {
        let h = MountingHandshake::new();
        let (p1, created1) = h.start_mount();
        let (p2, created2) = h.start_mount();
        assert!(created1);
        assert!(!created2);

        let waiter = tokio::spawn({
            let p = p2.clone();
            async move { p.wait().await }
        });

        p1.fulfill(Ok(()));
        // Fulfilling again must not override the first outcome.
        p1.fulfill(Err(Arc::new(MountError::MountCancelled)));

        assert!(waiter.await.unwrap().is_ok());
        assert!(p1.is_fulfilled());
    }

    #[test]
    fn unmount_started_reflects_first_call_only() {
        let h = MountingHandshake::new();
        assert!(!h.unmount_started());
        h.start_unmount();
        assert!(h.unmount_started());
    }
}
