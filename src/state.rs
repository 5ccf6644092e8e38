//! The mount state machine (spec.md §3 `MountState`).
//!
//! Transitions are enforced with compare-and-swap on an atomic variable;
//! an illegal transition is a programmer error (`MountError::IllegalStateTransition`),
//! not a recoverable condition, matching spec.md §7's invariant-violation class.
//!
//! The legacy name for `ChannelError` was `FUSE_ERROR`, predating NFS and
//! projection support (spec.md §9 "Legacy naming"); this reimplementation
//! takes the redesign flag and uses the renamed variant throughout.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{MountError, MountResult};

/// The mount's lifecycle state (spec.md §3 diagram).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum MountState {
    /// Constructed, `initialize` not yet called.
    Uninitialized = 0,
    /// `initialize` is running.
    Initializing = 1,
    /// `initialize` succeeded; ready for `start_channel`.
    Initialized = 2,
    /// `initialize` failed.
    InitError = 3,
    /// `start_channel` is attaching to the kernel-channel driver.
    Starting = 4,
    /// The channel is attached and serving requests.
    Running = 5,
    /// Channel attach failed (legacy name: `FUSE_ERROR`).
    ChannelError = 6,
    /// `shutdown` is running.
    ShuttingDown = 7,
    /// `shutdown` completed.
    ShutDown = 8,
    /// `destroy` was called; a sink except that reaching `ShutDown` while
    /// here triggers self-deletion.
    Destroying = 9,
}

impl MountState {
    fn from_u8(v: u8) -> MountState {
        match v {
            0 => MountState::Uninitialized,
            1 => MountState::Initializing,
            2 => MountState::Initialized,
            3 => MountState::InitError,
            4 => MountState::Starting,
            5 => MountState::Running,
            6 => MountState::ChannelError,
            7 => MountState::ShuttingDown,
            8 => MountState::ShutDown,
            9 => MountState::Destroying,
            other => unreachable!("invalid MountState discriminant {other}"),
        }
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MountState::Uninitialized => "UNINITIALIZED",
            MountState::Initializing => "INITIALIZING",
            MountState::Initialized => "INITIALIZED",
            MountState::InitError => "INIT_ERROR",
            MountState::Starting => "STARTING",
            MountState::Running => "RUNNING",
            MountState::ChannelError => "CHANNEL_ERROR",
            MountState::ShuttingDown => "SHUTTING_DOWN",
            MountState::ShutDown => "SHUT_DOWN",
            MountState::Destroying => "DESTROYING",
        };
        f.write_str(name)
    }
}

/// Atomic holder of a [`MountState`] enforcing the legal-transition table.
#[derive(Debug)]
pub struct AtomicMountState(AtomicU8);

impl AtomicMountState {
    /// A fresh state machine, starting `UNINITIALIZED`.
    pub fn new() -> Self {
        AtomicMountState(AtomicU8::new(MountState::Uninitialized as u8))
    }

    /// Current state.
    pub fn load(&self) -> MountState {
        MountState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Attempt to move from one of `from` to `to`. Succeeds exactly once
    /// for whichever current state matches; fails with
    /// `IllegalStateTransition` if the observed state is not in `from`.
    pub fn transition(&self, from: &[MountState], to: MountState) -> MountResult<MountState> {
        for &candidate in from {
            match self.0.compare_exchange(
                candidate as u8,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(prev) => return Ok(MountState::from_u8(prev)),
                Err(_) => continue,
            }
        }
        Err(MountError::IllegalStateTransition {
            actual: self.load(),
            attempted: to,
        })
    }

    /// Unconditionally set the state, regardless of the current value.
    /// Used only for the `Destroying` sink transition, which is reachable
    /// from every non-terminal state per spec.md §4.1 `destroy`.
    pub fn force(&self, to: MountState) -> MountState {
        let prev = self.0.swap(to as u8, Ordering::SeqCst);
        MountState::from_u8(prev)
    }
}

impl Default for AtomicMountState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transition_succeeds() {
        let s = AtomicMountState::new();
        assert_eq!(
            s.transition(&[MountState::Uninitialized], MountState::Initializing)
                .unwrap(),
            MountState::Uninitialized
        );
        assert_eq!(s.load(), MountState::Initializing);
    }

    #[test]
    fn illegal_transition_fails_and_preserves_state() {
        let s = AtomicMountState::new();
        let err = s
            .transition(&[MountState::Running], MountState::Destroying)
            .unwrap_err();
        assert!(matches!(err, MountError::IllegalStateTransition { .. }));
        assert_eq!(s.load(), MountState::Uninitialized);
    }

    #[test]
    fn cannot_reach_running_without_starting() {
        let s = AtomicMountState::new();
        assert!(
            s.transition(&[MountState::Initialized], MountState::Running)
                .is_err()
        );
    }
}
