//! Error taxonomy for the mount core.
//!
//! Follows spec.md §7's split into invariant-violation, transient-conflict,
//! domain-error, external-failure and setup-best-effort classes. Unlike the
//! teacher, which hands `libc::c_int` errno values across the kernel
//! boundary, this crate's public boundary is Rust-to-Rust, so errors are a
//! typed enum; domain errors still carry the POSIX errno a caller would
//! need to relay to a kernel-channel driver.

use std::fmt;

use crate::ids::RootId;
use crate::state::MountState;

/// Result type used throughout the mount core.
pub type MountResult<T> = Result<T, MountError>;

/// Errors surfaced across the core's public boundary (spec.md §6, §7).
#[derive(Debug)]
pub enum MountError {
    /// Another checkout already holds the parent-commit writer lock.
    CheckoutInProgress,
    /// A parent-enforcing diff observed a different parent than expected.
    OutOfDateParent {
        /// Root id the caller believed to be current.
        expected: RootId,
        /// Root id actually current.
        actual: RootId,
    },
    /// Symlink resolution exceeded the maximum chain depth.
    Loop,
    /// A path component exists but is not a directory.
    NotADirectory,
    /// A path component already exists where a fresh entry was expected.
    AlreadyExists,
    /// No entry exists at the requested path or inode.
    NotFound,
    /// Unmount completed while a channel attach was still outstanding.
    DeviceUnmountedDuringInitialization,
    /// The in-flight operation was cancelled by a concurrent unmount.
    MountCancelled,
    /// A caller (or the implementation) attempted an illegal state
    /// transition. This is an invariant violation: a programmer error.
    IllegalStateTransition {
        /// The state the mount was actually in.
        actual: MountState,
        /// The transition that was attempted.
        attempted: MountState,
    },
    /// A fault-injection gate refused to let the operation proceed.
    FaultInjected(String),
    /// Failure from an external collaborator (object store, overlay,
    /// privileged helper, ...), propagated unchanged.
    External(String),
    /// Wrapped I/O error.
    Io(std::io::Error),
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountError::CheckoutInProgress => write!(f, "a checkout is already in progress"),
            MountError::OutOfDateParent { expected, actual } => write!(
                f,
                "parent commit is out of date: expected {expected:?}, actual {actual:?}"
            ),
            MountError::Loop => write!(f, "too many levels of symbolic links"),
            MountError::NotADirectory => write!(f, "not a directory"),
            MountError::AlreadyExists => write!(f, "file exists"),
            MountError::NotFound => write!(f, "no such file or directory"),
            MountError::DeviceUnmountedDuringInitialization => {
                write!(f, "device was unmounted during initialization")
            }
            MountError::MountCancelled => write!(f, "operation cancelled by concurrent unmount"),
            MountError::IllegalStateTransition { actual, attempted } => write!(
                f,
                "illegal mount state transition: attempted {attempted:?} from {actual:?}"
            ),
            MountError::FaultInjected(gate) => write!(f, "fault injected at gate {gate:?}"),
            MountError::External(msg) => write!(f, "external collaborator failed: {msg}"),
            MountError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for MountError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MountError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MountError {
    fn from(err: std::io::Error) -> Self {
        MountError::Io(err)
    }
}

impl From<nix::errno::Errno> for MountError {
    fn from(errno: nix::errno::Errno) -> Self {
        match errno {
            nix::errno::Errno::ENOENT => MountError::NotFound,
            nix::errno::Errno::EEXIST => MountError::AlreadyExists,
            nix::errno::Errno::ENOTDIR => MountError::NotADirectory,
            nix::errno::Errno::ELOOP => MountError::Loop,
            other => MountError::Io(std::io::Error::from_raw_os_error(other as i32)),
        }
    }
}

impl MountError {
    /// The POSIX errno a kernel-channel driver would relay for this
    /// error, when one applies.
    pub fn errno(&self) -> Option<nix::errno::Errno> {
        match self {
            MountError::NotFound => Some(nix::errno::Errno::ENOENT),
            MountError::AlreadyExists => Some(nix::errno::Errno::EEXIST),
            MountError::NotADirectory => Some(nix::errno::Errno::ENOTDIR),
            MountError::Loop => Some(nix::errno::Errno::ELOOP),
            MountError::Io(err) => err.raw_os_error().map(nix::errno::Errno::from_raw),
            _ => None,
        }
    }
}
