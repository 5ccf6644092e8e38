//! Mount lifecycle and checkout engine for a source-control-backed
//! virtual filesystem.
//!
//! This crate owns the state machine, checkout/diff transaction logic,
//! and control-directory setup for one mount (spec.md §1-§5). It does
//! not implement an object store, overlay, inode map, journal,
//! kernel-channel driver, or privileged mount helper — those are
//! external collaborators specified as traits in [`external`] and
//! supplied by the embedding application.
//!
//! [`lifecycle::Mount`] is the entry point: construct one against a
//! [`config::MountConfig`] and a set of collaborators, then drive it
//! through `initialize` -> `start_channel` -> (`checkout`/`diff`/...) ->
//! `unmount` -> `shutdown`/`destroy`.

pub mod channel;
pub mod checkout;
pub mod config;
pub mod diff;
pub mod dir_ensure;
pub mod dot_eden;
pub mod error;
pub mod external;
pub mod handshake;
pub mod ids;
pub mod journal_diff;
pub mod lifecycle;
pub mod parent_commit;
pub mod state;
pub mod symlink;
pub mod tree;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::{ChannelAttach, ChannelHandle, TakeoverPayload};
pub use checkout::{CheckoutEngine, CheckoutOutcome, CheckoutTimes, Conflict, ConflictKind, LastCheckoutTime};
pub use config::{CheckoutMode, MountConfig, MountProtocol, OverlayType};
pub use diff::{DiffCallback, DiffContext, DiffEngine, IgnoreMatcher, NullIgnoreMatcher};
pub use dir_ensure::DirectoryEnsurer;
pub use dot_eden::{ControlSymlink, DotEdenSetup};
pub use error::{MountError, MountResult};
pub use external::{
    ChannelOptions, Clock, FaultInjector, FetchContext, FinishedCheckoutEvent, InodeMap, Journal,
    LogStructuredLogger, NoFaultInjector, NullProgressReporter, ObjectStore, Overlay,
    OverlayDirEntry, ParentMismatchEvent, PrivilegedHelper, ProgressReporter, RawFuseDevice,
    SerializedInodeMap, StructuredLogger, SystemClock, WorkingTree,
};
pub use handshake::{MountingHandshake, Promise, PromiseOutcome};
pub use ids::{InodeNumber, MountGeneration, RootId};
pub use journal_diff::JournalDiffCallback;
pub use lifecycle::Mount;
pub use parent_commit::ParentCommit;
pub use state::{AtomicMountState, MountState};
pub use symlink::{SymlinkResolver, MAX_SYMLINK_DEPTH};
pub use tree::{Tree, TreeEntry, TreeEntryType};
