//! Mount configuration shape.
//!
//! Mirrors the teacher's `KernelConfig` (`src/lib.rs`) and
//! `mnt::mount_options::MountOption`: a plain data struct with a handful
//! of fallible, clamped setters, populated by the caller. Reading this
//! configuration from disk or environment is an external concern (see
//! spec.md §1) and out of scope here.

use std::path::PathBuf;
use std::time::Duration;

use crate::ids::RootId;

/// Which kernel-channel protocol a mount should attach through.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum MountProtocol {
    /// FUSE, on Linux or directly on macOS.
    Fuse,
    /// NFS loopback, used on macOS.
    Nfs,
    /// A projection driver, used on Windows.
    Projection,
}

/// How the overlay persists local modifications. The overlay's on-disk
/// format is out of scope (spec.md §1 Non-goals); this flag only affects
/// whether [`crate::external::Overlay::persisted_root_dir`] is consulted
/// during `initialize`.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum OverlayType {
    /// The overlay keeps no state across mounts.
    InMemory,
    /// The overlay persists its directory structure across mounts.
    OnDisk,
}

/// Checkout transaction mode (spec.md §3 Checkout context).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum CheckoutMode {
    /// Compute conflicts without mutating anything.
    DryRun,
    /// Normal checkout: conflicts abort the apply phase.
    Normal,
    /// Force checkout: conflicts are overridden.
    Force,
}

/// Immutable checkout configuration for one mount (spec.md §3 `Mount`).
#[derive(Clone, Debug)]
pub struct MountConfig {
    /// Absolute path the filesystem is mounted at.
    pub mount_path: PathBuf,
    /// Per-mount client (state) directory.
    pub client_directory: PathBuf,
    /// Whether path lookups are case-sensitive.
    pub case_sensitive: bool,
    /// Whether all paths must be valid UTF-8.
    pub require_utf8: bool,
    /// How the overlay persists local modifications.
    pub overlay_type: OverlayType,
    /// Which kernel-channel protocol to attach through.
    pub mount_protocol: MountProtocol,
    /// Root id to check out at `initialize` time.
    pub configured_parent: RootId,
    /// Owning uid for files reported through the channel.
    pub owner_uid: u32,
    /// Owning gid for files reported through the channel.
    pub owner_gid: u32,
    /// Number of worker threads/tasks dispatching channel requests.
    channel_threads: usize,
    /// Per-request timeout enforced on the kernel-channel driver.
    request_timeout: Duration,
    /// Max requests the channel may have in flight at once.
    max_in_flight_requests: u32,
    /// Server unix-domain socket path, recorded in `.eden/socket`.
    pub server_socket_path: PathBuf,
}

impl MountConfig {
    /// Build a configuration with conservative defaults for the tunables.
    pub fn new(
        mount_path: PathBuf,
        client_directory: PathBuf,
        configured_parent: RootId,
        mount_protocol: MountProtocol,
        server_socket_path: PathBuf,
    ) -> Self {
        MountConfig {
            mount_path,
            client_directory,
            case_sensitive: cfg!(target_os = "linux"),
            require_utf8: false,
            overlay_type: OverlayType::OnDisk,
            mount_protocol,
            configured_parent,
            owner_uid: nix::unistd::getuid().as_raw(),
            owner_gid: nix::unistd::getgid().as_raw(),
            channel_threads: 4,
            request_timeout: Duration::from_secs(60),
            max_in_flight_requests: 128,
            server_socket_path,
        }
    }

    /// Current channel worker count.
    pub fn channel_threads(&self) -> usize {
        self.channel_threads
    }

    /// Set the channel worker count.
    ///
    /// # Errors
    /// If `value` is zero, returns the previous value (1 is the minimum).
    pub fn set_channel_threads(&mut self, value: usize) -> Result<usize, usize> {
        if value == 0 {
            return Err(self.channel_threads);
        }
        let previous = self.channel_threads;
        self.channel_threads = value;
        Ok(previous)
    }

    /// Current per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Set the per-request timeout.
    ///
    /// # Errors
    /// If `value` is zero, returns the previous value.
    pub fn set_request_timeout(&mut self, value: Duration) -> Result<Duration, Duration> {
        if value.is_zero() {
            return Err(self.request_timeout);
        }
        let previous = self.request_timeout;
        self.request_timeout = value;
        Ok(previous)
    }

    /// Current max in-flight request count.
    pub fn max_in_flight_requests(&self) -> u32 {
        self.max_in_flight_requests
    }

    /// Set the max in-flight request count.
    ///
    /// # Errors
    /// If `value` is zero, returns the previous value.
    pub fn set_max_in_flight_requests(&mut self, value: u32) -> Result<u32, u32> {
        if value == 0 {
            return Err(self.max_in_flight_requests);
        }
        let previous = self.max_in_flight_requests;
        self.max_in_flight_requests = value;
        Ok(previous)
    }
}
