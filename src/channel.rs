//! `ChannelAttach` — attaches to the kernel filesystem driver and
//! handles cancellation and takeover (spec.md §4.4).

use std::path::{Path, PathBuf};

use crate::config::{MountConfig, MountProtocol};
use crate::error::{MountError, MountResult};
use crate::external::{ChannelOptions, PrivilegedHelper, RawFuseDevice, SerializedInodeMap};
use crate::handshake::MountingHandshake;

/// The attached channel, a tagged union dispatched by match throughout
/// (spec.md §9 "Variant channel handle").
pub enum ChannelHandle {
    /// No channel attached yet.
    None,
    /// Attached via FUSE.
    Fuse(RawFuseDevice),
    /// Attached via the NFS loopback driver.
    Nfs,
    /// Attached via a Windows projection driver.
    Projection,
}

impl ChannelHandle {
    /// Whether a channel is currently attached.
    pub fn is_attached(&self) -> bool {
        !matches!(self, ChannelHandle::None)
    }
}

/// Payload handed to a successor process during a graceful takeover
/// (spec.md §4.4 "Completion handling").
pub struct TakeoverPayload {
    /// Mount path being handed off.
    pub mount_path: PathBuf,
    /// Per-mount client directory.
    pub client_directory: PathBuf,
    /// Bind mounts active at handoff time (always empty; bind-mount
    /// bookkeeping lives with the overlay, out of scope here).
    pub bind_mounts: Vec<PathBuf>,
    /// The FUSE device, if the channel is FUSE and still valid.
    pub fuse_device: Option<RawFuseDevice>,
    /// Serialized inode map, filled in by `shutdown`.
    pub inode_map: SerializedInodeMap,
}

/// Drives the attach/detach protocol for one mount's channel.
pub struct ChannelAttach<'a> {
    helper: &'a dyn PrivilegedHelper,
    handshake: &'a MountingHandshake,
}

impl<'a> ChannelAttach<'a> {
    /// Build an attach helper against the given privileged helper and
    /// handshake.
    pub fn new(helper: &'a dyn PrivilegedHelper, handshake: &'a MountingHandshake) -> Self {
        ChannelAttach { helper, handshake }
    }

    /// Attach to the kernel filesystem driver per `config.mount_protocol`
    /// (spec.md §4.4). Dispatches to the FUSE, NFS, or projection
    /// sub-protocol; cancellation (an `unmount()` that raced ahead of
    /// attach completing) fails with `DeviceUnmountedDuringInitialization`.
    pub async fn attach(&self, config: &MountConfig, read_only: bool) -> MountResult<ChannelHandle> {
        let options = channel_options(config);
        match config.mount_protocol {
            MountProtocol::Fuse => self.attach_fuse(&config.mount_path, read_only, &options).await,
            MountProtocol::Nfs => self.attach_nfs(&config.mount_path, read_only, &options).await,
            MountProtocol::Projection => self.attach_projection().await,
        }
    }

    async fn attach_fuse(
        &self,
        mount_path: &Path,
        read_only: bool,
        options: &ChannelOptions,
    ) -> MountResult<ChannelHandle> {
        let (promise, _owns) = self.handshake.start_mount();

        let device = match self.helper.fuse_mount(mount_path, read_only, options).await {
            Ok(device) => device,
            Err(err) => {
                promise.fulfill(Err(std::sync::Arc::new(describe(&err))));
                return Err(err);
            }
        };

        if self.handshake.unmount_started() {
            let _ = self.helper.fuse_unmount(mount_path).await;
            promise.fulfill(Err(std::sync::Arc::new(MountError::DeviceUnmountedDuringInitialization)));
            return Err(MountError::DeviceUnmountedDuringInitialization);
        }

        promise.fulfill(Ok(()));
        Ok(ChannelHandle::Fuse(device))
    }

    async fn attach_nfs(
        &self,
        mount_path: &Path,
        read_only: bool,
        options: &ChannelOptions,
    ) -> MountResult<ChannelHandle> {
        let (promise, _owns) = self.handshake.start_mount();

        let mountd_addr: std::net::SocketAddr = "127.0.0.1:0".parse().expect("valid loopback address");
        let nfsd_addr: std::net::SocketAddr = "127.0.0.1:0".parse().expect("valid loopback address");
        let io_size = 64 * 1024;

        if let Err(err) = self
            .helper
            .nfs_mount(mount_path, mountd_addr, nfsd_addr, read_only, io_size, options)
            .await
        {
            promise.fulfill(Err(std::sync::Arc::new(describe(&err))));
            return Err(err);
        }

        if self.handshake.unmount_started() {
            let _ = self.helper.nfs_unmount(mount_path).await;
            promise.fulfill(Err(std::sync::Arc::new(MountError::DeviceUnmountedDuringInitialization)));
            return Err(MountError::DeviceUnmountedDuringInitialization);
        }

        promise.fulfill(Ok(()));
        Ok(ChannelHandle::Nfs)
    }

    async fn attach_projection(&self) -> MountResult<ChannelHandle> {
        let (promise, _owns) = self.handshake.start_mount();
        promise.fulfill(Ok(()));
        Ok(ChannelHandle::Projection)
    }

    /// Attach using a preserved FUSE device handle from a predecessor
    /// process, bypassing the normal attach protocol (spec.md §4.4
    /// "Takeover").
    pub async fn attach_takeover(&self, device: RawFuseDevice) -> MountResult<ChannelHandle> {
        let (promise, _owns) = self.handshake.start_mount();
        promise.fulfill(Ok(()));
        Ok(ChannelHandle::Fuse(device))
    }

    /// Detach the attached channel through the appropriate privileged
    /// helper call (spec.md §4.1 `unmount`).
    pub async fn detach(&self, handle: &ChannelHandle, mount_path: &Path) -> MountResult<()> {
        match handle {
            ChannelHandle::None | ChannelHandle::Projection => Ok(()),
            ChannelHandle::Fuse(_) => self.helper.fuse_unmount(mount_path).await,
            ChannelHandle::Nfs => self.helper.nfs_unmount(mount_path).await,
        }
    }

    /// Build the takeover payload for a completed channel, per spec.md
    /// §4.4's "Completion handling": the FUSE device if still valid, an
    /// empty handle otherwise; `inode_map` is filled in by the caller
    /// after `shutdown`.
    pub fn prepare_takeover_payload(
        &self,
        mount_path: &Path,
        client_directory: &Path,
        handle: ChannelHandle,
        inode_map: SerializedInodeMap,
    ) -> TakeoverPayload {
        let fuse_device = match handle {
            ChannelHandle::Fuse(device) => Some(device),
            _ => None,
        };
        TakeoverPayload {
            mount_path: mount_path.to_path_buf(),
            client_directory: client_directory.to_path_buf(),
            bind_mounts: Vec::new(),
            fuse_device,
            inode_map,
        }
    }
}

fn channel_options(config: &MountConfig) -> ChannelOptions {
    ChannelOptions {
        threads: config.channel_threads(),
        request_timeout: config.request_timeout(),
        max_in_flight_requests: config.max_in_flight_requests(),
        owner_uid: config.owner_uid,
        owner_gid: config.owner_gid,
        require_utf8: config.require_utf8,
    }
}

/// Re-describe an error for broadcast through a [`crate::handshake::Promise`],
/// which only needs waiters to observe success/failure, not the original
/// error's exact shape.
fn describe(err: &MountError) -> MountError {
    MountError::External(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::RootId;
    use crate::testing::MockPrivilegedHelper;

    fn config(protocol: MountProtocol) -> MountConfig {
        MountConfig::new(
            PathBuf::from("/mnt"),
            PathBuf::from("/client"),
            RootId::new(vec![0]),
            protocol,
            PathBuf::from("/client/socket"),
        )
    }

    #[tokio::test]
    async fn fuse_attach_succeeds_without_concurrent_unmount() {
        let helper = MockPrivilegedHelper::new();
        let handshake = MountingHandshake::new();
        let attach = ChannelAttach::new(&helper, &handshake);
        let handle = attach.attach(&config(MountProtocol::Fuse), false).await.unwrap();
        assert!(handle.is_attached());
        let (promise, _) = handshake.start_mount();
        assert!(promise.wait().await.is_ok());
    }

    #[tokio::test]
    async fn unmount_during_attach_fails_with_device_unmounted() {
        let helper = MockPrivilegedHelper::new();
        *helper.mount_delay.lock() = Some(std::time::Duration::from_millis(50));
        let handshake = MountingHandshake::new();
        let attach = ChannelAttach::new(&helper, &handshake);

        let attach_future = attach.attach(&config(MountProtocol::Fuse), false);
        let unmount_trigger = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            handshake.start_unmount();
        };

        let (result, ()) = tokio::join!(attach_future, unmount_trigger);
        let err = result.unwrap_err();
        assert!(matches!(err, MountError::DeviceUnmountedDuringInitialization));
    }

    #[tokio::test]
    async fn projection_attach_needs_no_helper_roundtrip() {
        let helper = MockPrivilegedHelper::new();
        let handshake = MountingHandshake::new();
        let attach = ChannelAttach::new(&helper, &handshake);
        let handle = attach
            .attach(&config(MountProtocol::Projection), false)
            .await
            .unwrap();
        assert!(matches!(handle, ChannelHandle::Projection));
    }
}
