//! Identifiers used throughout the mount core: inode numbers, opaque
//! source-control root ids, and the per-instance mount generation.

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque source-control root identifier (a tree hash). The core never
/// interprets its bytes; it only compares, clones, and stores it.
#[derive(Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct RootId(Vec<u8>);

impl RootId {
    /// Build a root id from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        RootId(bytes.into())
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootId(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

impl AsRef<[u8]> for RootId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for RootId {
    fn from(bytes: Vec<u8>) -> Self {
        RootId(bytes)
    }
}

/// Inode number, unique within a single mount for the lifetime of the
/// inode. `ROOT` is reserved for the mount's root directory, matching the
/// kernel-channel convention that inode 1 is the filesystem root.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct InodeNumber(pub u64);

impl InodeNumber {
    /// The mount's root directory inode.
    pub const ROOT: InodeNumber = InodeNumber(1);
}

impl fmt::Debug for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InodeNumber({:#x})", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A 64-bit value unique to this mount instance within a (pid, boot
/// epoch) pair: `(pid << 48) | (boot_epoch << 16) | counter`, with
/// `counter` a 16-bit per-process monotonic value. See spec.md §3.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct MountGeneration(u64);

impl MountGeneration {
    /// Raw packed value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for MountGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MountGeneration({:#018x})", self.0)
    }
}

static GENERATION_COUNTER: AtomicU16 = AtomicU16::new(0);
static BOOT_EPOCH: AtomicU64 = AtomicU64::new(0);

/// Seconds since `UNIX_EPOCH` the first time this process asked for a
/// mount generation. Standing in for a true boot-time source (reading
/// `/proc/stat` or similar is a platform detail the core has no business
/// owning); what matters per spec.md §3 is that the value differs across
/// process restarts, which this satisfies.
fn boot_epoch() -> u64 {
    let existing = BOOT_EPOCH.load(Ordering::Relaxed);
    if existing != 0 {
        return existing;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    match BOOT_EPOCH.compare_exchange(0, now, Ordering::Relaxed, Ordering::Relaxed) {
        Ok(_) => now,
        Err(winner) => winner,
    }
}

/// Allocate the next mount generation for this process. Global mutable
/// state is limited to this one counter, per spec.md §9.
pub fn next_mount_generation() -> MountGeneration {
    let pid = u64::from(std::process::id());
    let epoch = boot_epoch() & 0xFFFF_FFFF;
    let counter = GENERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    MountGeneration((pid << 48) | (epoch << 16) | u64::from(counter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_differ_across_calls() {
        let a = next_mount_generation();
        let b = next_mount_generation();
        assert_ne!(a, b);
    }

    #[test]
    fn root_id_debug_is_hex() {
        let id = RootId::new(vec![0xab, 0xcd]);
        assert_eq!(format!("{id:?}"), "RootId(abcd)");
    }
}
