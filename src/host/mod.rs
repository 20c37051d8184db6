//! Typed view of the machine's storage stack.
//!
//! Every guard in the engine asks a `StorageHost` a structured question
//! (does this PV exist? what signature does this device carry?) instead of
//! grepping tool output. Text and JSON parsing lives only in `LinuxHost`.
//!
//! - [`linux::LinuxHost`]: runs the real tools
//! - [`memory::MemoryHost`]: in-memory simulation with an action journal
//!   and failure injection

pub mod linux;
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::types::{Filesystem, LvSize};

pub use linux::LinuxHost;
pub use memory::{Action, MemoryHost};

const GIB: u64 = 1024 * 1024 * 1024;

/// Mountpoint lsblk reports for an active swap area
pub const SWAP_MOUNTPOINT: &str = "[SWAP]";

/// Kind of a block device as reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Disk,
    Partition,
    /// loop, rom, lvm, crypt, ...
    Other,
}

/// A partition (or other child device) beneath a disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub path: PathBuf,
    pub mountpoint: Option<PathBuf>,
}

/// A block device discovered on the host. Never created by vmstorage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub kind: DeviceKind,
    pub mountpoint: Option<PathBuf>,
    pub partitions: Vec<Partition>,
}

impl BlockDevice {
    /// A whole disk with no partitions
    pub fn disk(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            kind: DeviceKind::Disk,
            mountpoint: None,
            partitions: Vec::new(),
        }
    }

    /// Capacity rounded to the nearest whole GiB
    pub fn size_gib(&self) -> u64 {
        (self.size_bytes + GIB / 2) / GIB
    }

    pub fn is_disk(&self) -> bool {
        self.kind == DeviceKind::Disk
    }

    /// Everything mounted on or beneath this device, children first.
    /// Active swap areas are not mounts; see `swap_areas`.
    pub fn mounted_targets(&self) -> Vec<PathBuf> {
        self.holders()
            .filter(|(_, mp)| *mp != Path::new(SWAP_MOUNTPOINT))
            .map(|(_, mp)| mp.to_path_buf())
            .collect()
    }

    /// Devices on or beneath this one in use as swap
    pub fn swap_areas(&self) -> Vec<PathBuf> {
        self.holders()
            .filter(|(_, mp)| *mp == Path::new(SWAP_MOUNTPOINT))
            .map(|(dev, _)| dev.to_path_buf())
            .collect()
    }

    /// (device, mountpoint) for every child and then the device itself
    fn holders(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.partitions
            .iter()
            .filter_map(|p| p.mountpoint.as_deref().map(|mp| (p.path.as_path(), mp)))
            .chain(self.mountpoint.as_deref().map(|mp| (self.path.as_path(), mp)))
    }
}

/// Typed existence result for guard checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

impl Presence {
    pub fn is_present(self) -> bool {
        self == Self::Present
    }
}

impl From<bool> for Presence {
    fn from(present: bool) -> Self {
        if present { Self::Present } else { Self::Absent }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => f.write_str("present"),
            Self::Absent => f.write_str("absent"),
        }
    }
}

/// An LVM physical volume and the group it belongs to, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalVolume {
    pub device: PathBuf,
    pub volume_group: Option<String>,
}

/// What is mounted at a mountpoint relative to the device we expect there
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountState {
    NotMounted,
    /// The expected device is mounted there
    Mounted,
    /// Something else occupies the mountpoint
    MountedOther(PathBuf),
}

/// Structured access to the host's storage stack.
///
/// Queries take `&self` and never change state. Actions take `&mut self`
/// and are only called by the engine after a guard reported absence.
pub trait StorageHost {
    /// Block devices in stable kernel enumeration order
    fn block_devices(&self) -> Result<Vec<BlockDevice>>;

    fn device_exists(&self, device: &Path) -> bool;

    fn physical_volume(&self, device: &Path) -> Result<Option<PhysicalVolume>>;

    fn volume_group(&self, name: &str) -> Result<Presence>;

    fn logical_volume(&self, volume_group: &str, name: &str) -> Result<Presence>;

    /// Filesystem/volume signature type on a device (e.g. "ext4", "swap")
    fn signature(&self, device: &Path) -> Result<Option<String>>;

    fn mount_state(&self, device: &Path, mountpoint: &Path) -> Result<MountState>;

    /// Whether this specific device is an active swap area
    fn swap_active(&self, device: &Path) -> Result<bool>;

    fn unmount(&mut self, target: &Path) -> Result<()>;

    fn wipe_signatures(&mut self, device: &Path) -> Result<()>;

    fn zap_partition_table(&mut self, device: &Path) -> Result<()>;

    fn reread_partition_table(&mut self, device: &Path) -> Result<()>;

    fn create_physical_volume(&mut self, device: &Path) -> Result<()>;

    fn create_volume_group(&mut self, name: &str, members: &[PathBuf]) -> Result<()>;

    fn create_logical_volume(&mut self, volume_group: &str, name: &str, size: LvSize) -> Result<()>;

    fn make_filesystem(&mut self, device: &Path, filesystem: Filesystem) -> Result<()>;

    fn make_swap(&mut self, device: &Path) -> Result<()>;

    fn activate_swap(&mut self, device: &Path) -> Result<()>;

    fn deactivate_swap(&mut self, device: &Path) -> Result<()>;

    /// Create a directory and its parents; succeeds if it already exists
    fn ensure_directory(&mut self, path: &Path) -> Result<()>;

    fn mount(&mut self, device: &Path, mountpoint: &Path, fstype: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_gib_rounds_to_nearest() {
        assert_eq!(BlockDevice::disk("/dev/sdb", 5 * GIB).size_gib(), 5);
        assert_eq!(BlockDevice::disk("/dev/sdb", 5 * GIB - 4 * 1024 * 1024).size_gib(), 5);
        assert_eq!(BlockDevice::disk("/dev/sdb", 3 * GIB + GIB / 4).size_gib(), 3);
        assert_eq!(BlockDevice::disk("/dev/sdb", 5_000_000_000).size_gib(), 5);
    }

    #[test]
    fn test_mounted_targets_children_first() {
        let mut dev = BlockDevice::disk("/dev/sdb", GIB);
        dev.mountpoint = Some(PathBuf::from("/mnt/whole"));
        dev.partitions = vec![
            Partition {
                path: PathBuf::from("/dev/sdb1"),
                mountpoint: Some(PathBuf::from("/mnt/a")),
            },
            Partition {
                path: PathBuf::from("/dev/sdb2"),
                mountpoint: None,
            },
        ];
        assert_eq!(
            dev.mounted_targets(),
            vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/whole")]
        );
    }

    #[test]
    fn test_swap_partition_is_not_a_mount_target() {
        let mut dev = BlockDevice::disk("/dev/sdc", 3 * GIB);
        dev.partitions = vec![
            Partition {
                path: PathBuf::from("/dev/sdc1"),
                mountpoint: Some(PathBuf::from(SWAP_MOUNTPOINT)),
            },
            Partition {
                path: PathBuf::from("/dev/sdc2"),
                mountpoint: Some(PathBuf::from("/mnt/old")),
            },
        ];
        assert_eq!(dev.mounted_targets(), vec![PathBuf::from("/mnt/old")]);
        assert_eq!(dev.swap_areas(), vec![PathBuf::from("/dev/sdc1")]);
    }

    #[test]
    fn test_presence_from_bool() {
        assert!(Presence::from(true).is_present());
        assert_eq!(Presence::from(false), Presence::Absent);
        assert_eq!(Presence::Absent.to_string(), "absent");
    }
}
