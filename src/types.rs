//! Type-safe storage vocabulary for vmstorage
//!
//! Roles, filesystems and sizes are enums rather than strings so that the
//! topology is checked at compile time and matched exhaustively.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Logical role a raw disk plays in the topology.
///
/// Roles are declared in classification priority order: when two roles
/// expect the same capacity, the earlier one is filled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum DeviceRole {
    #[strum(serialize = "5G")]
    #[serde(rename = "5G")]
    Size5G,
    #[strum(serialize = "3G-primary")]
    #[serde(rename = "3G-primary")]
    Size3GPrimary,
    #[strum(serialize = "2G")]
    #[serde(rename = "2G")]
    Size2G,
    #[strum(serialize = "1G")]
    #[serde(rename = "1G")]
    Size1G,
}

impl DeviceRole {
    /// Capacity in whole GB a device must report to fill this role
    pub const fn expected_gib(self) -> u64 {
        match self {
            Self::Size5G => 5,
            Self::Size3GPrimary => 3,
            Self::Size2G => 2,
            Self::Size1G => 1,
        }
    }
}

/// Filesystem written onto a data logical volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Filesystem {
    #[default]
    Ext4,
    Xfs,
    Btrfs,
}

impl Filesystem {
    /// mkfs binary for this filesystem
    pub const fn mkfs_program(self) -> &'static str {
        match self {
            Self::Ext4 => "mkfs.ext4",
            Self::Xfs => "mkfs.xfs",
            Self::Btrfs => "mkfs.btrfs",
        }
    }

    /// Flag that makes mkfs overwrite an existing signature without asking
    pub const fn force_flag(self) -> &'static str {
        match self {
            Self::Ext4 => "-F",
            Self::Xfs | Self::Btrfs => "-f",
        }
    }

    /// TYPE value blkid reports for a volume carrying this filesystem
    pub const fn signature(self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
        }
    }
}

/// Signature blkid reports for a formatted swap area
pub const SWAP_SIGNATURE: &str = "swap";

/// Signature blkid reports for an LVM physical volume
pub const LVM_SIGNATURE: &str = "LVM2_member";

/// What a logical volume is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "filesystem")]
pub enum VolumeUse {
    /// Filesystem-backed data volume
    Data(Filesystem),
    /// Swap area
    Swap,
}

impl VolumeUse {
    /// fstab type column for this use
    pub fn fstype(self) -> &'static str {
        match self {
            Self::Data(fs) => fs.signature(),
            Self::Swap => SWAP_SIGNATURE,
        }
    }

    /// Returns true for swap volumes
    pub fn is_swap(self) -> bool {
        matches!(self, Self::Swap)
    }
}

/// Requested logical volume size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LvSize {
    /// Fixed size in MiB (`lvcreate -L <n>M`)
    Mebibytes(u64),
    /// Percentage of the group's remaining free space (`lvcreate -l <n>%FREE`)
    FreePercent(u8),
}

impl LvSize {
    /// lvcreate flag and value for this size
    pub fn to_lvcreate_args(self) -> [String; 2] {
        match self {
            Self::Mebibytes(mib) => ["-L".to_string(), format!("{}M", mib)],
            Self::FreePercent(pct) => ["-l".to_string(), format!("{}%FREE", pct)],
        }
    }
}

impl std::fmt::Display for LvSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mebibytes(mib) if mib % 1024 == 0 => write!(f, "{}GiB", mib / 1024),
            Self::Mebibytes(mib) if mib % 512 == 0 && *mib > 1024 => {
                write!(f, "{}.5GiB", mib / 1024)
            }
            Self::Mebibytes(mib) => write!(f, "{}MiB", mib),
            Self::FreePercent(pct) => write!(f, "{}% of free space", pct),
        }
    }
}
