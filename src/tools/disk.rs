//! Type-safe arguments for block device tools.
//!
//! - `ListBlockDevicesArgs` for `lsblk` (JSON report, sizes in bytes)
//! - `UnmountArgs` for `umount`
//! - `WipeSignaturesArgs` for `wipefs`
//! - `ZapPartitionTableArgs` for `sgdisk --zap-all`
//! - `RereadPartitionsArgs` for `partprobe`

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;

/// Columns requested from lsblk; the parser in `host::linux` expects these.
pub const LSBLK_COLUMNS: &str = "NAME,PATH,SIZE,TYPE,MOUNTPOINT";

/// `lsblk --json --bytes --output NAME,PATH,SIZE,TYPE,MOUNTPOINT`
///
/// Partitions and device-mapper children are nested under their disk in
/// the `children` array, in kernel enumeration order.
#[derive(Debug, Clone, Default)]
pub struct ListBlockDevicesArgs;

impl ToolArgs for ListBlockDevicesArgs {
    fn program(&self) -> &'static str {
        "lsblk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--json".to_string(),
            "--bytes".to_string(),
            "--output".to_string(),
            LSBLK_COLUMNS.to_string(),
        ]
    }
}

/// `umount <target>`; the target may be a mountpoint or a device.
#[derive(Debug, Clone)]
pub struct UnmountArgs {
    pub target: PathBuf,
}

impl ToolArgs for UnmountArgs {
    fn program(&self) -> &'static str {
        "umount"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.target.display().to_string()]
    }
}

/// `wipefs --all --force <device>`
///
/// Erases every filesystem, RAID and LVM signature wipefs can find.
/// `--force` lets it proceed on a device the kernel still reports as busy.
#[derive(Debug, Clone)]
pub struct WipeSignaturesArgs {
    pub device: PathBuf,
}

impl ToolArgs for WipeSignaturesArgs {
    fn program(&self) -> &'static str {
        "wipefs"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--all".to_string(),
            "--force".to_string(),
            self.device.display().to_string(),
        ]
    }
}

/// `sgdisk --zap-all <device>`
///
/// Destroys both GPT headers and the protective/legacy MBR.
#[derive(Debug, Clone)]
pub struct ZapPartitionTableArgs {
    pub device: PathBuf,
}

impl ToolArgs for ZapPartitionTableArgs {
    fn program(&self) -> &'static str {
        "sgdisk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--zap-all".to_string(), self.device.display().to_string()]
    }
}

/// `partprobe <device>` asks the kernel to re-read the partition table.
#[derive(Debug, Clone)]
pub struct RereadPartitionsArgs {
    pub device: PathBuf,
}

impl ToolArgs for RereadPartitionsArgs {
    fn program(&self) -> &'static str {
        "partprobe"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.device.display().to_string()]
    }
}
