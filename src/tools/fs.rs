//! Type-safe arguments for filesystem, swap and mount tools.

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;
use crate::types::Filesystem;

/// `mkfs.<fs> <force-flag> <device>`
#[derive(Debug, Clone)]
pub struct MkfsArgs {
    pub device: PathBuf,
    pub filesystem: Filesystem,
}

impl ToolArgs for MkfsArgs {
    fn program(&self) -> &'static str {
        self.filesystem.mkfs_program()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            self.filesystem.force_flag().to_string(),
            self.device.display().to_string(),
        ]
    }
}

/// `mkswap <device>`
#[derive(Debug, Clone)]
pub struct MkswapArgs {
    pub device: PathBuf,
}

impl ToolArgs for MkswapArgs {
    fn program(&self) -> &'static str {
        "mkswap"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.device.display().to_string()]
    }
}

/// `swapon <device>`
#[derive(Debug, Clone)]
pub struct SwaponArgs {
    pub device: PathBuf,
}

impl ToolArgs for SwaponArgs {
    fn program(&self) -> &'static str {
        "swapon"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.device.display().to_string()]
    }
}

/// `swapoff <device>`
#[derive(Debug, Clone)]
pub struct SwapoffArgs {
    pub device: PathBuf,
}

impl ToolArgs for SwapoffArgs {
    fn program(&self) -> &'static str {
        "swapoff"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.device.display().to_string()]
    }
}

/// `mount -t <fstype> <device> <mountpoint>`
#[derive(Debug, Clone)]
pub struct MountArgs {
    pub device: PathBuf,
    pub mountpoint: PathBuf,
    pub fstype: String,
}

impl ToolArgs for MountArgs {
    fn program(&self) -> &'static str {
        "mount"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-t".to_string(),
            self.fstype.clone(),
            self.device.display().to_string(),
            self.mountpoint.display().to_string(),
        ]
    }
}

/// `blkid -p -o value -s TYPE <device>`
///
/// Low-level probe (`-p`) bypasses the blkid cache, so a signature written
/// moments ago is seen. Exit code 2 means no signature was found.
#[derive(Debug, Clone)]
pub struct ProbeSignatureArgs {
    pub device: PathBuf,
}

/// blkid exit code when the probe found nothing
pub const BLKID_NOTHING_FOUND: i32 = 2;

impl ToolArgs for ProbeSignatureArgs {
    fn program(&self) -> &'static str {
        "blkid"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-p".to_string(),
            "-o".to_string(),
            "value".to_string(),
            "-s".to_string(),
            "TYPE".to_string(),
            self.device.display().to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkfs_ext4_forced() {
        let args = MkfsArgs {
            device: PathBuf::from("/dev/vg_datos/lv_docker"),
            filesystem: Filesystem::Ext4,
        };
        assert_eq!(args.program(), "mkfs.ext4");
        assert_eq!(args.to_cli_args(), vec!["-F", "/dev/vg_datos/lv_docker"]);
    }

    #[test]
    fn test_mkfs_xfs_uses_lowercase_force() {
        let args = MkfsArgs {
            device: PathBuf::from("/dev/vg/lv"),
            filesystem: Filesystem::Xfs,
        };
        assert_eq!(args.display_command(), "mkfs.xfs -f /dev/vg/lv");
    }

    #[test]
    fn test_mount_args_order() {
        let args = MountArgs {
            device: PathBuf::from("/dev/vg_datos/lv_workareas"),
            mountpoint: PathBuf::from("/work"),
            fstype: "ext4".to_string(),
        };
        assert_eq!(
            args.to_cli_args(),
            vec!["-t", "ext4", "/dev/vg_datos/lv_workareas", "/work"]
        );
    }

    #[test]
    fn test_swap_tools() {
        let device = PathBuf::from("/dev/vg_temp/lv_swap");
        assert_eq!(
            MkswapArgs { device: device.clone() }.display_command(),
            "mkswap /dev/vg_temp/lv_swap"
        );
        assert_eq!(SwaponArgs { device }.display_command(), "swapon /dev/vg_temp/lv_swap");
    }

    #[test]
    fn test_blkid_probe() {
        let args = ProbeSignatureArgs {
            device: PathBuf::from("/dev/sdb"),
        };
        assert_eq!(args.display_command(), "blkid -p -o value -s TYPE /dev/sdb");
    }
}
