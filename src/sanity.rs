//! Pre-flight sanity checks for the runtime environment
//!
//! Verifies, before any stage runs, that:
//! - every storage tool the topology needs is on `PATH`
//! - vmstorage runs with root privileges (EUID 0)

use std::process::Command;

use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};
use crate::process_guard::CommandProcessGroup;
use crate::topology::Topology;
use crate::types::VolumeUse;

/// Environment variable that skips only the root check
pub const SKIP_ROOT_ENV: &str = "VMSTORAGE_SKIP_ROOT_CHECK";

/// Tools every run needs regardless of topology
const REQUIRED_BINARIES: &[&str] = &[
    "lsblk", "wipefs", "sgdisk", "partprobe", "blkid", "umount", "mount", "pvcreate", "vgcreate",
    "lvcreate", "pvs", "vgs", "lvs", "mkswap", "swapon", "swapoff",
];

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }

    /// Human-readable description of every failed check
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        if !self.is_root {
            lines.push("root privileges required (run with sudo or as root)".to_string());
        }
        for binary in &self.missing_binaries {
            lines.push(format!("missing {} (provided by {})", binary, package_for_binary(binary)));
        }
        lines.join("; ")
    }
}

/// Binaries needed for `topology`: the fixed set plus one mkfs per filesystem
pub fn required_binaries(topology: &Topology) -> Vec<&'static str> {
    let mut binaries = REQUIRED_BINARIES.to_vec();
    for lv in &topology.logical_volumes {
        if let VolumeUse::Data(fs) = lv.usage {
            let mkfs = fs.mkfs_program();
            if !binaries.contains(&mkfs) {
                binaries.push(mkfs);
            }
        }
    }
    binaries
}

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .in_new_process_group()
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Package that ships a binary
fn package_for_binary(binary: &str) -> &'static str {
    match binary {
        "lsblk" | "wipefs" | "blkid" | "mount" | "umount" | "mkswap" | "swapon" | "swapoff" => {
            "util-linux"
        }
        "sgdisk" => "gdisk",
        "partprobe" => "parted",
        "pvcreate" | "vgcreate" | "lvcreate" | "pvs" | "vgs" | "lvs" => "lvm2",
        "mkfs.ext4" => "e2fsprogs",
        "mkfs.xfs" => "xfsprogs",
        "mkfs.btrfs" => "btrfs-progs",
        _ => "unknown",
    }
}

pub fn verify_environment(topology: &Topology) -> SanityCheckResult {
    let missing_binaries = required_binaries(topology)
        .into_iter()
        .filter(|b| !binary_exists(b))
        .map(str::to_string)
        .collect();
    SanityCheckResult {
        missing_binaries,
        is_root: is_running_as_root(),
    }
}

pub fn should_skip_root_check() -> bool {
    std::env::var(SKIP_ROOT_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Verify the environment for `topology`.
///
/// # Errors
///
/// `ProvisionError::Preflight` describing every failed check.
pub fn run_preflight_checks(topology: &Topology) -> Result<()> {
    debug!("Running pre-flight sanity checks");
    let mut result = verify_environment(topology);

    if should_skip_root_check() {
        warn!("Root check skipped ({}=1)", SKIP_ROOT_ENV);
        result.is_root = true;
    }

    if !result.is_ok() {
        return Err(ProvisionError::Preflight(result.describe()));
    }
    info!("Pre-flight checks passed");
    Ok(())
}
