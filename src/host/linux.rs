//! `StorageHost` backed by the real storage utilities.
//!
//! Queries use machine-readable output only: `lsblk --json`, LVM
//! `--reportformat json`, `blkid -o value`, `/proc/self/mounts` and
//! `/proc/swaps`. Device identity is compared after resolving symlinks, so
//! `/dev/vg/lv`, `/dev/mapper/vg-lv` and `/dev/dm-N` are the same volume.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{BlockDevice, DeviceKind, MountState, Partition, PhysicalVolume, Presence, StorageHost};
use crate::engine::fstab::unescape_octal;
use crate::tool_runner::{run_tool, run_tool_checked};
use crate::tools::disk::{
    ListBlockDevicesArgs, RereadPartitionsArgs, UnmountArgs, WipeSignaturesArgs,
    ZapPartitionTableArgs,
};
use crate::tools::fs::{
    BLKID_NOTHING_FOUND, MkfsArgs, MkswapArgs, MountArgs, ProbeSignatureArgs, SwapoffArgs,
    SwaponArgs,
};
use crate::tools::lvm::{LvCreateArgs, LvmReport, LvmReportArgs, PvCreateArgs, VgCreateArgs};
use crate::types::{Filesystem, LvSize};

/// Real host implementation
#[derive(Debug, Clone)]
pub struct LinuxHost {
    mounts_table: PathBuf,
    swaps_table: PathBuf,
}

impl Default for LinuxHost {
    fn default() -> Self {
        Self {
            mounts_table: PathBuf::from("/proc/self/mounts"),
            swaps_table: PathBuf::from("/proc/swaps"),
        }
    }
}

impl LinuxHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lvm_report(&self, report: LvmReport) -> Result<LvmReportSection> {
        let output = run_tool_checked(&LvmReportArgs::new(report))?;
        parse_lvm_report(&output.stdout)
    }
}

impl StorageHost for LinuxHost {
    fn block_devices(&self) -> Result<Vec<BlockDevice>> {
        let output = run_tool_checked(&ListBlockDevicesArgs)?;
        parse_lsblk(&output.stdout)
    }

    fn device_exists(&self, device: &Path) -> bool {
        device.exists()
    }

    fn physical_volume(&self, device: &Path) -> Result<Option<PhysicalVolume>> {
        let section = self.lvm_report(LvmReport::PhysicalVolumes)?;
        Ok(section
            .pv
            .into_iter()
            .find(|row| same_device(Path::new(&row.pv_name), device))
            .map(|row| PhysicalVolume {
                device: PathBuf::from(row.pv_name),
                volume_group: non_empty(row.vg_name),
            }))
    }

    fn volume_group(&self, name: &str) -> Result<Presence> {
        let section = self.lvm_report(LvmReport::VolumeGroups)?;
        Ok(section.vg.iter().any(|row| row.vg_name == name).into())
    }

    fn logical_volume(&self, volume_group: &str, name: &str) -> Result<Presence> {
        let section = self.lvm_report(LvmReport::LogicalVolumes)?;
        Ok(section
            .lv
            .iter()
            .any(|row| row.vg_name == volume_group && row.lv_name == name)
            .into())
    }

    fn signature(&self, device: &Path) -> Result<Option<String>> {
        let output = run_tool(&ProbeSignatureArgs {
            device: device.to_path_buf(),
        })?;
        if output.exit_code == Some(BLKID_NOTHING_FOUND) {
            return Ok(None);
        }
        output.ensure_success()?;
        Ok(non_empty(output.stdout.trim().to_string()))
    }

    fn mount_state(&self, device: &Path, mountpoint: &Path) -> Result<MountState> {
        let table = fs::read_to_string(&self.mounts_table)
            .with_context(|| format!("Failed to read {}", self.mounts_table.display()))?;
        // The last entry for a mountpoint is the one on top.
        let source = parse_proc_mounts(&table)
            .into_iter()
            .rev()
            .find(|(_, target)| target == mountpoint)
            .map(|(source, _)| source);
        Ok(match source {
            None => MountState::NotMounted,
            Some(source) if same_device(&source, device) => MountState::Mounted,
            Some(source) => MountState::MountedOther(source),
        })
    }

    fn swap_active(&self, device: &Path) -> Result<bool> {
        let table = fs::read_to_string(&self.swaps_table)
            .with_context(|| format!("Failed to read {}", self.swaps_table.display()))?;
        Ok(parse_proc_swaps(&table)
            .iter()
            .any(|area| same_device(area, device)))
    }

    fn unmount(&mut self, target: &Path) -> Result<()> {
        run_tool_checked(&UnmountArgs {
            target: target.to_path_buf(),
        })
        .map(drop)
    }

    fn wipe_signatures(&mut self, device: &Path) -> Result<()> {
        run_tool_checked(&WipeSignaturesArgs {
            device: device.to_path_buf(),
        })
        .map(drop)
    }

    fn zap_partition_table(&mut self, device: &Path) -> Result<()> {
        run_tool_checked(&ZapPartitionTableArgs {
            device: device.to_path_buf(),
        })
        .map(drop)
    }

    fn reread_partition_table(&mut self, device: &Path) -> Result<()> {
        run_tool_checked(&RereadPartitionsArgs {
            device: device.to_path_buf(),
        })
        .map(drop)
    }

    fn create_physical_volume(&mut self, device: &Path) -> Result<()> {
        run_tool_checked(&PvCreateArgs {
            device: device.to_path_buf(),
            force: true,
        })
        .map(drop)
    }

    fn create_volume_group(&mut self, name: &str, members: &[PathBuf]) -> Result<()> {
        run_tool_checked(&VgCreateArgs {
            name: name.to_string(),
            members: members.to_vec(),
        })
        .map(drop)
    }

    fn create_logical_volume(
        &mut self,
        volume_group: &str,
        name: &str,
        size: LvSize,
    ) -> Result<()> {
        run_tool_checked(&LvCreateArgs {
            volume_group: volume_group.to_string(),
            name: name.to_string(),
            size,
        })
        .map(drop)
    }

    fn make_filesystem(&mut self, device: &Path, filesystem: Filesystem) -> Result<()> {
        run_tool_checked(&MkfsArgs {
            device: device.to_path_buf(),
            filesystem,
        })
        .map(drop)
    }

    fn make_swap(&mut self, device: &Path) -> Result<()> {
        run_tool_checked(&MkswapArgs {
            device: device.to_path_buf(),
        })
        .map(drop)
    }

    fn activate_swap(&mut self, device: &Path) -> Result<()> {
        run_tool_checked(&SwaponArgs {
            device: device.to_path_buf(),
        })
        .map(drop)
    }

    fn deactivate_swap(&mut self, device: &Path) -> Result<()> {
        run_tool_checked(&SwapoffArgs {
            device: device.to_path_buf(),
        })
        .map(drop)
    }

    fn ensure_directory(&mut self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("Failed to create {}", path.display()))
    }

    fn mount(&mut self, device: &Path, mountpoint: &Path, fstype: &str) -> Result<()> {
        run_tool_checked(&MountArgs {
            device: device.to_path_buf(),
            mountpoint: mountpoint.to_path_buf(),
            fstype: fstype.to_string(),
        })
        .map(drop)
    }
}

/// Compare two device paths after resolving symlinks.
fn same_device(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

// ============================================================================
// lsblk
// ============================================================================

#[derive(Debug, Deserialize)]
struct LsblkReport {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

impl LsblkDevice {
    fn device_path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/dev").join(&self.name))
    }

    /// Flatten the child tree (partitions, and their LVM/crypt children)
    fn collect_children(&self, out: &mut Vec<Partition>) {
        for child in &self.children {
            out.push(Partition {
                path: child.device_path(),
                mountpoint: child.mountpoint.as_ref().map(PathBuf::from),
            });
            child.collect_children(out);
        }
    }
}

/// Parse `lsblk --json --bytes` output into top-level devices.
pub(crate) fn parse_lsblk(json: &str) -> Result<Vec<BlockDevice>> {
    let report: LsblkReport = serde_json::from_str(json).context("Failed to parse lsblk JSON")?;
    Ok(report
        .blockdevices
        .into_iter()
        .map(|dev| {
            let kind = match dev.kind.as_str() {
                "disk" => DeviceKind::Disk,
                "part" => DeviceKind::Partition,
                _ => DeviceKind::Other,
            };
            let mut partitions = Vec::new();
            dev.collect_children(&mut partitions);
            BlockDevice {
                path: dev.device_path(),
                size_bytes: dev.size.unwrap_or(0),
                kind,
                mountpoint: dev.mountpoint.as_ref().map(PathBuf::from),
                partitions,
            }
        })
        .collect())
}

// ============================================================================
// LVM reports
// ============================================================================

#[derive(Debug, Deserialize)]
struct LvmReportJson {
    report: Vec<LvmReportSection>,
}

#[derive(Debug, Default, Deserialize)]
struct LvmReportSection {
    #[serde(default)]
    pv: Vec<PvRow>,
    #[serde(default)]
    vg: Vec<VgRow>,
    #[serde(default)]
    lv: Vec<LvRow>,
}

#[derive(Debug, Deserialize)]
struct PvRow {
    pv_name: String,
    #[serde(default)]
    vg_name: String,
}

#[derive(Debug, Deserialize)]
struct VgRow {
    vg_name: String,
}

#[derive(Debug, Deserialize)]
struct LvRow {
    lv_name: String,
    vg_name: String,
}

/// Merge every section of an LVM JSON report.
fn parse_lvm_report(json: &str) -> Result<LvmReportSection> {
    let parsed: LvmReportJson =
        serde_json::from_str(json).context("Failed to parse LVM JSON report")?;
    let mut merged = LvmReportSection::default();
    for section in parsed.report {
        merged.pv.extend(section.pv);
        merged.vg.extend(section.vg);
        merged.lv.extend(section.lv);
    }
    Ok(merged)
}

// ============================================================================
// /proc tables
// ============================================================================

/// (source, mountpoint) pairs from `/proc/self/mounts`
pub(crate) fn parse_proc_mounts(table: &str) -> Vec<(PathBuf, PathBuf)> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            Some((
                PathBuf::from(unescape_octal(source)),
                PathBuf::from(unescape_octal(target)),
            ))
        })
        .collect()
}

/// Active swap areas from `/proc/swaps` (first line is a header)
pub(crate) fn parse_proc_swaps(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(|name| PathBuf::from(unescape_octal(name)))
        .collect()
}
