//! Type-safe arguments for LVM tools.
//!
//! Creation: `pvcreate`, `vgcreate`, `lvcreate`. Queries: `pvs`, `vgs`,
//! `lvs` in JSON report format, parsed by `host::linux`.

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;
use crate::types::LvSize;

/// `pvcreate [--force --yes] <device>`
///
/// `force` overwrites a stale signature the wipe may have missed.
/// `--yes` answers the confirmation prompt, since stdin is closed.
#[derive(Debug, Clone)]
pub struct PvCreateArgs {
    pub device: PathBuf,
    pub force: bool,
}

impl ToolArgs for PvCreateArgs {
    fn program(&self) -> &'static str {
        "pvcreate"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(3);
        if self.force {
            args.push("--force".to_string());
            args.push("--yes".to_string());
        }
        args.push(self.device.display().to_string());
        args
    }
}

/// `vgcreate <name> <pv>...`
#[derive(Debug, Clone)]
pub struct VgCreateArgs {
    pub name: String,
    pub members: Vec<PathBuf>,
}

impl ToolArgs for VgCreateArgs {
    fn program(&self) -> &'static str {
        "vgcreate"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![self.name.clone()];
        args.extend(self.members.iter().map(|p| p.display().to_string()));
        args
    }
}

/// `lvcreate --yes -n <name> (-L <n>M | -l <n>%FREE) <vg>`
///
/// `--yes` lets lvcreate wipe a signature left over from an earlier volume
/// at the same extents instead of prompting.
#[derive(Debug, Clone)]
pub struct LvCreateArgs {
    pub volume_group: String,
    pub name: String,
    pub size: LvSize,
}

impl ToolArgs for LvCreateArgs {
    fn program(&self) -> &'static str {
        "lvcreate"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let [flag, value] = self.size.to_lvcreate_args();
        vec![
            "--yes".to_string(),
            "-n".to_string(),
            self.name.clone(),
            flag,
            value,
            self.volume_group.clone(),
        ]
    }
}

/// Which LVM report to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LvmReport {
    PhysicalVolumes,
    VolumeGroups,
    LogicalVolumes,
}

/// `pvs|vgs|lvs --reportformat json -o <fields>`
#[derive(Debug, Clone, Copy)]
pub struct LvmReportArgs {
    pub report: LvmReport,
}

impl LvmReportArgs {
    pub fn new(report: LvmReport) -> Self {
        Self { report }
    }
}

impl ToolArgs for LvmReportArgs {
    fn program(&self) -> &'static str {
        match self.report {
            LvmReport::PhysicalVolumes => "pvs",
            LvmReport::VolumeGroups => "vgs",
            LvmReport::LogicalVolumes => "lvs",
        }
    }

    fn to_cli_args(&self) -> Vec<String> {
        let fields = match self.report {
            LvmReport::PhysicalVolumes => "pv_name,vg_name",
            LvmReport::VolumeGroups => "vg_name",
            LvmReport::LogicalVolumes => "lv_name,vg_name",
        };
        vec![
            "--reportformat".to_string(),
            "json".to_string(),
            "-o".to_string(),
            fields.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pvcreate_forced() {
        let args = PvCreateArgs {
            device: PathBuf::from("/dev/sdb"),
            force: true,
        };
        assert_eq!(args.to_cli_args(), vec!["--force", "--yes", "/dev/sdb"]);

        let args = PvCreateArgs {
            device: PathBuf::from("/dev/sdb"),
            force: false,
        };
        assert_eq!(args.to_cli_args(), vec!["/dev/sdb"]);
    }

    #[test]
    fn test_vgcreate_members_in_order() {
        let args = VgCreateArgs {
            name: "vg_datos".to_string(),
            members: vec![PathBuf::from("/dev/sdb"), PathBuf::from("/dev/sdc")],
        };
        assert_eq!(args.display_command(), "vgcreate vg_datos /dev/sdb /dev/sdc");
    }

    #[test]
    fn test_lvcreate_fixed_size() {
        let args = LvCreateArgs {
            volume_group: "vg_datos".to_string(),
            name: "lv_docker".to_string(),
            size: LvSize::Mebibytes(12),
        };
        assert_eq!(
            args.to_cli_args(),
            vec!["--yes", "-n", "lv_docker", "-L", "12M", "vg_datos"]
        );
    }

    #[test]
    fn test_lvcreate_free_percent() {
        let args = LvCreateArgs {
            volume_group: "vg_temp".to_string(),
            name: "lv_rest".to_string(),
            size: LvSize::FreePercent(100),
        };
        assert_eq!(args.display_command(), "lvcreate --yes -n lv_rest -l 100%FREE vg_temp");
    }

    #[test]
    fn test_report_programs() {
        assert_eq!(LvmReportArgs::new(LvmReport::PhysicalVolumes).program(), "pvs");
        assert_eq!(LvmReportArgs::new(LvmReport::VolumeGroups).program(), "vgs");
        assert_eq!(
            LvmReportArgs::new(LvmReport::LogicalVolumes).to_cli_args(),
            vec!["--reportformat", "json", "-o", "lv_name,vg_name"]
        );
    }
}
