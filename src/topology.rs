//! Declarative target topology
//!
//! disks → volume groups → logical volumes → filesystems → mountpoints.
//! All of it is static configuration built once at start; nothing here
//! touches the host.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::types::{DeviceRole, Filesystem, LvSize, VolumeUse};

/// A volume group and the device roles that make it up, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroupSpec {
    pub name: String,
    pub members: Vec<DeviceRole>,
}

/// A logical volume carved out of a volume group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolumeSpec {
    pub name: String,
    pub volume_group: String,
    pub size: LvSize,
    pub usage: VolumeUse,
}

impl LogicalVolumeSpec {
    /// Device node LVM exposes for this volume (`/dev/<vg>/<lv>`)
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from("/dev").join(&self.volume_group).join(&self.name)
    }

    /// `vg/lv` form used in logs and diagnostics
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.volume_group, self.name)
    }
}

/// How a logical volume is mounted and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Name of the logical volume this entry is for
    pub volume: String,
    /// Mount target; `None` for swap
    pub mountpoint: Option<PathBuf>,
    #[serde(default = "default_options")]
    pub options: String,
    #[serde(default)]
    pub dump: u8,
    #[serde(default)]
    pub pass: u8,
}

fn default_options() -> String {
    "defaults".to_string()
}

/// The full target topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub volume_groups: Vec<VolumeGroupSpec>,
    pub logical_volumes: Vec<LogicalVolumeSpec>,
    pub mounts: Vec<MountSpec>,
}

impl Default for Topology {
    /// `vg_datos` {5G, 3G} holds docker and work areas, `vg_temp` {2G, 1G} holds swap.
    fn default() -> Self {
        Self {
            volume_groups: vec![
                VolumeGroupSpec {
                    name: "vg_datos".to_string(),
                    members: vec![DeviceRole::Size5G, DeviceRole::Size3GPrimary],
                },
                VolumeGroupSpec {
                    name: "vg_temp".to_string(),
                    members: vec![DeviceRole::Size2G, DeviceRole::Size1G],
                },
            ],
            logical_volumes: vec![
                LogicalVolumeSpec {
                    name: "lv_docker".to_string(),
                    volume_group: "vg_datos".to_string(),
                    size: LvSize::Mebibytes(12),
                    usage: VolumeUse::Data(Filesystem::Ext4),
                },
                LogicalVolumeSpec {
                    name: "lv_workareas".to_string(),
                    volume_group: "vg_datos".to_string(),
                    size: LvSize::Mebibytes(2560),
                    usage: VolumeUse::Data(Filesystem::Ext4),
                },
                LogicalVolumeSpec {
                    name: "lv_swap".to_string(),
                    volume_group: "vg_temp".to_string(),
                    size: LvSize::Mebibytes(2560),
                    usage: VolumeUse::Swap,
                },
            ],
            mounts: vec![
                MountSpec {
                    volume: "lv_docker".to_string(),
                    mountpoint: Some(PathBuf::from("/var/lib/docker")),
                    options: default_options(),
                    dump: 0,
                    pass: 2,
                },
                MountSpec {
                    volume: "lv_workareas".to_string(),
                    mountpoint: Some(PathBuf::from("/work")),
                    options: default_options(),
                    dump: 0,
                    pass: 2,
                },
                MountSpec {
                    volume: "lv_swap".to_string(),
                    mountpoint: None,
                    options: "sw".to_string(),
                    dump: 0,
                    pass: 0,
                },
            ],
        }
    }
}

impl Topology {
    /// Every role the topology needs, in volume-group then member order.
    pub fn required_roles(&self) -> Vec<DeviceRole> {
        let mut seen = HashSet::new();
        self.volume_groups
            .iter()
            .flat_map(|vg| vg.members.iter().copied())
            .filter(|role| seen.insert(*role))
            .collect()
    }

    /// Volume group a role's device belongs to
    pub fn volume_group_for(&self, role: DeviceRole) -> Option<&VolumeGroupSpec> {
        self.volume_groups.iter().find(|vg| vg.members.contains(&role))
    }

    pub fn volume_group(&self, name: &str) -> Option<&VolumeGroupSpec> {
        self.volume_groups.iter().find(|vg| vg.name == name)
    }

    pub fn logical_volume(&self, name: &str) -> Option<&LogicalVolumeSpec> {
        self.logical_volumes.iter().find(|lv| lv.name == name)
    }

    /// Mount entries paired with the volume they belong to.
    ///
    /// Only meaningful on a validated topology; dangling entries are skipped.
    pub fn mounts_with_volumes(&self) -> impl Iterator<Item = (&MountSpec, &LogicalVolumeSpec)> {
        self.mounts
            .iter()
            .filter_map(|m| self.logical_volume(&m.volume).map(|lv| (m, lv)))
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Config` naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.volume_groups.is_empty() {
            return Err(ProvisionError::config("topology has no volume groups"));
        }

        let mut vg_names = HashSet::new();
        let mut roles = HashSet::new();
        for vg in &self.volume_groups {
            check_name("volume group", &vg.name)?;
            if !vg_names.insert(vg.name.as_str()) {
                return Err(ProvisionError::config(format!("duplicate volume group '{}'", vg.name)));
            }
            if vg.members.is_empty() {
                return Err(ProvisionError::config(format!(
                    "volume group '{}' has no members",
                    vg.name
                )));
            }
            for role in &vg.members {
                if !roles.insert(*role) {
                    return Err(ProvisionError::config(format!(
                        "device role {} is used more than once",
                        role
                    )));
                }
            }
        }

        let mut lv_names = HashSet::new();
        for lv in &self.logical_volumes {
            check_name("logical volume", &lv.name)?;
            if !lv_names.insert(lv.name.as_str()) {
                return Err(ProvisionError::config(format!(
                    "duplicate logical volume '{}'",
                    lv.name
                )));
            }
            if !vg_names.contains(lv.volume_group.as_str()) {
                return Err(ProvisionError::config(format!(
                    "logical volume '{}' names unknown volume group '{}'",
                    lv.name, lv.volume_group
                )));
            }
            match lv.size {
                LvSize::Mebibytes(0) => {
                    return Err(ProvisionError::config(format!(
                        "logical volume '{}' has zero size",
                        lv.name
                    )));
                }
                LvSize::FreePercent(pct) if pct == 0 || pct > 100 => {
                    return Err(ProvisionError::config(format!(
                        "logical volume '{}' requests {}% of free space",
                        lv.name, pct
                    )));
                }
                _ => {}
            }
        }

        let mut mountpoints = HashSet::new();
        let mut mounted = HashSet::new();
        for mount in &self.mounts {
            let lv = self.logical_volume(&mount.volume).ok_or_else(|| {
                ProvisionError::config(format!(
                    "mount entry names unknown logical volume '{}'",
                    mount.volume
                ))
            })?;
            if !mounted.insert(mount.volume.as_str()) {
                return Err(ProvisionError::config(format!(
                    "logical volume '{}' has two mount entries",
                    lv.name
                )));
            }
            match (&mount.mountpoint, lv.usage) {
                (None, VolumeUse::Data(_)) => {
                    return Err(ProvisionError::config(format!(
                        "data volume '{}' needs a mountpoint",
                        lv.name
                    )));
                }
                (Some(_), VolumeUse::Swap) => {
                    return Err(ProvisionError::config(format!(
                        "swap volume '{}' cannot have a mountpoint",
                        lv.name
                    )));
                }
                (Some(path), _) => check_mountpoint(path, &mut mountpoints)?,
                (None, VolumeUse::Swap) => {}
            }
        }

        Ok(())
    }
}

fn check_name(what: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::config(format!("invalid {} name '{}'", what, name)))
    }
}

fn check_mountpoint<'a>(path: &'a Path, seen: &mut HashSet<&'a Path>) -> Result<()> {
    if !path.is_absolute() {
        return Err(ProvisionError::config(format!(
            "mountpoint {} is not absolute",
            path.display()
        )));
    }
    if !seen.insert(path) {
        return Err(ProvisionError::config(format!("mountpoint {} is used twice", path.display())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology_is_valid() {
        Topology::default().validate().expect("default topology must validate");
    }

    #[test]
    fn test_default_topology_shape() {
        let topo = Topology::default();
        assert_eq!(
            topo.required_roles(),
            vec![
                DeviceRole::Size5G,
                DeviceRole::Size3GPrimary,
                DeviceRole::Size2G,
                DeviceRole::Size1G
            ]
        );
        let docker = topo.logical_volume("lv_docker").expect("lv_docker");
        assert_eq!(docker.device_path(), PathBuf::from("/dev/vg_datos/lv_docker"));
        assert_eq!(docker.size, LvSize::Mebibytes(12));
        assert_eq!(
            topo.volume_group_for(DeviceRole::Size1G).map(|vg| vg.name.as_str()),
            Some("vg_temp")
        );
        assert_eq!(topo.mounts_with_volumes().count(), 3);
    }

    #[test]
    fn test_unknown_volume_group_rejected() {
        let mut topo = Topology::default();
        topo.logical_volumes[0].volume_group = "vg_missing".to_string();
        let err = topo.validate().expect_err("should reject");
        assert!(err.to_string().contains("vg_missing"));
    }

    #[test]
    fn test_role_reuse_rejected() {
        let mut topo = Topology::default();
        topo.volume_groups[1].members.push(DeviceRole::Size5G);
        assert!(topo.validate().is_err());
    }

    #[test]
    fn test_swap_with_mountpoint_rejected() {
        let mut topo = Topology::default();
        topo.mounts[2].mountpoint = Some(PathBuf::from("/swap"));
        assert!(topo.validate().is_err());
    }

    #[test]
    fn test_relative_and_duplicate_mountpoints_rejected() {
        let mut topo = Topology::default();
        topo.mounts[1].mountpoint = Some(PathBuf::from("work"));
        assert!(topo.validate().is_err());

        let mut topo = Topology::default();
        topo.mounts[1].mountpoint = Some(PathBuf::from("/var/lib/docker"));
        assert!(topo.validate().is_err());
    }

    #[test]
    fn test_free_percent_bounds() {
        let mut topo = Topology::default();
        topo.logical_volumes[1].size = LvSize::FreePercent(100);
        assert!(topo.validate().is_ok());
        topo.logical_volumes[1].size = LvSize::FreePercent(101);
        assert!(topo.validate().is_err());
    }

    #[test]
    fn test_bad_names_rejected() {
        let mut topo = Topology::default();
        topo.volume_groups[0].name = "vg datos".to_string();
        assert!(topo.validate().is_err());
    }
}
