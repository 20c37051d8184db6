//! Final chain check: device → PV → VG → LV → filesystem → mount → mount table.

use tracing::{debug, info, warn};

use crate::engine::classifier::Classification;
use crate::engine::fstab::{MountTable, entries_for, missing_entries};
use crate::error::{Issue, IssueKind, ProvisionError, Result};
use crate::host::{MountState, StorageHost};
use crate::topology::Topology;
use crate::types::VolumeUse;

/// Verify every link of the storage chain against live state.
///
/// An inactive swap area is returned as an issue; any other gap is an error.
///
/// # Errors
///
/// `ProvisionError::ChainBroken` naming the first missing link,
/// `ProvisionError::Query` if state cannot be read, or
/// `ProvisionError::MountTable` if the table cannot be read.
pub fn verify_chain<H: StorageHost + ?Sized>(
    host: &H,
    topology: &Topology,
    classification: &Classification,
    table: &MountTable,
) -> Result<Vec<Issue>> {
    let mut issues = Vec::new();

    for vg in &topology.volume_groups {
        for role in &vg.members {
            let device = classification
                .path(*role)
                .ok_or_else(|| {
                    ProvisionError::chain(format!("no device classified for role {}", role))
                })?;
            let pv = host.physical_volume(device).map_err(|e| {
                ProvisionError::query(format!("physical volume {}", device.display()), e)
            })?;
            match pv.and_then(|pv| pv.volume_group) {
                Some(name) if name == vg.name => {
                    debug!("{} -> {} ok", device.display(), vg.name);
                }
                Some(name) => {
                    return Err(ProvisionError::chain(format!(
                        "{} belongs to volume group {}, expected {}",
                        device.display(),
                        name,
                        vg.name
                    )));
                }
                None => {
                    return Err(ProvisionError::chain(format!(
                        "{} is not a physical volume of {}",
                        device.display(),
                        vg.name
                    )));
                }
            }
        }
        let present = host
            .volume_group(&vg.name)
            .map_err(|e| ProvisionError::query(format!("volume group {}", vg.name), e))?;
        if !present.is_present() {
            return Err(ProvisionError::chain(format!("volume group {} is missing", vg.name)));
        }
    }

    for lv in &topology.logical_volumes {
        let present = host
            .logical_volume(&lv.volume_group, &lv.name)
            .map_err(|e| {
                ProvisionError::query(format!("logical volume {}", lv.qualified_name()), e)
            })?;
        if !present.is_present() {
            return Err(ProvisionError::chain(format!(
                "logical volume {} is missing",
                lv.qualified_name()
            )));
        }

        let device = lv.device_path();
        let signature = host
            .signature(&device)
            .map_err(|e| ProvisionError::query(format!("signature of {}", device.display()), e))?;
        if signature.as_deref() != Some(lv.usage.fstype()) {
            return Err(ProvisionError::chain(format!(
                "{} carries {:?}, expected {}",
                device.display(),
                signature,
                lv.usage.fstype()
            )));
        }
    }

    for (mount, lv) in topology.mounts_with_volumes() {
        let device = lv.device_path();
        match (lv.usage, &mount.mountpoint) {
            (VolumeUse::Swap, _) => {
                let active = host.swap_active(&device).map_err(|e| {
                    ProvisionError::query(format!("swap state of {}", device.display()), e)
                })?;
                if !active {
                    warn!("Swap on {} is not active", device.display());
                    issues.push(Issue::new(
                        IssueKind::SwapInactive,
                        device.display(),
                        "swap area not active",
                    ));
                }
            }
            (VolumeUse::Data(_), Some(mountpoint)) => {
                let state = host.mount_state(&device, mountpoint).map_err(|e| {
                    ProvisionError::query(format!("mount state of {}", mountpoint.display()), e)
                })?;
                if state != MountState::Mounted {
                    return Err(ProvisionError::chain(format!(
                        "{} is not mounted at {}",
                        device.display(),
                        mountpoint.display()
                    )));
                }
            }
            (VolumeUse::Data(_), None) => {
                return Err(ProvisionError::chain(format!(
                    "{} has no mountpoint",
                    lv.qualified_name()
                )));
            }
        }
    }

    if let Some(entry) = missing_entries(table, &entries_for(topology))?.first() {
        return Err(ProvisionError::chain(format!(
            "{} has no entry for {}",
            table.path().display(),
            entry.device
        )));
    }

    info!("Storage chain verified");
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::classifier::classify_for;
    use crate::engine::fstab::ensure_persisted;
    use crate::engine::mount::{ensure_mounted, ensure_swap_active};
    use crate::engine::reconciler::Reconciler;
    use crate::host::{Action, MemoryHost};
    use chrono::NaiveDate;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Provisioned {
        host: MemoryHost,
        topology: Topology,
        classification: Classification,
        table: MountTable,
        _dir: TempDir,
    }

    impl Provisioned {
        fn verify(&self) -> Result<Vec<Issue>> {
            verify_chain(&self.host, &self.topology, &self.classification, &self.table)
        }
    }

    /// Reconciled and persisted, but nothing mounted yet
    fn provisioned() -> Provisioned {
        let mut host = MemoryHost::with_disks(&[
            ("/dev/sdb", 5),
            ("/dev/sdc", 3),
            ("/dev/sdd", 2),
            ("/dev/sde", 1),
        ]);
        let topology = Topology::default();
        let devices = host.block_devices().expect("list");
        let classification = classify_for(&devices, &topology).expect("classify");
        Reconciler::new(&topology, &classification).apply(&mut host).expect("apply");

        let dir = TempDir::new().expect("tempdir");
        let table = MountTable::new(dir.path().join("fstab"));
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date");
        ensure_persisted(&table, &entries_for(&topology), date).expect("persist");

        Provisioned {
            host,
            topology,
            classification,
            table,
            _dir: dir,
        }
    }

    fn mount_all(host: &mut MemoryHost, topology: &Topology) {
        for (mount, lv) in topology.mounts_with_volumes() {
            match &mount.mountpoint {
                Some(mp) => {
                    ensure_mounted(host, &lv.device_path(), mp, lv.usage.fstype()).expect("mount");
                }
                None => {
                    ensure_swap_active(host, &lv.device_path()).expect("swap");
                }
            }
        }
    }

    #[test]
    fn test_complete_chain_verifies() {
        let mut p = provisioned();
        mount_all(&mut p.host, &p.topology);
        assert!(p.verify().expect("verify").is_empty());
    }

    #[test]
    fn test_unmounted_volume_breaks_chain() {
        let mut p = provisioned();
        mount_all(&mut p.host, &p.topology);
        p.host.unmount(&PathBuf::from("/work")).expect("umount");
        let err = p.verify().expect_err("broken");
        assert!(matches!(err, ProvisionError::ChainBroken(_)));
        assert!(err.to_string().contains("/work"));
    }

    #[test]
    fn test_inactive_swap_is_only_an_issue() {
        let mut p = provisioned();
        p.host.inject_failure(Action::ActivateSwap(PathBuf::from("/dev/vg_temp/lv_swap")));
        mount_all(&mut p.host, &p.topology);
        let issues = p.verify().expect("verify");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::SwapInactive);
    }

    #[test]
    fn test_missing_signature_breaks_chain() {
        let mut p = provisioned();
        mount_all(&mut p.host, &p.topology);
        p.host.wipe_signatures(&PathBuf::from("/dev/vg_datos/lv_docker")).expect("wipe");
        let err = p.verify().expect_err("broken");
        assert!(err.to_string().contains("lv_docker"));
    }

    #[test]
    fn test_missing_table_entry_breaks_chain() {
        let mut p = provisioned();
        mount_all(&mut p.host, &p.topology);
        let kept: String = fs::read_to_string(p.table.path())
            .expect("read")
            .lines()
            .filter(|line| !line.contains("lv_workareas"))
            .map(|line| format!("{}\n", line))
            .collect();
        fs::write(p.table.path(), kept).expect("rewrite");

        let err = p.verify().expect_err("entry removed");
        assert!(matches!(err, ProvisionError::ChainBroken(_)));
        assert!(err.to_string().contains("/dev/vg_datos/lv_workareas"), "{err}");
    }

    #[test]
    fn test_mapper_alias_in_table_satisfies_chain() {
        let mut p = provisioned();
        mount_all(&mut p.host, &p.topology);
        let aliased = fs::read_to_string(p.table.path())
            .expect("read")
            .replace("/dev/vg_datos/lv_docker", "/dev/mapper/vg_datos-lv_docker");
        fs::write(p.table.path(), aliased).expect("rewrite");

        assert!(p.verify().expect("verify").is_empty());
    }
}
