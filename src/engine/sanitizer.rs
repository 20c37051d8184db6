//! Bring classified disks to a blank state before LVM takes them over.
//!
//! Per device: turn off swap and unmount everything on it, wipe signatures,
//! zap the partition table, have the kernel re-read it, then pause so udev
//! catches up. Every failure here is recorded as an issue and the next step
//! still runs. Devices that already serve as a PV of their target volume
//! group are left alone so a re-run never destroys what an earlier run built.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::classifier::Classification;
use crate::error::{Issue, IssueKind, ProvisionError, Result};
use crate::host::{BlockDevice, StorageHost};
use crate::topology::Topology;

/// A device to sanitize and the volume group its role feeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeTarget {
    pub device: BlockDevice,
    pub owner_vg: Option<String>,
}

impl SanitizeTarget {
    /// One target per classified device, in role order
    pub fn from_classification(classification: &Classification, topology: &Topology) -> Vec<Self> {
        classification
            .iter()
            .map(|(role, device)| Self {
                device: device.clone(),
                owner_vg: topology.volume_group_for(role).map(|vg| vg.name.clone()),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub wiped: Vec<PathBuf>,
    /// Already provisioned, left untouched
    pub skipped: Vec<PathBuf>,
    pub issues: Vec<Issue>,
}

/// Outcome of inspecting a target before touching it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizeDecision {
    Wipe,
    AlreadyProvisioned,
    Missing,
}

/// Decide what `sanitize` would do with `target`, without side effects.
///
/// # Errors
///
/// `ProvisionError::Query` if the PV report cannot be read.
pub fn decide<H: StorageHost + ?Sized>(
    host: &H,
    target: &SanitizeTarget,
) -> Result<SanitizeDecision> {
    let path = &target.device.path;
    if !host.device_exists(path) {
        return Ok(SanitizeDecision::Missing);
    }
    let pv = host
        .physical_volume(path)
        .map_err(|e| ProvisionError::query(format!("physical volume {}", path.display()), e))?;
    let provisioned = match (pv.and_then(|pv| pv.volume_group), &target.owner_vg) {
        (Some(actual), Some(owner)) => actual == *owner,
        _ => false,
    };
    Ok(if provisioned {
        SanitizeDecision::AlreadyProvisioned
    } else {
        SanitizeDecision::Wipe
    })
}

/// Sanitize every target in order.
///
/// # Errors
///
/// Only host query failures abort; tool failures become issues.
pub fn sanitize<H: StorageHost + ?Sized>(
    host: &mut H,
    targets: &[SanitizeTarget],
    settle: Duration,
) -> Result<SanitizeReport> {
    let mut report = SanitizeReport::default();

    for target in targets {
        let path = &target.device.path;
        match decide(host, target)? {
            SanitizeDecision::Missing => {
                warn!("Device {} disappeared, skipping sanitization", path.display());
                report.issues.push(Issue::new(
                    IssueKind::DeviceMissing,
                    path.display(),
                    "device no longer present",
                ));
                continue;
            }
            SanitizeDecision::AlreadyProvisioned => {
                info!(
                    "Device {} is already a physical volume of {}, not wiping",
                    path.display(),
                    target.owner_vg.as_deref().unwrap_or("?")
                );
                report.skipped.push(path.clone());
                continue;
            }
            SanitizeDecision::Wipe => {}
        }

        info!("Sanitizing {}", path.display());
        for area in target.device.swap_areas() {
            debug!("Turning off swap on {}", area.display());
            if let Err(e) = host.deactivate_swap(&area) {
                warn!("Could not turn off swap on {}: {:#}", area.display(), e);
                report
                    .issues
                    .push(Issue::new(IssueKind::UnmountFailed, area.display(), e));
            }
        }
        for mountpoint in target.device.mounted_targets() {
            debug!("Unmounting {}", mountpoint.display());
            if let Err(e) = host.unmount(&mountpoint) {
                warn!("Could not unmount {}: {:#}", mountpoint.display(), e);
                report
                    .issues
                    .push(Issue::new(IssueKind::UnmountFailed, mountpoint.display(), e));
            }
        }

        let wiped = host.wipe_signatures(path);
        note_wipe_failure(&mut report, path, "wipefs", wiped);
        let zapped = host.zap_partition_table(path);
        note_wipe_failure(&mut report, path, "sgdisk --zap-all", zapped);
        let reread = host.reread_partition_table(path);
        note_wipe_failure(&mut report, path, "partprobe", reread);

        if !settle.is_zero() {
            debug!("Waiting {:?} for the kernel to settle", settle);
            thread::sleep(settle);
        }
        report.wiped.push(path.clone());
    }

    Ok(report)
}

fn note_wipe_failure(
    report: &mut SanitizeReport,
    device: &Path,
    step: &str,
    result: anyhow::Result<()>,
) {
    if let Err(e) = result {
        warn!("{} failed on {}: {:#}", step, device.display(), e);
        report.issues.push(Issue::new(
            IssueKind::WipeFailed,
            device.display(),
            format!("{}: {:#}", step, e),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::classifier::classify_for;
    use crate::host::{Action, MemoryHost};

    fn targets_for(host: &MemoryHost) -> Vec<SanitizeTarget> {
        let topology = Topology::default();
        let devices = host.block_devices().expect("list");
        let classification = classify_for(&devices, &topology).expect("classify");
        SanitizeTarget::from_classification(&classification, &topology)
    }

    fn host() -> MemoryHost {
        MemoryHost::with_disks(&[
            ("/dev/sdb", 5),
            ("/dev/sdc", 3),
            ("/dev/sdd", 2),
            ("/dev/sde", 1),
        ])
    }

    #[test]
    fn test_targets_carry_owner_group() {
        let targets = targets_for(&host());
        assert_eq!(targets.len(), 4);
        assert_eq!(targets[0].owner_vg.as_deref(), Some("vg_datos"));
        assert_eq!(targets[3].owner_vg.as_deref(), Some("vg_temp"));
    }

    #[test]
    fn test_wipe_sequence_per_device() {
        let mut host = host();
        host.add_mounted_partition("/dev/sdc", "/dev/sdc1", "/mnt/old");
        host.set_signature("/dev/sdb", "ext4");
        let targets = targets_for(&host);

        let report = sanitize(&mut host, &targets, Duration::ZERO).expect("sanitize");
        assert_eq!(report.wiped.len(), 4);
        assert!(report.issues.is_empty());
        assert_eq!(host.mounted_at("/mnt/old"), None);

        let sdc: Vec<&Action> = host
            .journal()
            .iter()
            .filter(|a| match a {
                Action::Unmount(p) => p == Path::new("/mnt/old"),
                Action::WipeSignatures(p)
                | Action::ZapPartitionTable(p)
                | Action::RereadPartitionTable(p) => p == Path::new("/dev/sdc"),
                _ => false,
            })
            .collect();
        assert_eq!(
            sdc,
            vec![
                &Action::Unmount(PathBuf::from("/mnt/old")),
                &Action::WipeSignatures(PathBuf::from("/dev/sdc")),
                &Action::ZapPartitionTable(PathBuf::from("/dev/sdc")),
                &Action::RereadPartitionTable(PathBuf::from("/dev/sdc")),
            ]
        );
    }

    #[test]
    fn test_unmount_failure_is_an_issue_and_wipe_continues() {
        let mut host = host();
        host.add_mounted_partition("/dev/sdb", "/dev/sdb1", "/mnt/busy");
        host.inject_failure(Action::Unmount(PathBuf::from("/mnt/busy")));
        let targets = targets_for(&host);

        let report = sanitize(&mut host, &targets, Duration::ZERO).expect("sanitize");
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::UnmountFailed);
        assert!(host.journal().contains(&Action::WipeSignatures(PathBuf::from("/dev/sdb"))));
        assert_eq!(report.wiped.len(), 4);
    }

    #[test]
    fn test_wipe_tool_failures_are_issues_and_every_step_runs() {
        let mut host = host();
        host.inject_failure(Action::WipeSignatures(PathBuf::from("/dev/sdb")));
        host.inject_failure(Action::ZapPartitionTable(PathBuf::from("/dev/sdc")));
        host.inject_failure(Action::RereadPartitionTable(PathBuf::from("/dev/sdd")));
        let targets = targets_for(&host);

        let report = sanitize(&mut host, &targets, Duration::ZERO).expect("sanitize");

        let failed: Vec<(IssueKind, &str)> = report
            .issues
            .iter()
            .map(|i| (i.kind, i.entity.as_str()))
            .collect();
        assert_eq!(
            failed,
            vec![
                (IssueKind::WipeFailed, "/dev/sdb"),
                (IssueKind::WipeFailed, "/dev/sdc"),
                (IssueKind::WipeFailed, "/dev/sdd"),
            ]
        );
        assert!(report.issues[0].message.starts_with("wipefs"));
        assert!(report.issues[1].message.starts_with("sgdisk --zap-all"));
        assert!(report.issues[2].message.starts_with("partprobe"));
        assert!(host.journal().contains(&Action::ZapPartitionTable(PathBuf::from("/dev/sdb"))));
        assert!(host.journal().contains(&Action::RereadPartitionTable(PathBuf::from("/dev/sdc"))));
        assert_eq!(report.wiped.len(), 4);
    }

    #[test]
    fn test_swap_partition_is_turned_off_not_unmounted() {
        let mut host = host();
        host.add_swap_partition("/dev/sdd", "/dev/sdd1");
        let targets = targets_for(&host);

        let report = sanitize(&mut host, &targets, Duration::ZERO).expect("sanitize");
        assert!(report.issues.is_empty());
        assert!(host.journal().contains(&Action::DeactivateSwap(PathBuf::from("/dev/sdd1"))));
        assert!(!host.journal().iter().any(|a| matches!(a, Action::Unmount(_))));
        assert!(host.active_swaps().is_empty());
    }

    #[test]
    fn test_swapoff_failure_is_an_issue() {
        let mut host = host();
        host.add_swap_partition("/dev/sdd", "/dev/sdd1");
        host.inject_failure(Action::DeactivateSwap(PathBuf::from("/dev/sdd1")));
        let targets = targets_for(&host);

        let report = sanitize(&mut host, &targets, Duration::ZERO).expect("sanitize");
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::UnmountFailed);
        assert_eq!(report.issues[0].entity, "/dev/sdd1");
        assert!(host.journal().contains(&Action::WipeSignatures(PathBuf::from("/dev/sdd"))));
    }

    #[test]
    fn test_missing_device_is_skipped_with_issue() {
        let mut host = host();
        let targets = targets_for(&host);
        host.remove_device("/dev/sdd");

        let report = sanitize(&mut host, &targets, Duration::ZERO).expect("sanitize");
        assert_eq!(report.wiped.len(), 3);
        assert_eq!(report.issues[0].kind, IssueKind::DeviceMissing);
        assert!(!host.journal().contains(&Action::WipeSignatures(PathBuf::from("/dev/sdd"))));
    }

    #[test]
    fn test_provisioned_member_not_wiped() {
        let mut host = host();
        let members = [PathBuf::from("/dev/sdb"), PathBuf::from("/dev/sdc")];
        for m in &members {
            host.create_physical_volume(m).expect("pvcreate");
        }
        host.create_volume_group("vg_datos", &members).expect("vgcreate");
        host.clear_journal();
        let targets = targets_for(&host);

        let report = sanitize(&mut host, &targets, Duration::ZERO).expect("sanitize");
        assert_eq!(report.skipped, members.to_vec());
        assert_eq!(report.wiped, vec![PathBuf::from("/dev/sdd"), PathBuf::from("/dev/sde")]);
        assert_eq!(host.volume_group_members("vg_datos"), Some(&members[..]));
    }

    #[test]
    fn test_pv_of_foreign_group_is_wiped() {
        let mut host = host();
        host.create_physical_volume(Path::new("/dev/sdb")).expect("pvcreate");
        host.create_volume_group("vg_old", &[PathBuf::from("/dev/sdb")]).expect("vgcreate");
        let targets = targets_for(&host);

        assert_eq!(decide(&host, &targets[0]).expect("decide"), SanitizeDecision::Wipe);
    }
}
