//! Property-Based Tests for vmstorage
//!
//! These tests verify:
//! - Classification is deterministic and first-seen-wins
//! - Missing roles are always reported together
//! - Device-mapper aliases fold onto `/dev/<vg>/<lv>`
//! - Mount table persistence never appends twice

use std::fs;

use chrono::NaiveDate;
use proptest::prelude::*;
use strum::IntoEnumIterator;
use tempfile::TempDir;

use vmstorage::engine::fstab::{
    FstabEntry, MountTable, ensure_persisted, entries_for, normalize_device,
};
use vmstorage::{BlockDevice, DeviceRole, Topology, classify};

const GIB: u64 = 1024 * 1024 * 1024;

// =============================================================================
// Classification
// =============================================================================

/// Disk sizes around the interesting classes, with a little jitter
fn disks_strategy() -> impl Strategy<Value = Vec<BlockDevice>> {
    prop::collection::vec((1u64..=6, -64i64..=64), 0..10).prop_map(|sizes| {
        sizes
            .into_iter()
            .enumerate()
            .map(|(i, (gib, jitter_mib))| {
                let bytes = (gib * GIB).saturating_add_signed(jitter_mib * 1024 * 1024);
                BlockDevice::disk(format!("/dev/vd{}", i), bytes)
            })
            .collect()
    })
}

proptest! {
    /// Every bound device has the role's size and is the first such device
    #[test]
    fn classification_is_first_seen_wins(devices in disks_strategy()) {
        let roles: Vec<DeviceRole> = DeviceRole::iter().collect();
        match classify(&devices, &roles) {
            Ok(c) => {
                let mut used = Vec::new();
                for (role, device) in c.iter() {
                    prop_assert_eq!(device.size_gib(), role.expected_gib());
                    let first = devices
                        .iter()
                        .find(|d| d.size_gib() == role.expected_gib())
                        .map(|d| d.path.clone());
                    prop_assert_eq!(Some(device.path.clone()), first);
                    prop_assert!(!used.contains(&device.path));
                    used.push(device.path.clone());
                }
                prop_assert_eq!(c.len(), roles.len());
            }
            Err(err) => {
                let expected: Vec<DeviceRole> = roles
                    .iter()
                    .copied()
                    .filter(|r| !devices.iter().any(|d| d.size_gib() == r.expected_gib()))
                    .collect();
                prop_assert_eq!(err.missing, expected);
            }
        }
    }

    /// Same input, same answer
    #[test]
    fn classification_is_deterministic(devices in disks_strategy()) {
        let roles: Vec<DeviceRole> = DeviceRole::iter().collect();
        prop_assert_eq!(classify(&devices, &roles), classify(&devices, &roles));
    }
}

// =============================================================================
// Mount table
// =============================================================================

fn lvm_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,10}"
}

proptest! {
    /// `/dev/mapper/<escaped vg>-<escaped lv>` normalizes to `/dev/<vg>/<lv>`
    #[test]
    fn mapper_alias_normalizes(vg in lvm_name(), lv in lvm_name()) {
        let mapper = format!("/dev/mapper/{}-{}", vg.replace('-', "--"), lv.replace('-', "--"));
        prop_assert_eq!(normalize_device(&mapper), format!("/dev/{}/{}", vg, lv));
    }

    /// Persisting twice over arbitrary unrelated lines appends nothing the second time
    #[test]
    fn persistence_is_idempotent(
        extra in prop::collection::vec(("/dev/sd[a-z][0-9]", "/mnt/[a-z]{1,8}"), 0..5),
        trailing_newline in any::<bool>(),
    ) {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("fstab");
        let mut seed: String = extra
            .iter()
            .map(|(dev, mp)| format!("{} {} ext4 defaults 0 2", dev, mp))
            .collect::<Vec<_>>()
            .join("\n");
        if trailing_newline && !seed.is_empty() {
            seed.push('\n');
        }
        fs::write(&path, &seed).expect("seed");

        let table = MountTable::new(&path);
        let wanted = entries_for(&Topology::default());
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).expect("leap day");

        let first = ensure_persisted(&table, &wanted, date).expect("first");
        prop_assert_eq!(first.appended.len(), wanted.len());
        let after_first = fs::read_to_string(&path).expect("read");

        let second = ensure_persisted(&table, &wanted, date).expect("second");
        prop_assert!(second.appended.is_empty());
        prop_assert_eq!(fs::read_to_string(&path).expect("read"), after_first.clone());

        let parsed: Vec<FstabEntry> = after_first.lines().filter_map(FstabEntry::parse).collect();
        prop_assert_eq!(parsed.len(), extra.len() + wanted.len());
    }
}
