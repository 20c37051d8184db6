//! In-memory `StorageHost`.
//!
//! Models just enough of the kernel, LVM and mount state to exercise every
//! guard: tools refuse out-of-order requests the way the real ones do
//! (vgcreate on a non-PV, lvcreate on a missing group, mounting a device
//! without a filesystem). Every mutating call is appended to a journal, and
//! any call can be made to fail with `inject_failure`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use super::{
    BlockDevice, MountState, Partition, PhysicalVolume, Presence, SWAP_MOUNTPOINT, StorageHost,
};
use crate::types::{Filesystem, LVM_SIGNATURE, LvSize, SWAP_SIGNATURE};

const GIB: u64 = 1024 * 1024 * 1024;

/// A mutating call made against the host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Unmount(PathBuf),
    WipeSignatures(PathBuf),
    ZapPartitionTable(PathBuf),
    RereadPartitionTable(PathBuf),
    CreatePhysicalVolume(PathBuf),
    CreateVolumeGroup(String),
    CreateLogicalVolume { volume_group: String, name: String },
    MakeFilesystem(PathBuf),
    MakeSwap(PathBuf),
    ActivateSwap(PathBuf),
    DeactivateSwap(PathBuf),
    CreateDirectory(PathBuf),
    Mount { device: PathBuf, mountpoint: PathBuf },
}

impl Action {
    /// True for actions that bring a new storage entity into existence
    pub fn is_creation(&self) -> bool {
        matches!(
            self,
            Self::CreatePhysicalVolume(_)
                | Self::CreateVolumeGroup(_)
                | Self::CreateLogicalVolume { .. }
                | Self::MakeFilesystem(_)
                | Self::MakeSwap(_)
        )
    }
}

/// Simulated storage stack
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    devices: Vec<BlockDevice>,
    signatures: BTreeMap<PathBuf, String>,
    physical_volumes: BTreeMap<PathBuf, Option<String>>,
    volume_groups: BTreeMap<String, Vec<PathBuf>>,
    logical_volumes: BTreeSet<(String, String)>,
    mounts: BTreeMap<PathBuf, PathBuf>,
    swaps: BTreeSet<PathBuf>,
    directories: BTreeSet<PathBuf>,
    failures: HashSet<Action>,
    journal: Vec<Action>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with one whole disk per `(path, GiB)` pair, in that order
    pub fn with_disks(disks: &[(&str, u64)]) -> Self {
        let mut host = Self::new();
        for (path, gib) in disks {
            host.add_device(BlockDevice::disk(*path, gib * GIB));
        }
        host
    }

    pub fn add_device(&mut self, device: BlockDevice) {
        let holders = device
            .partitions
            .iter()
            .map(|p| (&p.path, &p.mountpoint))
            .chain([(&device.path, &device.mountpoint)]);
        for (path, mountpoint) in holders {
            match mountpoint {
                Some(mp) if mp == Path::new(SWAP_MOUNTPOINT) => {
                    self.swaps.insert(path.clone());
                }
                Some(mp) => {
                    self.mounts.insert(mp.clone(), path.clone());
                }
                None => {}
            }
        }
        self.devices.push(device);
    }

    /// Add a mounted partition beneath an existing disk
    pub fn add_mounted_partition(&mut self, disk: &str, partition: &str, mountpoint: &str) {
        if let Some(dev) = self.devices.iter_mut().find(|d| d.path == Path::new(disk)) {
            dev.partitions.push(Partition {
                path: PathBuf::from(partition),
                mountpoint: Some(PathBuf::from(mountpoint)),
            });
            self.mounts.insert(PathBuf::from(mountpoint), PathBuf::from(partition));
        }
    }

    /// Add a partition in use as swap beneath an existing disk
    pub fn add_swap_partition(&mut self, disk: &str, partition: &str) {
        if let Some(dev) = self.devices.iter_mut().find(|d| d.path == Path::new(disk)) {
            dev.partitions.push(Partition {
                path: PathBuf::from(partition),
                mountpoint: Some(PathBuf::from(SWAP_MOUNTPOINT)),
            });
            self.swaps.insert(PathBuf::from(partition));
            self.signatures.insert(PathBuf::from(partition), SWAP_SIGNATURE.to_string());
        }
    }

    /// Simulate a device disappearing after discovery
    pub fn remove_device(&mut self, path: &str) {
        self.devices.retain(|d| d.path != Path::new(path));
    }

    pub fn set_signature(&mut self, device: &str, signature: &str) {
        self.signatures.insert(PathBuf::from(device), signature.to_string());
    }

    /// Make the next and every later identical call fail
    pub fn inject_failure(&mut self, action: Action) {
        self.failures.insert(action);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Every mutating call made so far, in order (including failed ones)
    pub fn journal(&self) -> &[Action] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Number of journaled entity creations
    pub fn creation_count(&self) -> usize {
        self.journal.iter().filter(|a| a.is_creation()).count()
    }

    pub fn volume_group_members(&self, name: &str) -> Option<&[PathBuf]> {
        self.volume_groups.get(name).map(Vec::as_slice)
    }

    pub fn physical_volume_paths(&self) -> Vec<PathBuf> {
        self.physical_volumes.keys().cloned().collect()
    }

    pub fn logical_volume_names(&self) -> Vec<(String, String)> {
        self.logical_volumes.iter().cloned().collect()
    }

    pub fn mounted_at(&self, mountpoint: &str) -> Option<&Path> {
        self.mounts.get(Path::new(mountpoint)).map(PathBuf::as_path)
    }

    pub fn active_swaps(&self) -> Vec<PathBuf> {
        self.swaps.iter().cloned().collect()
    }

    /// Comparable snapshot of all storage state (journal excluded)
    pub fn state_snapshot(&self) -> String {
        format!(
            "sig={:?} pv={:?} vg={:?} lv={:?} mnt={:?} swap={:?}",
            self.signatures,
            self.physical_volumes,
            self.volume_groups,
            self.logical_volumes,
            self.mounts,
            self.swaps
        )
    }

    fn record(&mut self, action: Action) -> Result<()> {
        let fail = self.failures.contains(&action);
        self.journal.push(action.clone());
        if fail {
            bail!("simulated failure: {:?}", action);
        }
        Ok(())
    }

    fn lv_path(volume_group: &str, name: &str) -> PathBuf {
        PathBuf::from("/dev").join(volume_group).join(name)
    }

    fn is_block_device(&self, device: &Path) -> bool {
        self.devices.iter().any(|d| d.path == device)
            || self
                .logical_volumes
                .iter()
                .any(|(vg, lv)| Self::lv_path(vg, lv) == device)
    }
}

impl StorageHost for MemoryHost {
    fn block_devices(&self) -> Result<Vec<BlockDevice>> {
        Ok(self.devices.clone())
    }

    fn device_exists(&self, device: &Path) -> bool {
        self.is_block_device(device)
    }

    fn physical_volume(&self, device: &Path) -> Result<Option<PhysicalVolume>> {
        Ok(self.physical_volumes.get(device).map(|vg| PhysicalVolume {
            device: device.to_path_buf(),
            volume_group: vg.clone(),
        }))
    }

    fn volume_group(&self, name: &str) -> Result<Presence> {
        Ok(self.volume_groups.contains_key(name).into())
    }

    fn logical_volume(&self, volume_group: &str, name: &str) -> Result<Presence> {
        Ok(self
            .logical_volumes
            .contains(&(volume_group.to_string(), name.to_string()))
            .into())
    }

    fn signature(&self, device: &Path) -> Result<Option<String>> {
        if !self.is_block_device(device) {
            bail!("{}: no such device", device.display());
        }
        Ok(self.signatures.get(device).cloned())
    }

    fn mount_state(&self, device: &Path, mountpoint: &Path) -> Result<MountState> {
        Ok(match self.mounts.get(mountpoint) {
            None => MountState::NotMounted,
            Some(source) if source == device => MountState::Mounted,
            Some(source) => MountState::MountedOther(source.clone()),
        })
    }

    fn swap_active(&self, device: &Path) -> Result<bool> {
        Ok(self.swaps.contains(device))
    }

    fn unmount(&mut self, target: &Path) -> Result<()> {
        self.record(Action::Unmount(target.to_path_buf()))?;
        if self.mounts.remove(target).is_none() {
            bail!("{}: not mounted", target.display());
        }
        for dev in &mut self.devices {
            for part in &mut dev.partitions {
                if part.mountpoint.as_deref() == Some(target) {
                    part.mountpoint = None;
                }
            }
            if dev.mountpoint.as_deref() == Some(target) {
                dev.mountpoint = None;
            }
        }
        Ok(())
    }

    fn wipe_signatures(&mut self, device: &Path) -> Result<()> {
        self.record(Action::WipeSignatures(device.to_path_buf()))?;
        if !self.is_block_device(device) {
            bail!("{}: no such device", device.display());
        }
        self.signatures.remove(device);
        self.physical_volumes.remove(device);
        Ok(())
    }

    fn zap_partition_table(&mut self, device: &Path) -> Result<()> {
        self.record(Action::ZapPartitionTable(device.to_path_buf()))?;
        match self.devices.iter_mut().find(|d| d.path == device) {
            Some(dev) => {
                let gone: Vec<PathBuf> = dev.partitions.drain(..).map(|p| p.path).collect();
                self.mounts.retain(|_, source| !gone.contains(source));
                self.swaps.retain(|area| !gone.contains(area));
                Ok(())
            }
            None => bail!("{}: no such device", device.display()),
        }
    }

    fn reread_partition_table(&mut self, device: &Path) -> Result<()> {
        self.record(Action::RereadPartitionTable(device.to_path_buf()))?;
        if !self.is_block_device(device) {
            bail!("{}: no such device", device.display());
        }
        Ok(())
    }

    fn create_physical_volume(&mut self, device: &Path) -> Result<()> {
        self.record(Action::CreatePhysicalVolume(device.to_path_buf()))?;
        if !self.is_block_device(device) {
            bail!("{}: no such device", device.display());
        }
        if self.physical_volumes.get(device).is_some_and(Option::is_some) {
            bail!("{} is already in a volume group", device.display());
        }
        self.physical_volumes.insert(device.to_path_buf(), None);
        self.signatures.insert(device.to_path_buf(), LVM_SIGNATURE.to_string());
        Ok(())
    }

    fn create_volume_group(&mut self, name: &str, members: &[PathBuf]) -> Result<()> {
        self.record(Action::CreateVolumeGroup(name.to_string()))?;
        if self.volume_groups.contains_key(name) {
            bail!("volume group {} already exists", name);
        }
        for member in members {
            match self.physical_volumes.get(member) {
                None => bail!("{} is not a physical volume", member.display()),
                Some(Some(vg)) => bail!("{} already belongs to {}", member.display(), vg),
                Some(None) => {}
            }
        }
        for member in members {
            self.physical_volumes.insert(member.clone(), Some(name.to_string()));
        }
        self.volume_groups.insert(name.to_string(), members.to_vec());
        Ok(())
    }

    fn create_logical_volume(
        &mut self,
        volume_group: &str,
        name: &str,
        _size: LvSize,
    ) -> Result<()> {
        self.record(Action::CreateLogicalVolume {
            volume_group: volume_group.to_string(),
            name: name.to_string(),
        })?;
        if !self.volume_groups.contains_key(volume_group) {
            bail!("volume group {} not found", volume_group);
        }
        if !self
            .logical_volumes
            .insert((volume_group.to_string(), name.to_string()))
        {
            bail!("logical volume {}/{} already exists", volume_group, name);
        }
        Ok(())
    }

    fn make_filesystem(&mut self, device: &Path, filesystem: Filesystem) -> Result<()> {
        self.record(Action::MakeFilesystem(device.to_path_buf()))?;
        if !self.is_block_device(device) {
            bail!("{}: no such device", device.display());
        }
        self.signatures
            .insert(device.to_path_buf(), filesystem.signature().to_string());
        Ok(())
    }

    fn make_swap(&mut self, device: &Path) -> Result<()> {
        self.record(Action::MakeSwap(device.to_path_buf()))?;
        if !self.is_block_device(device) {
            bail!("{}: no such device", device.display());
        }
        self.signatures
            .insert(device.to_path_buf(), SWAP_SIGNATURE.to_string());
        Ok(())
    }

    fn activate_swap(&mut self, device: &Path) -> Result<()> {
        self.record(Action::ActivateSwap(device.to_path_buf()))?;
        if self.signatures.get(device).map(String::as_str) != Some(SWAP_SIGNATURE) {
            bail!("{}: read swap header failed", device.display());
        }
        if !self.swaps.insert(device.to_path_buf()) {
            bail!("{}: swapon failed: Device or resource busy", device.display());
        }
        Ok(())
    }

    fn deactivate_swap(&mut self, device: &Path) -> Result<()> {
        self.record(Action::DeactivateSwap(device.to_path_buf()))?;
        if !self.swaps.remove(device) {
            bail!("{}: swapoff failed: Invalid argument", device.display());
        }
        for dev in &mut self.devices {
            for part in &mut dev.partitions {
                if part.path == device {
                    part.mountpoint = None;
                }
            }
            if dev.path == device {
                dev.mountpoint = None;
            }
        }
        Ok(())
    }

    fn ensure_directory(&mut self, path: &Path) -> Result<()> {
        if self.directories.contains(path) {
            return Ok(());
        }
        self.record(Action::CreateDirectory(path.to_path_buf()))?;
        self.directories.insert(path.to_path_buf());
        Ok(())
    }

    fn mount(&mut self, device: &Path, mountpoint: &Path, fstype: &str) -> Result<()> {
        self.record(Action::Mount {
            device: device.to_path_buf(),
            mountpoint: mountpoint.to_path_buf(),
        })?;
        if !self.directories.contains(mountpoint) {
            bail!("mount point {} does not exist", mountpoint.display());
        }
        if self.signatures.get(device).map(String::as_str) != Some(fstype) {
            bail!("wrong fs type, bad superblock on {}", device.display());
        }
        if self.mounts.contains_key(mountpoint) {
            bail!("{} is already mounted", mountpoint.display());
        }
        self.mounts.insert(mountpoint.to_path_buf(), device.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vgcreate_requires_physical_volumes() {
        let mut host = MemoryHost::with_disks(&[("/dev/sdb", 5)]);
        let err = host
            .create_volume_group("vg", &[PathBuf::from("/dev/sdb")])
            .expect_err("not a PV yet");
        assert!(err.to_string().contains("not a physical volume"));

        host.create_physical_volume(Path::new("/dev/sdb")).expect("pvcreate");
        host.create_volume_group("vg", &[PathBuf::from("/dev/sdb")]).expect("vgcreate");
        assert_eq!(
            host.physical_volume(Path::new("/dev/sdb")).expect("query"),
            Some(PhysicalVolume {
                device: PathBuf::from("/dev/sdb"),
                volume_group: Some("vg".to_string()),
            })
        );
    }

    #[test]
    fn test_injected_failure_is_journaled() {
        let mut host = MemoryHost::with_disks(&[("/dev/sdb", 5)]);
        host.inject_failure(Action::CreatePhysicalVolume(PathBuf::from("/dev/sdb")));
        assert!(host.create_physical_volume(Path::new("/dev/sdb")).is_err());
        assert_eq!(host.journal().len(), 1);
        assert!(host.physical_volume_paths().is_empty());
    }

    #[test]
    fn test_mount_requires_matching_filesystem() {
        let mut host = MemoryHost::with_disks(&[("/dev/sdb", 5)]);
        host.ensure_directory(Path::new("/work")).expect("mkdir");
        assert!(host.mount(Path::new("/dev/sdb"), Path::new("/work"), "ext4").is_err());

        host.make_filesystem(Path::new("/dev/sdb"), Filesystem::Ext4).expect("mkfs");
        host.mount(Path::new("/dev/sdb"), Path::new("/work"), "ext4").expect("mount");
        assert_eq!(
            host.mount_state(Path::new("/dev/sdb"), Path::new("/work")).expect("state"),
            MountState::Mounted
        );
    }

    #[test]
    fn test_zap_drops_partitions_and_their_mounts() {
        let mut host = MemoryHost::with_disks(&[("/dev/sdc", 3)]);
        host.add_mounted_partition("/dev/sdc", "/dev/sdc1", "/mnt/old");
        assert_eq!(host.mounted_at("/mnt/old"), Some(Path::new("/dev/sdc1")));

        host.zap_partition_table(Path::new("/dev/sdc")).expect("zap");
        assert_eq!(host.mounted_at("/mnt/old"), None);
        assert!(host.block_devices().expect("list")[0].partitions.is_empty());
    }

    #[test]
    fn test_swapoff_releases_partition() {
        let mut host = MemoryHost::with_disks(&[("/dev/sdd", 2)]);
        host.add_swap_partition("/dev/sdd", "/dev/sdd1");
        assert_eq!(host.active_swaps(), vec![PathBuf::from("/dev/sdd1")]);

        host.deactivate_swap(Path::new("/dev/sdd1")).expect("swapoff");
        assert!(host.active_swaps().is_empty());
        assert!(host.block_devices().expect("list")[0].swap_areas().is_empty());
        assert!(host.deactivate_swap(Path::new("/dev/sdd1")).is_err());
    }

    #[test]
    fn test_ensure_directory_is_idempotent() {
        let mut host = MemoryHost::new();
        host.ensure_directory(Path::new("/work")).expect("mkdir");
        host.ensure_directory(Path::new("/work")).expect("mkdir again");
        assert_eq!(host.journal().len(), 1);
    }
}
