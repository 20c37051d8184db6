//! Storage Reconciler
//!
//! Converges the live LVM stack onto a [`Topology`] for a given
//! [`Classification`]. Work happens in strict dependency order:
//!
//! | Step | Guard (query)                     | Action       |
//! |------|-----------------------------------|--------------|
//! | PV   | device is a physical volume       | `pvcreate`   |
//! | VG   | group exists                      | `vgcreate`   |
//! | LV   | volume exists in its group        | `lvcreate`   |
//! | FS   | signature already matches         | `mkfs.*`     |
//! | Swap | signature already `swap`          | `mkswap`     |
//!
//! An entity whose guard reports it present is never touched. Before a VG,
//! LV or format step, its prerequisites are re-queried; anything not
//! confirmed present aborts the run. Every creation failure is fatal.
//!
//! [`Reconciler::plan`] answers "what would `apply` do right now" without
//! side effects.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::engine::classifier::Classification;
use crate::error::{ProvisionError, Result};
use crate::host::StorageHost;
use crate::topology::{LogicalVolumeSpec, Topology, VolumeGroupSpec};
use crate::types::{Filesystem, LvSize, SWAP_SIGNATURE, VolumeUse};

// ============================================================================
// Entities and their lifecycle
// ============================================================================

/// A runtime storage entity the reconciler converges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entity {
    PhysicalVolume(PathBuf),
    VolumeGroup(String),
    LogicalVolume { volume_group: String, name: String },
    Filesystem { device: PathBuf, filesystem: Filesystem },
    Swap(PathBuf),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhysicalVolume(dev) => write!(f, "physical volume {}", dev.display()),
            Self::VolumeGroup(name) => write!(f, "volume group {}", name),
            Self::LogicalVolume { volume_group, name } => {
                write!(f, "logical volume {}/{}", volume_group, name)
            }
            Self::Filesystem { device, filesystem } => {
                write!(f, "{} filesystem on {}", filesystem, device.display())
            }
            Self::Swap(dev) => write!(f, "swap area on {}", dev.display()),
        }
    }
}

/// Lifecycle of a runtime entity within one run.
///
/// `Absent → Creating → Present` or `Absent → Creating → Failed`, plus
/// `Absent → Present` when the guard finds it already there. There is no
/// way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Absent,
    Creating,
    Present,
    Failed,
}

impl EntityState {
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Absent, Self::Creating)
                | (Self::Absent, Self::Present)
                | (Self::Creating, Self::Present)
                | (Self::Creating, Self::Failed)
        )
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Present => "present",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-entity state, in the order entities were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityLedger {
    entries: Vec<(Entity, EntityState)>,
}

impl EntityLedger {
    pub fn state(&self, entity: &Entity) -> EntityState {
        self.entries
            .iter()
            .find(|(e, _)| e == entity)
            .map_or(EntityState::Absent, |(_, s)| *s)
    }

    /// Move `entity` to `next`, rejecting anything its lifecycle forbids.
    pub fn transition(&mut self, entity: &Entity, next: EntityState) -> Result<()> {
        let current = self.state(entity);
        if !current.can_transition_to(next) {
            return Err(ProvisionError::InvalidTransition {
                entity: entity.to_string(),
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        match self.entries.iter_mut().find(|(e, _)| e == entity) {
            Some((_, state)) => *state = next,
            None => self.entries.push((entity.clone(), next)),
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Entity, EntityState)> {
        self.entries.iter()
    }

    pub fn all_present(&self) -> bool {
        self.entries.iter().all(|(_, s)| *s == EntityState::Present)
    }
}

// ============================================================================
// Plan
// ============================================================================

/// A single creation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// `pvcreate --force --yes`
    CreatePv { device: PathBuf },
    CreateVg { name: String, members: Vec<PathBuf> },
    CreateLv {
        volume_group: String,
        name: String,
        size: LvSize,
    },
    FormatFs { device: PathBuf, filesystem: Filesystem },
    FormatSwap { device: PathBuf },
}

impl StorageOp {
    pub fn entity(&self) -> Entity {
        match self {
            Self::CreatePv { device } => Entity::PhysicalVolume(device.clone()),
            Self::CreateVg { name, .. } => Entity::VolumeGroup(name.clone()),
            Self::CreateLv { volume_group, name, .. } => Entity::LogicalVolume {
                volume_group: volume_group.clone(),
                name: name.clone(),
            },
            Self::FormatFs { device, filesystem } => Entity::Filesystem {
                device: device.clone(),
                filesystem: *filesystem,
            },
            Self::FormatSwap { device } => Entity::Swap(device.clone()),
        }
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreatePv { device } => write!(f, "CreatePV({})", device.display()),
            Self::CreateVg { name, members } => {
                let members: Vec<String> =
                    members.iter().map(|m| m.display().to_string()).collect();
                write!(f, "CreateVG({} on {})", name, members.join(", "))
            }
            Self::CreateLv { volume_group, name, size } => {
                write!(f, "CreateLV({}/{}, size={})", volume_group, name, size)
            }
            Self::FormatFs { device, filesystem } => {
                write!(f, "FormatFs({}, fs={})", device.display(), filesystem)
            }
            Self::FormatSwap { device } => write!(f, "FormatSwap({})", device.display()),
        }
    }
}

/// What `apply` would do from the state observed at planning time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub ops: Vec<StorageOp>,
    /// Entities whose guards already report them present
    pub present: Vec<Entity>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            "Reconcile Plan:".to_string(),
            format!("  Already present: {}", self.present.len()),
            format!("  Operations ({}):", self.ops.len()),
        ];
        for (i, op) in self.ops.iter().enumerate() {
            lines.push(format!("    {}. {}", i + 1, op));
        }
        lines.join("\n")
    }
}

/// Outcome of `apply`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<Entity>,
    pub existing: Vec<Entity>,
    pub states: EntityLedger,
}

// ============================================================================
// Reconciler
// ============================================================================

pub struct Reconciler<'a> {
    topology: &'a Topology,
    classification: &'a Classification,
}

impl<'a> Reconciler<'a> {
    pub fn new(topology: &'a Topology, classification: &'a Classification) -> Self {
        Self {
            topology,
            classification,
        }
    }

    /// Compute the operations `apply` would run, without side effects.
    ///
    /// # Errors
    ///
    /// `ProvisionError::Query` if live state cannot be read, or
    /// `ProvisionError::Dependency` if a member role is unclassified.
    pub fn plan<H: StorageHost + ?Sized>(&self, host: &H) -> Result<ReconcilePlan> {
        let mut plan = ReconcilePlan::default();

        for device in self.physical_volume_devices()? {
            if query_pv(host, &device)? {
                plan.present.push(Entity::PhysicalVolume(device));
            } else {
                plan.ops.push(StorageOp::CreatePv { device });
            }
        }

        let mut groups_present = Vec::new();
        for vg in &self.topology.volume_groups {
            if query_vg(host, &vg.name)? {
                groups_present.push(vg.name.as_str());
                plan.present.push(Entity::VolumeGroup(vg.name.clone()));
            } else {
                plan.ops.push(StorageOp::CreateVg {
                    name: vg.name.clone(),
                    members: self.member_devices(vg)?,
                });
            }
        }

        let mut volumes_present = Vec::new();
        for lv in &self.topology.logical_volumes {
            let present = groups_present.contains(&lv.volume_group.as_str()) && query_lv(host, lv)?;
            if present {
                volumes_present.push(lv.name.as_str());
                plan.present.push(lv_entity(lv));
            } else {
                plan.ops.push(StorageOp::CreateLv {
                    volume_group: lv.volume_group.clone(),
                    name: lv.name.clone(),
                    size: lv.size,
                });
            }
        }

        for lv in &self.topology.logical_volumes {
            let formatted =
                volumes_present.contains(&lv.name.as_str()) && format_matches(host, lv)?;
            if formatted {
                plan.present.push(format_entity(lv));
            } else {
                plan.ops.push(format_op(lv));
            }
        }

        Ok(plan)
    }

    /// Converge the host onto the topology.
    ///
    /// # Errors
    ///
    /// Stops at the first creation failure, unmet dependency or failed query.
    pub fn apply<H: StorageHost + ?Sized>(&self, host: &mut H) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for device in self.physical_volume_devices()? {
            let entity = Entity::PhysicalVolume(device.clone());
            if query_pv(host, &device)? {
                already_present(&mut report, entity)?;
                continue;
            }
            create(&mut report, entity, || host.create_physical_volume(&device))?;
        }

        for vg in &self.topology.volume_groups {
            let entity = Entity::VolumeGroup(vg.name.clone());
            if query_vg(host, &vg.name)? {
                already_present(&mut report, entity)?;
                continue;
            }
            let members = self.member_devices(vg)?;
            for member in &members {
                if !query_pv(host, member)? {
                    return Err(ProvisionError::dependency(
                        &entity,
                        Entity::PhysicalVolume(member.clone()),
                    ));
                }
            }
            create(&mut report, entity, || host.create_volume_group(&vg.name, &members))?;
        }

        for lv in &self.topology.logical_volumes {
            let entity = lv_entity(lv);
            if !query_vg(host, &lv.volume_group)? {
                return Err(ProvisionError::dependency(
                    &entity,
                    Entity::VolumeGroup(lv.volume_group.clone()),
                ));
            }
            if query_lv(host, lv)? {
                already_present(&mut report, entity)?;
                continue;
            }
            create(&mut report, entity, || {
                host.create_logical_volume(&lv.volume_group, &lv.name, lv.size)
            })?;
        }

        for lv in &self.topology.logical_volumes {
            let entity = format_entity(lv);
            if !query_lv(host, lv)? {
                return Err(ProvisionError::dependency(&entity, lv_entity(lv)));
            }
            if format_matches(host, lv)? {
                already_present(&mut report, entity)?;
                continue;
            }
            let device = lv.device_path();
            create(&mut report, entity, || match lv.usage {
                VolumeUse::Data(fs) => host.make_filesystem(&device, fs),
                VolumeUse::Swap => host.make_swap(&device),
            })?;
        }

        info!(
            "Reconciliation complete: {} created, {} already present",
            report.created.len(),
            report.existing.len()
        );
        Ok(report)
    }

    /// Classified devices of every volume group, in topology order
    fn physical_volume_devices(&self) -> Result<Vec<PathBuf>> {
        let mut devices = Vec::new();
        for vg in &self.topology.volume_groups {
            devices.extend(self.member_devices(vg)?);
        }
        Ok(devices)
    }

    fn member_devices(&self, vg: &VolumeGroupSpec) -> Result<Vec<PathBuf>> {
        vg.members
            .iter()
            .map(|role| {
                self.classification
                    .path(*role)
                    .map(|p| p.to_path_buf())
                    .ok_or_else(|| {
                        ProvisionError::dependency(
                            Entity::VolumeGroup(vg.name.clone()),
                            format!("device for role {}", role),
                        )
                    })
            })
            .collect()
    }
}

fn lv_entity(lv: &LogicalVolumeSpec) -> Entity {
    Entity::LogicalVolume {
        volume_group: lv.volume_group.clone(),
        name: lv.name.clone(),
    }
}

fn format_entity(lv: &LogicalVolumeSpec) -> Entity {
    match lv.usage {
        VolumeUse::Data(filesystem) => Entity::Filesystem {
            device: lv.device_path(),
            filesystem,
        },
        VolumeUse::Swap => Entity::Swap(lv.device_path()),
    }
}

fn format_op(lv: &LogicalVolumeSpec) -> StorageOp {
    match lv.usage {
        VolumeUse::Data(filesystem) => StorageOp::FormatFs {
            device: lv.device_path(),
            filesystem,
        },
        VolumeUse::Swap => StorageOp::FormatSwap {
            device: lv.device_path(),
        },
    }
}

fn query_pv<H: StorageHost + ?Sized>(host: &H, device: &std::path::Path) -> Result<bool> {
    let pv = host
        .physical_volume(device)
        .map_err(|e| ProvisionError::query(format!("physical volume {}", device.display()), e))?;
    debug!(device = %device.display(), present = pv.is_some(), "pv guard");
    Ok(pv.is_some())
}

fn query_vg<H: StorageHost + ?Sized>(host: &H, name: &str) -> Result<bool> {
    let presence = host
        .volume_group(name)
        .map_err(|e| ProvisionError::query(format!("volume group {}", name), e))?;
    debug!(vg = name, %presence, "vg guard");
    Ok(presence.is_present())
}

fn query_lv<H: StorageHost + ?Sized>(host: &H, lv: &LogicalVolumeSpec) -> Result<bool> {
    let presence = host
        .logical_volume(&lv.volume_group, &lv.name)
        .map_err(|e| ProvisionError::query(format!("logical volume {}", lv.qualified_name()), e))?;
    debug!(lv = %lv.qualified_name(), %presence, "lv guard");
    Ok(presence.is_present())
}

/// Whether the volume already carries the signature its use calls for
fn format_matches<H: StorageHost + ?Sized>(host: &H, lv: &LogicalVolumeSpec) -> Result<bool> {
    let device = lv.device_path();
    let signature = host
        .signature(&device)
        .map_err(|e| ProvisionError::query(format!("signature of {}", device.display()), e))?;
    let wanted = match lv.usage {
        VolumeUse::Data(fs) => fs.signature(),
        VolumeUse::Swap => SWAP_SIGNATURE,
    };
    debug!(device = %device.display(), ?signature, wanted, "format guard");
    Ok(signature.as_deref() == Some(wanted))
}

fn already_present(report: &mut ReconcileReport, entity: Entity) -> Result<()> {
    info!("{} already exists", entity);
    report.states.transition(&entity, EntityState::Present)?;
    report.existing.push(entity);
    Ok(())
}

/// Run one creation, recording `Creating` then `Present` or `Failed`.
fn create<F>(report: &mut ReconcileReport, entity: Entity, action: F) -> Result<()>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    info!("Creating {}", entity);
    report.states.transition(&entity, EntityState::Creating)?;
    match action() {
        Ok(()) => {
            report.states.transition(&entity, EntityState::Present)?;
            report.created.push(entity);
            Ok(())
        }
        Err(e) => {
            report.states.transition(&entity, EntityState::Failed)?;
            Err(ProvisionError::create(entity, e))
        }
    }
}
