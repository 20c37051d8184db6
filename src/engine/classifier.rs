//! Device classification: raw disks → roles, by capacity.
//!
//! The device list is traversed exactly once, in the order given. Each whole
//! disk binds to the first still-unfilled role (in role declaration order)
//! expecting its capacity, so ties are resolved first-seen-wins and no disk
//! can fill two roles. Every role still empty afterwards is reported
//! together.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use crate::error::ClassificationError;
use crate::host::BlockDevice;
use crate::topology::Topology;
use crate::types::DeviceRole;

/// Immutable role → device binding produced once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    bindings: BTreeMap<DeviceRole, BlockDevice>,
}

impl Classification {
    pub fn device(&self, role: DeviceRole) -> Option<&BlockDevice> {
        self.bindings.get(&role)
    }

    pub fn path(&self, role: DeviceRole) -> Option<&Path> {
        self.bindings.get(&role).map(|d| d.path.as_path())
    }

    /// Bindings in role order
    pub fn iter(&self) -> impl Iterator<Item = (DeviceRole, &BlockDevice)> {
        self.bindings.iter().map(|(role, dev)| (*role, dev))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Classify `devices` into `roles`.
///
/// # Errors
///
/// `ClassificationError` listing every role no device could fill.
pub fn classify(
    devices: &[BlockDevice],
    roles: &[DeviceRole],
) -> Result<Classification, ClassificationError> {
    let mut bindings: BTreeMap<DeviceRole, BlockDevice> = BTreeMap::new();

    for device in devices.iter().filter(|d| d.is_disk()) {
        let gib = device.size_gib();
        let role = roles
            .iter()
            .copied()
            .find(|r| r.expected_gib() == gib && !bindings.contains_key(r));

        match role {
            Some(role) => {
                debug!(device = %device.path.display(), gib, %role, "bound device to role");
                bindings.insert(role, device.clone());
            }
            None => debug!(device = %device.path.display(), gib, "device not used"),
        }
    }

    let mut missing: Vec<DeviceRole> = roles
        .iter()
        .copied()
        .filter(|r| !bindings.contains_key(r))
        .collect();
    missing.dedup();

    if !missing.is_empty() {
        return Err(ClassificationError { missing });
    }

    for (role, device) in &bindings {
        info!("Role {} -> {} ({} GB)", role, device.path.display(), device.size_gib());
    }
    Ok(Classification { bindings })
}

/// Classify against the roles a topology requires.
pub fn classify_for(
    devices: &[BlockDevice],
    topology: &Topology,
) -> Result<Classification, ClassificationError> {
    classify(devices, &topology.required_roles())
}
