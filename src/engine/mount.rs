//! Runtime mount and swap state.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Issue, IssueKind, ProvisionError, Result};
use crate::host::{MountState, StorageHost};

/// What `ensure_mounted` found or did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    AlreadyMounted,
    Mounted,
}

/// Mount `device` at `mountpoint` unless it is already mounted there.
///
/// The mountpoint directory is created if needed.
///
/// # Errors
///
/// `ProvisionError::Mount` if the mount fails or another device occupies
/// the mountpoint.
pub fn ensure_mounted<H: StorageHost + ?Sized>(
    host: &mut H,
    device: &Path,
    mountpoint: &Path,
    fstype: &str,
) -> Result<MountOutcome> {
    let mount_error = |reason: String| ProvisionError::Mount {
        device: device.to_path_buf(),
        mountpoint: mountpoint.to_path_buf(),
        reason,
    };

    host.ensure_directory(mountpoint)
        .map_err(|e| mount_error(format!("cannot create mountpoint: {:#}", e)))?;

    let state = host
        .mount_state(device, mountpoint)
        .map_err(|e| ProvisionError::query(format!("mount state of {}", mountpoint.display()), e))?;
    debug!(device = %device.display(), mountpoint = %mountpoint.display(), ?state, "mount guard");

    match state {
        MountState::Mounted => {
            info!("{} already mounted at {}", device.display(), mountpoint.display());
            Ok(MountOutcome::AlreadyMounted)
        }
        MountState::MountedOther(other) => Err(mount_error(format!(
            "mountpoint is occupied by {}",
            other.display()
        ))),
        MountState::NotMounted => {
            info!("Mounting {} at {}", device.display(), mountpoint.display());
            host.mount(device, mountpoint, fstype)
                .map_err(|e| mount_error(format!("{:#}", e)))?;
            Ok(MountOutcome::Mounted)
        }
    }
}

/// Activate `device` as swap unless that device is already active.
///
/// Activation failure is returned as an issue, not an error.
///
/// # Errors
///
/// Only a failed swap-state query.
pub fn ensure_swap_active<H: StorageHost + ?Sized>(
    host: &mut H,
    device: &Path,
) -> Result<Option<Issue>> {
    let active = host
        .swap_active(device)
        .map_err(|e| ProvisionError::query(format!("swap state of {}", device.display()), e))?;
    if active {
        info!("Swap on {} already active", device.display());
        return Ok(None);
    }

    info!("Activating swap on {}", device.display());
    match host.activate_swap(device) {
        Ok(()) => Ok(None),
        Err(e) => {
            warn!("swapon {} failed: {:#}", device.display(), e);
            Ok(Some(Issue::new(IssueKind::SwapActivationFailed, device.display(), e)))
        }
    }
}
