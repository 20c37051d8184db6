//! Error handling module for vmstorage
//!
//! Provides the domain error type shared by every provisioning stage.
//! Tool and host layers use `anyhow` internally; stage boundaries convert
//! into `ProvisionError` carrying the name of the failing entity.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::DeviceRole;

/// Main error type for vmstorage. Every variant is fatal for the run.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// One or more required device roles found no matching disk
    #[error(transparent)]
    Classification(#[from] ClassificationError),

    /// A create-if-absent operation failed on its creation path
    #[error("Failed to create {entity}: {reason}")]
    Create { entity: String, reason: String },

    /// A prerequisite entity was not confirmed present before creation
    #[error("Cannot create {entity}: {missing} is not present")]
    Dependency { entity: String, missing: String },

    /// Mounting a logical volume failed or its mountpoint is taken
    #[error("Failed to mount {device} at {mountpoint}: {reason}")]
    Mount {
        device: PathBuf,
        mountpoint: PathBuf,
        reason: String,
    },

    /// An entity was moved through its lifecycle out of order
    #[error("Invalid state change for {entity}: {from} -> {to}")]
    InvalidTransition { entity: String, from: String, to: String },

    /// Final verification found a gap in device→PV→VG→LV→fs→mount
    #[error("Storage chain broken: {0}")]
    ChainBroken(String),

    /// Live state could not be read
    #[error("Failed to query {what}: {reason}")]
    Query { what: String, reason: String },

    /// Persisted mount table could not be backed up or updated
    #[error("Mount table error: {0}")]
    MountTable(String),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stage issue the severity policy treats as fatal
    #[error("{0}")]
    Escalated(Issue),

    /// Root or required binaries missing
    #[error("Preflight check failed: {0}")]
    Preflight(String),

    /// Stage sequencing violated
    #[error(transparent)]
    Transition(#[from] crate::provision_state::StageTransitionError),
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a creation-path failure for `entity`
    pub fn create(entity: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::Create {
            entity: entity.to_string(),
            reason: format!("{:#}", reason),
        }
    }

    /// Create an unmet-dependency failure
    pub fn dependency(entity: impl fmt::Display, missing: impl fmt::Display) -> Self {
        Self::Dependency {
            entity: entity.to_string(),
            missing: missing.to_string(),
        }
    }

    /// Create a query failure
    pub fn query(what: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Query {
            what: what.into(),
            reason: format!("{:#}", reason),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a broken-chain error
    pub fn chain(msg: impl Into<String>) -> Self {
        Self::ChainBroken(msg.into())
    }

    /// Exit code the binary should use for this error.
    ///
    /// Configuration problems follow clap's usage convention (2); every
    /// other fatal stage exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Device classification left required roles unfilled.
///
/// All missing roles are reported together rather than failing on the first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No device found for role(s): {}", format_roles(.missing))]
pub struct ClassificationError {
    pub missing: Vec<DeviceRole>,
}

fn format_roles(roles: &[DeviceRole]) -> String {
    roles
        .iter()
        .map(|r| format!("{} ({} GB)", r, r.expected_gib()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// How the orchestrator treats a recorded issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Log and continue
    Warning,
    /// Abort the run with a non-zero exit
    Fatal,
}

/// Kinds of non-aborting problems a stage can report.
///
/// Stages never decide severity themselves; the orchestrator maps each
/// kind through its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// A targeted device disappeared between discovery and sanitization
    DeviceMissing,
    /// Unmounting a partition, or turning off its swap, before the wipe failed
    UnmountFailed,
    /// wipefs, sgdisk or partprobe failed
    WipeFailed,
    /// swapon failed (the area may be active through another path)
    SwapActivationFailed,
    /// Swap device found inactive during verification
    SwapInactive,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DeviceMissing => "device missing",
            Self::UnmountFailed => "unmount failed",
            Self::WipeFailed => "wipe failed",
            Self::SwapActivationFailed => "swap activation failed",
            Self::SwapInactive => "swap inactive",
        };
        f.write_str(s)
    }
}

/// A problem recorded by a stage, naming the entity it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub kind: IssueKind,
    pub entity: String,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, entity: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self {
            kind,
            entity: entity.to_string(),
            message: format!("{:#}", message),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.entity, self.kind, self.message)
    }
}
