//! vmstorage library
//!
//! Idempotent storage provisioning for freshly created virtual machines:
//! classify raw disks by size, sanitize them, converge the LVM stack onto a
//! declarative topology, mount and persist the result.

pub mod cli;
pub mod config_file;
pub mod engine;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod process_guard;
pub mod provision_state;
pub mod sanity;
pub mod tool_runner;
pub mod tool_traits;
pub mod tools;
pub mod topology;
pub mod types;

// Re-export main types for convenience
pub use config_file::ProvisionConfig;
pub use engine::classifier::{Classification, classify};
pub use engine::reconciler::{Entity, EntityState, ReconcilePlan, Reconciler, StorageOp};
pub use error::{ClassificationError, Issue, IssueKind, ProvisionError, Severity};
pub use host::{BlockDevice, LinuxHost, MemoryHost, StorageHost};
pub use orchestrator::{DryRunPlan, Orchestrator, RunReport};
pub use process_guard::{CommandProcessGroup, ToolRegistry};
pub use provision_state::{ProvisionContext, ProvisionStage, StageTransitionError};
pub use tool_runner::{ToolOutput, run_tool};
pub use tool_traits::ToolArgs;
pub use topology::Topology;
pub use types::{DeviceRole, Filesystem, LvSize, VolumeUse};
