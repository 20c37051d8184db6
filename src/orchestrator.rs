//! Orchestrator
//!
//! Runs the stages in order against a `StorageHost`, narrating each step,
//! and stops at the first fatal error. Stages report issues; whether an
//! issue is fatal is decided here and only here.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::config_file::ProvisionConfig;
use crate::engine::classifier::{Classification, classify_for};
use crate::engine::fstab::{self, FstabEntry, MountTable, PersistReport};
use crate::engine::mount::{MountOutcome, ensure_mounted, ensure_swap_active};
use crate::engine::reconciler::{ReconcilePlan, ReconcileReport, Reconciler};
use crate::engine::sanitizer::{self, SanitizeDecision, SanitizeReport, SanitizeTarget};
use crate::engine::verify::verify_chain;
use crate::error::{Issue, IssueKind, ProvisionError, Result, Severity};
use crate::host::{BlockDevice, StorageHost};
use crate::provision_state::{ProvisionContext, ProvisionStage};
use crate::types::VolumeUse;

/// Severity of each issue kind. Under `strict` every issue is fatal.
pub const fn severity_of(kind: IssueKind, strict: bool) -> Severity {
    if strict {
        return Severity::Fatal;
    }
    match kind {
        IssueKind::DeviceMissing
        | IssueKind::UnmountFailed
        | IssueKind::WipeFailed
        | IssueKind::SwapActivationFailed
        | IssueKind::SwapInactive => Severity::Warning,
    }
}

/// Everything a successful run did
#[derive(Debug, Clone)]
pub struct RunReport {
    pub classification: Classification,
    pub sanitize: SanitizeReport,
    pub reconcile: ReconcileReport,
    /// Mountpoints mounted by this run
    pub mounted: Vec<PathBuf>,
    pub persist: PersistReport,
    pub warnings: Vec<Issue>,
}

/// What a run would do, computed without changing anything
#[derive(Debug, Clone)]
pub struct DryRunPlan {
    pub classification: Classification,
    pub sanitize: Vec<(PathBuf, SanitizeDecision)>,
    pub reconcile: ReconcilePlan,
    pub mounts: Vec<(PathBuf, String)>,
    pub fstab_missing: Vec<FstabEntry>,
}

impl DryRunPlan {
    pub fn summary(&self) -> String {
        let mut out = String::from("Classification:\n");
        for (role, device) in self.classification.iter() {
            let _ = writeln!(
                out,
                "  {} -> {} ({} GB)",
                role,
                device.path.display(),
                device.size_gib()
            );
        }
        out.push_str("Sanitize:\n");
        for (device, decision) in &self.sanitize {
            let action = match decision {
                SanitizeDecision::Wipe => "wipe",
                SanitizeDecision::AlreadyProvisioned => "skip (already provisioned)",
                SanitizeDecision::Missing => "skip (missing)",
            };
            let _ = writeln!(out, "  {}: {}", device.display(), action);
        }
        out.push_str(&self.reconcile.summary());
        out.push_str("\nMounts:\n");
        for (device, target) in &self.mounts {
            let _ = writeln!(out, "  {} -> {}", device.display(), target);
        }
        if self.fstab_missing.is_empty() {
            out.push_str("Mount table: up to date\n");
        } else {
            out.push_str("Mount table additions:\n");
            for entry in &self.fstab_missing {
                let _ = writeln!(out, "  {}", entry);
            }
        }
        out
    }
}

pub struct Orchestrator<H: StorageHost> {
    host: H,
    config: ProvisionConfig,
    context: ProvisionContext,
}

impl<H: StorageHost> Orchestrator<H> {
    pub fn new(host: H, config: ProvisionConfig) -> Self {
        Self {
            host,
            config,
            context: ProvisionContext::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn context(&self) -> &ProvisionContext {
        &self.context
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// Run every stage. `date` names the mount table backup.
    ///
    /// # Errors
    ///
    /// The first fatal error; the context is left in `Failed`.
    pub fn run(&mut self, date: NaiveDate) -> Result<RunReport> {
        match self.run_stages(date) {
            Ok(report) => {
                self.advance()?;
                if report.warnings.is_empty() {
                    info!("Provisioning complete");
                } else {
                    info!("Provisioning complete with {} warning(s)", report.warnings.len());
                }
                Ok(report)
            }
            Err(e) => {
                let stage = self.context.current_stage();
                error!("{} failed: {}", stage, e);
                if let Err(te) = self.context.fail() {
                    warn!("{}", te);
                }
                Err(e)
            }
        }
    }

    fn run_stages(&mut self, date: NaiveDate) -> Result<RunReport> {
        let strict = self.config.strict;
        let mut warnings = Vec::new();

        self.advance()?;
        let devices = self.discover()?;

        self.advance()?;
        let classification = classify_for(&devices, &self.config.topology)?;

        let targets = SanitizeTarget::from_classification(&classification, &self.config.topology);
        if self.advance()?.is_destructive() {
            for target in &targets {
                warn!("Erasing {} ({} GB)", target.device.path.display(), target.device.size_gib());
            }
        }
        let sanitize = sanitizer::sanitize(&mut self.host, &targets, self.config.settle_delay())?;
        absorb(&mut warnings, &sanitize.issues, strict)?;

        self.advance()?;
        let reconcile =
            Reconciler::new(&self.config.topology, &classification).apply(&mut self.host)?;

        self.advance()?;
        let mut mounted = Vec::new();
        for (mount, lv) in self.config.topology.mounts_with_volumes() {
            let device = lv.device_path();
            match (lv.usage, &mount.mountpoint) {
                (VolumeUse::Swap, _) => {
                    if let Some(issue) = ensure_swap_active(&mut self.host, &device)? {
                        absorb(&mut warnings, &[issue], strict)?;
                    }
                }
                (VolumeUse::Data(fs), Some(mountpoint)) => {
                    let outcome =
                        ensure_mounted(&mut self.host, &device, mountpoint, fs.signature())?;
                    if outcome == MountOutcome::Mounted {
                        mounted.push(mountpoint.clone());
                    }
                }
                (VolumeUse::Data(_), None) => {
                    return Err(ProvisionError::config(format!(
                        "data volume '{}' needs a mountpoint",
                        lv.name
                    )));
                }
            }
        }

        self.advance()?;
        let table = MountTable::new(&self.config.fstab_path);
        let wanted = fstab::entries_for(&self.config.topology);
        let persist = fstab::ensure_persisted(&table, &wanted, date)?;

        self.advance()?;
        let issues = verify_chain(&self.host, &self.config.topology, &classification, &table)?;
        absorb(&mut warnings, &issues, strict)?;

        Ok(RunReport {
            classification,
            sanitize,
            reconcile,
            mounted,
            persist,
            warnings,
        })
    }

    /// Compute what `run` would do without changing anything.
    ///
    /// # Errors
    ///
    /// Discovery, classification or query failures.
    pub fn plan(&self) -> Result<DryRunPlan> {
        let topology = &self.config.topology;
        let devices = self.discover()?;
        let classification = classify_for(&devices, topology)?;

        let mut sanitize = Vec::new();
        for target in SanitizeTarget::from_classification(&classification, topology) {
            let decision = sanitizer::decide(&self.host, &target)?;
            sanitize.push((target.device.path, decision));
        }

        let reconcile = Reconciler::new(topology, &classification).plan(&self.host)?;

        let mounts = topology
            .mounts_with_volumes()
            .map(|(mount, lv)| {
                let target = mount
                    .mountpoint
                    .as_ref()
                    .map_or_else(|| "swap".to_string(), |p| p.display().to_string());
                (lv.device_path(), target)
            })
            .collect();

        let table = MountTable::new(&self.config.fstab_path);
        let fstab_missing = fstab::missing_entries(&table, &fstab::entries_for(topology))?;

        Ok(DryRunPlan {
            classification,
            sanitize,
            reconcile,
            mounts,
            fstab_missing,
        })
    }

    fn discover(&self) -> Result<Vec<BlockDevice>> {
        let devices = self
            .host
            .block_devices()
            .map_err(|e| ProvisionError::query("block devices", e))?;
        info!("Found {} block device(s)", devices.len());
        Ok(devices)
    }

    fn advance(&mut self) -> Result<ProvisionStage> {
        let stage = self.context.advance()?;
        info!("==> {}", stage);
        Ok(stage)
    }
}

/// Apply the severity policy: warnings are logged and kept, a fatal issue
/// ends the run.
fn absorb(warnings: &mut Vec<Issue>, issues: &[Issue], strict: bool) -> Result<()> {
    for issue in issues {
        match severity_of(issue.kind, strict) {
            Severity::Warning => {
                warn!("{}", issue);
                warnings.push(issue.clone());
            }
            Severity::Fatal => return Err(ProvisionError::Escalated(issue.clone())),
        }
    }
    Ok(())
}
