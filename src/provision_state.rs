//! Provisioning State Machine
//!
//! The orchestrator owns a `ProvisionContext` and moves it forward one stage
//! at a time. Skipping a stage, going backwards or leaving a terminal state
//! is rejected, so the stage order cannot drift from the dependency order of
//! the storage stack.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! Discovering
//!     ↓
//! Classifying
//!     ↓
//! Sanitizing
//!     ↓
//! Reconciling
//!     ↓
//! Mounting
//!     ↓
//! Persisting
//!     ↓
//! Verifying
//!     ↓
//! Completed
//!
//! (Any non-terminal stage can transition to Failed)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Provisioning stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProvisionStage {
    NotStarted = 0,
    /// Listing block devices
    Discovering = 1,
    /// Binding devices to roles
    Classifying = 2,
    /// Wiping classified devices. Destructive.
    Sanitizing = 3,
    /// PV → VG → LV → filesystem/swap
    Reconciling = 4,
    /// Runtime mounts and swap activation
    Mounting = 5,
    /// Mount table entries
    Persisting = 6,
    /// Full chain check
    Verifying = 7,
    Completed = 8,
    Failed = 255,
}

impl ProvisionStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if this stage erases data
    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Sanitizing)
    }

    /// Returns the next stage in the sequence, or None if at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Discovering),
            Self::Discovering => Some(Self::Classifying),
            Self::Classifying => Some(Self::Sanitizing),
            Self::Sanitizing => Some(Self::Reconciling),
            Self::Reconciling => Some(Self::Mounting),
            Self::Mounting => Some(Self::Persisting),
            Self::Persisting => Some(Self::Verifying),
            Self::Verifying => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Discovering => "Discovering block devices",
            Self::Classifying => "Classifying devices",
            Self::Sanitizing => "Sanitizing devices",
            Self::Reconciling => "Reconciling LVM stack",
            Self::Mounting => "Mounting volumes",
            Self::Persisting => "Persisting mount table",
            Self::Verifying => "Verifying storage chain",
            Self::Completed => "Provisioning complete",
            Self::Failed => "Provisioning failed",
        }
    }

    /// All stages in order (excluding Failed)
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::NotStarted,
            Self::Discovering,
            Self::Classifying,
            Self::Sanitizing,
            Self::Reconciling,
            Self::Mounting,
            Self::Persisting,
            Self::Verifying,
            Self::Completed,
        ]
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Errors that can occur during stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("Cannot skip from {from} to {to}")]
    SkippedStage { from: ProvisionStage, to: ProvisionStage },

    #[error("Cannot go backwards from {from} to {to}")]
    BackwardTransition { from: ProvisionStage, to: ProvisionStage },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: ProvisionStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: ProvisionStage },
}

/// Owns the current stage of one provisioning run.
///
/// ```
/// use vmstorage::provision_state::{ProvisionContext, ProvisionStage};
///
/// let mut ctx = ProvisionContext::new();
/// ctx.advance().unwrap();
/// assert_eq!(ctx.current_stage(), ProvisionStage::Discovering);
/// assert!(ctx.transition_to(ProvisionStage::Reconciling).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ProvisionContext {
    current: ProvisionStage,
    failed_at: Option<ProvisionStage>,
    history: Vec<(ProvisionStage, DateTime<Utc>)>,
}

impl Default for ProvisionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionContext {
    pub fn new() -> Self {
        Self {
            current: ProvisionStage::NotStarted,
            failed_at: None,
            history: Vec::with_capacity(ProvisionStage::all_stages().len()),
        }
    }

    #[inline]
    pub fn current_stage(&self) -> ProvisionStage {
        self.current
    }

    /// Stage that was running when the run failed
    #[inline]
    pub fn failed_at(&self) -> Option<ProvisionStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == ProvisionStage::Completed
    }

    /// Stages entered so far, with the time each was entered
    pub fn history(&self) -> &[(ProvisionStage, DateTime<Utc>)] {
        &self.history
    }

    /// Advance to the next stage in sequence.
    ///
    /// # Errors
    ///
    /// `FromTerminalState` if already at Completed or Failed.
    pub fn advance(&mut self) -> Result<ProvisionStage, StageTransitionError> {
        match self.current.next() {
            Some(next) => self.transition_to(next),
            None => Err(StageTransitionError::FromTerminalState { from: self.current }),
        }
    }

    /// Transition to `target`, which must be the immediate next stage.
    ///
    /// # Errors
    ///
    /// Any transition other than one step forward from a non-terminal stage.
    pub fn transition_to(
        &mut self,
        target: ProvisionStage,
    ) -> Result<ProvisionStage, StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(StageTransitionError::AlreadyAtStage { stage: target });
        }
        if target != ProvisionStage::Failed && target.order() < self.current.order() {
            return Err(StageTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next() != Some(target) {
            return Err(StageTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }
        self.enter(target);
        Ok(target)
    }

    /// Mark the run as failed at the current stage.
    ///
    /// # Errors
    ///
    /// `FromTerminalState` if already at Completed or Failed.
    pub fn fail(&mut self) -> Result<(), StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        self.failed_at = Some(self.current);
        self.enter(ProvisionStage::Failed);
        Ok(())
    }

    fn enter(&mut self, stage: ProvisionStage) {
        self.history.push((stage, Utc::now()));
        self.current = stage;
    }
}
