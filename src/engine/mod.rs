//! Engine modules: the stages that turn a topology and a live host into
//! provisioned storage.
//!
//! Each stage takes what it needs by reference and returns a typed report.
//! None of them decide whether a recorded issue is fatal; the orchestrator
//! does that.

pub mod classifier;
pub mod fstab;
pub mod mount;
pub mod reconciler;
pub mod sanitizer;
pub mod verify;
