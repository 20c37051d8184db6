//! Type-safe storage tool argument modules.
//!
//! Each struct implements `ToolArgs` and maps Rust fields to the exact CLI
//! flags expected by the corresponding utility.

pub mod disk;
pub mod fs;
pub mod lvm;
