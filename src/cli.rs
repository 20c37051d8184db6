use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// vmstorage - provision LVM storage on a freshly created VM
///
/// Discovers the attached raw disks by size, builds the volume groups and
/// logical volumes, mounts them and records them in the mount table. Safe
/// to re-run: anything already in place is left alone.
#[derive(Parser, Debug)]
#[command(name = "vmstorage")]
#[command(version)]
pub struct Cli {
    /// Show what would be done without changing anything.
    ///
    /// Devices are still listed and classified so the preview reflects the
    /// real machine.
    #[arg(long)]
    pub dry_run: bool,

    /// JSON configuration overriding the built-in topology
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Mount table to update (overrides the configuration)
    #[arg(long, value_name = "PATH")]
    pub fstab: Option<PathBuf>,

    /// Treat warnings (failed wipe, unmount or swapon) as fatal
    #[arg(long)]
    pub strict: bool,

    /// Skip root and required-binary checks (development only)
    #[arg(long)]
    pub skip_preflight: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Default log filter for the requested verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
