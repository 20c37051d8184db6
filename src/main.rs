//! vmstorage - Main entry point
//!
//! Parses flags, loads configuration, runs preflight and hands a
//! `LinuxHost` to the orchestrator. Exit codes: 0 success, 1 fatal stage,
//! 2 configuration error, 128+N when stopped by a signal.

use std::process::ExitCode;

use chrono::Local;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use vmstorage::cli::Cli;
use vmstorage::config_file::ProvisionConfig;
use vmstorage::error::Result;
use vmstorage::host::LinuxHost;
use vmstorage::orchestrator::Orchestrator;
use vmstorage::{process_guard, sanity};

/// Log to stderr; `RUST_LOG` overrides the verbosity flags
fn init_logger(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn load_config(cli: &Cli) -> Result<ProvisionConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ProvisionConfig::load_from_file(path)?
        }
        None => ProvisionConfig::new(),
    };
    if let Some(fstab) = &cli.fstab {
        config.fstab_path = fstab.clone();
    }
    if cli.strict {
        config.strict = true;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    if cli.skip_preflight {
        warn!("Pre-flight checks skipped");
    } else {
        sanity::run_preflight_checks(&config.topology)?;
    }

    let mut orchestrator = Orchestrator::new(LinuxHost::new(), config);

    if cli.dry_run {
        info!("Dry run: nothing will be changed");
        let plan = orchestrator.plan()?;
        print!("{}", plan.summary());
        return Ok(());
    }

    let report = orchestrator.run(Local::now().date_naive())?;
    debug!(
        created = report.reconcile.created.len(),
        existing = report.reconcile.existing.len(),
        fstab_lines = report.persist.appended.len(),
        "run summary"
    );
    for warning in &report.warnings {
        warn!("Warning: {}", warning);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.log_level());
    info!("vmstorage {} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
