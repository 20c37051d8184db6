//! Lifecycle management for storage tool processes
//!
//! A `wipefs` or `pvcreate` left running after vmstorage dies keeps mutating
//! disks nobody is watching. Every tool therefore runs in its own process
//! group with a parent-death signal, and its PID is tracked so a signal
//! received by vmstorage terminates the tool before the process exits.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static TOOL_REGISTRY: OnceLock<Arc<Mutex<ToolRegistry>>> = OnceLock::new();

/// PIDs (and process group IDs) of tools currently running
#[derive(Debug, Default)]
pub struct ToolRegistry {
    pids: HashSet<u32>,
}

impl ToolRegistry {
    /// Get or create the process-wide registry
    pub fn global() -> Arc<Mutex<ToolRegistry>> {
        TOOL_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ToolRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!(pid, "registered tool process");
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!(pid, "unregistered tool process");
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// SIGTERM every tracked process group, then SIGKILL whatever is still
    /// alive after `grace_period`.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.pids.is_empty() {
            return;
        }
        info!("Terminating {} running storage tool(s)", self.pids.len());

        let pids: Vec<u32> = self.pids.drain().collect();
        for &pid in &pids {
            if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                warn!(pid, error = %e, "SIGTERM to process group failed");
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in pids.iter().filter(|&&pid| is_process_alive(pid)) {
            warn!(pid, "tool did not exit after SIGTERM, sending SIGKILL");
            let _ = signal_group(pid, Signal::SIGKILL);
        }
    }
}

/// Signal a whole process group (negative PID)
fn signal_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// Alive means the PID exists and is not a zombie
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // Field 3 is the state; Z and X are finished processes.
        Ok(stat) => !matches!(stat.split_whitespace().nth(2), Some("Z") | Some("X")),
        Err(_) => true,
    }
}

/// Install SIGINT/SIGTERM/SIGHUP handling.
///
/// On a signal the running tool is terminated and the process exits with
/// 128 + signal number. There is no rollback of completed steps.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            warn!(signal = sig, "Received signal, stopping storage tools");
            if let Ok(mut registry) = ToolRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group that receives
    /// SIGTERM when vmstorage dies.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe setpgid and prctl.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
