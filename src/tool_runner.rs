//! Type-safe storage tool execution
//!
//! `run_tool` is the only place vmstorage spawns an external program. It
//! guarantees process group isolation, PID registration for signal cleanup,
//! a closed stdin (no tool may prompt), and captured output.

use crate::process_guard::{CommandProcessGroup, ToolRegistry};
use crate::tool_traits::ToolArgs;
use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use tracing::debug;

/// Execute a storage tool with type-safe arguments.
///
/// Blocks until the tool exits; there is no timeout.
///
/// # Returns
///
/// - `Ok(output)` - the tool ran; check `output.success` or `ensure_success`
/// - `Err` - the tool could not be spawned or waited for
pub fn run_tool<T: ToolArgs>(args: &T) -> Result<ToolOutput> {
    let program = args.program();
    let cli_args = args.to_cli_args();

    debug!(command = %args.display_command(), "running storage tool");

    let mut cmd = Command::new(program);
    cmd.args(&cli_args)
        .envs(args.get_env_vars())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;
    let pid = child.id();

    if let Ok(mut registry) = ToolRegistry::global().lock() {
        registry.register(pid);
    }

    let output = child.wait_with_output();

    if let Ok(mut registry) = ToolRegistry::global().lock() {
        registry.unregister(pid);
    }

    let output = output.with_context(|| format!("Failed waiting for {}", program))?;

    let result = ToolOutput {
        command: args.display_command(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
    };
    debug!(
        command = %result.command,
        exit_code = ?result.exit_code,
        "storage tool finished"
    );
    Ok(result)
}

/// Run a tool and turn a non-zero exit into an error.
pub fn run_tool_checked<T: ToolArgs>(args: &T) -> Result<ToolOutput> {
    let output = run_tool(args)?;
    output.ensure_success()?;
    Ok(output)
}

/// Output from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Command line that produced this output.
    pub command: String,
    /// Standard output from the tool.
    pub stdout: String,
    /// Standard error from the tool.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the tool exited successfully (exit code 0).
    pub success: bool,
}

impl ToolOutput {
    /// Check if the tool succeeded and return an error if not.
    pub fn ensure_success(&self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            let code = self.exit_code.unwrap_or(-1);
            anyhow::bail!(
                "`{}` failed (exit code {}): {}",
                self.command,
                code,
                self.stderr.trim()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    impl ToolArgs for Echo {
        fn program(&self) -> &'static str {
            "echo"
        }
        fn to_cli_args(&self) -> Vec<String> {
            vec![self.0.to_string()]
        }
    }

    struct False;

    impl ToolArgs for False {
        fn program(&self) -> &'static str {
            "false"
        }
        fn to_cli_args(&self) -> Vec<String> {
            vec![]
        }
    }

    struct Missing;

    impl ToolArgs for Missing {
        fn program(&self) -> &'static str {
            "vmstorage-no-such-tool-12345"
        }
        fn to_cli_args(&self) -> Vec<String> {
            vec![]
        }
    }

    #[test]
    fn test_run_tool_captures_stdout() {
        let output = run_tool(&Echo("hello")).expect("echo runs");
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.command, "echo hello");
    }

    #[test]
    fn test_failed_tool_reports_exit_code() {
        let output = run_tool(&False).expect("false runs");
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(1));
        let err = output.ensure_success().expect_err("non-zero exit");
        assert!(err.to_string().contains("exit code 1"));
        assert!(run_tool_checked(&False).is_err());
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let err = run_tool(&Missing).expect_err("cannot spawn");
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
