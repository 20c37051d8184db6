//! Type-safe storage tool argument contracts.
//!
//! Each external utility gets a struct implementing `ToolArgs`; the struct
//! definition is the single source of truth for the flags passed to it, so
//! flag mismatches are caught at compile time rather than on a live disk.

/// Trait for typed tool arguments.
///
/// # Contract
///
/// - `program()`: binary name, resolved through `PATH` at execution time.
/// - `to_cli_args()`: arguments exactly as the tool expects them.
/// - `get_env_vars()`: extra environment for the tool (locale pinning etc.).
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
/// use vmstorage::tool_traits::ToolArgs;
/// use vmstorage::tools::lvm::PvCreateArgs;
///
/// let args = PvCreateArgs { device: PathBuf::from("/dev/sdb"), force: true };
/// assert_eq!(args.program(), "pvcreate");
/// assert_eq!(args.to_cli_args(), vec!["--force", "--yes", "/dev/sdb"]);
/// ```
pub trait ToolArgs {
    /// Binary to execute (e.g. "pvcreate").
    fn program(&self) -> &'static str;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Environment variables the tool needs.
    ///
    /// Defaults to pinning the C locale so that messages and reports do not
    /// change with the host's language settings.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![("LC_ALL".to_string(), "C".to_string())]
    }

    /// Human-readable command line for logs
    fn display_command(&self) -> String {
        let mut parts = vec![self.program().to_string()];
        parts.extend(self.to_cli_args());
        parts.join(" ")
    }
}
