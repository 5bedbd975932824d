//! Type-safe system command contracts.
//!
//! This module provides the `SystemCommand` trait for ensuring compile-time
//! correctness of provisioning commands. Instead of raw string vectors, each
//! step is a Rust struct that produces its program, arguments and stdin.
//!
//! # Design Goals
//!
//! 1. **Compile-Time Safety**: Flag mismatches (e.g., `--gid` vs `--groups`)
//!    live in one `to_cli_args()` and are covered by unit tests.
//! 2. **Single Source of Truth**: The struct definition IS the contract.
//! 3. **Secrets off the command line**: Passwords travel on stdin, never in
//!    argv, which is readable by anyone through `/proc/<pid>/cmdline`.

use std::path::Path;

/// Trait for typed system commands.
///
/// # Contract
///
/// - `program()`: The executable, resolved through `PATH`.
/// - `to_cli_args()`: Arguments exactly as the program expects them.
/// - `stdin_payload()`: Bytes written to the child's stdin, if any.
/// - `display()`: A log-safe rendering; must never contain secrets.
///
/// # Example
///
/// ```
/// use container_bootstrap::command_traits::SystemCommand;
/// use container_bootstrap::commands::account::GrantAdminArgs;
///
/// let args = GrantAdminArgs {
///     user: "alice".to_string(),
///     admin_group: "sudo".to_string(),
/// };
///
/// assert_eq!(args.program(), "usermod");
/// assert_eq!(args.to_cli_args(), vec!["--append", "--groups", "sudo", "alice"]);
/// ```
pub trait SystemCommand {
    /// Executable name or path.
    fn program(&self) -> &str;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Data fed to the child's stdin. `None` leaves stdin at /dev/null.
    fn stdin_payload(&self) -> Option<String> {
        None
    }

    /// Working directory for the child. `None` inherits the runner's.
    fn workdir(&self) -> Option<&Path> {
        None
    }

    /// Whether the command changes system state.
    ///
    /// Mutating commands are skipped in dry-run mode.
    fn is_mutating(&self) -> bool {
        true
    }

    /// Human-readable command line for logs and error messages.
    ///
    /// Built from argv only, so anything passed on stdin stays out of it.
    fn display(&self) -> String {
        let mut line = self.program().to_string();
        for arg in self.to_cli_args() {
            line.push(' ');
            line.push_str(&shell_quote(&arg));
        }
        line
    }
}

/// Quote a string for a POSIX shell.
///
/// Strings made only of safe characters come back unchanged, everything else
/// is wrapped in single quotes with embedded quotes escaped.
pub fn shell_quote(s: &str) -> String {
    let is_safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c);

    if !s.is_empty() && s.chars().all(is_safe) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
