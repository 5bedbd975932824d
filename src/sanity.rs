//! Pre-flight sanity checks for the runtime environment
//!
//! This module verifies the container before anything is mutated:
//! - The shadow-utils binaries the variant needs are on `PATH`
//! - Running with root privileges (EUID 0)
//!
//! A failed check aborts the bootstrap with one error listing every problem.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{BootstrapError, Result};
use crate::types::Variant;

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }

    /// Turn a failed check into an error describing every problem
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }

        let mut problems = Vec::new();
        if !self.is_root {
            problems.push("must run as root to create users".to_string());
        }
        if !self.missing_binaries.is_empty() {
            problems.push(format!(
                "missing required binaries: {}",
                self.missing_binaries.join(", ")
            ));
        }
        Err(BootstrapError::preflight(problems.join("; ")))
    }
}

/// Binaries every variant needs
const REQUIRED_BINARIES: &[&str] = &[
    "useradd",  // Account creation (shadow-utils / passwd)
    "chpasswd", // Password injection
    "usermod",  // Admin group membership
    "su",       // Dropping to the new user for the setup script
];

/// Binaries required per variant
pub fn required_binaries(variant: Variant) -> Vec<&'static str> {
    let mut binaries = REQUIRED_BINARIES.to_vec();
    if variant.creates_group() {
        binaries.insert(0, "groupadd");
    }
    binaries
}

/// Find a binary the way the shell would, through `PATH`
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Check if running as root (EUID 0)
fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Perform all sanity checks for `variant` and return the result
pub fn verify_environment(variant: Variant) -> SanityCheckResult {
    let missing = required_binaries(variant)
        .into_iter()
        .filter(|binary| find_in_path(binary).is_none())
        .map(str::to_string)
        .collect();

    SanityCheckResult {
        missing_binaries: missing,
        is_root: is_running_as_root(),
    }
}
