//! Type-safe arguments for account provisioning commands.
//!
//! This module provides typed argument structs for the shadow-utils tools:
//! - `CreateGroupArgs` for `groupadd`
//! - `CreateUserArgs` for `useradd`
//! - `SetPasswordArgs` for `chpasswd` (password via stdin, NOT CLI)
//! - `GrantAdminArgs` for `usermod --append --groups`
//!
//! # Security: Password Handling
//!
//! **CRITICAL**: Passwords MUST NOT appear in argv. CLI arguments are visible
//! in `/proc/<pid>/cmdline` to every process in the container.
//! `SetPasswordArgs` only ever emits the password through `stdin_payload()`.

use std::fmt;
use std::path::PathBuf;

use crate::command_traits::SystemCommand;

// ============================================================================
// Create Group
// ============================================================================

/// Type-safe arguments for `groupadd`.
///
/// Fails (exit 4 or 9) when the GID or the name is already taken. The runner
/// treats that as fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateGroupArgs {
    /// Group name.
    pub name: String,
    /// Fixed numeric GID.
    pub gid: u32,
}

impl SystemCommand for CreateGroupArgs {
    fn program(&self) -> &str {
        "groupadd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--gid".to_string(), self.gid.to_string(), self.name.clone()]
    }
}

// ============================================================================
// Create User
// ============================================================================

/// Type-safe arguments for `useradd`.
///
/// # Field to Flag Mapping
///
/// | Rust Field      | CLI Flag        | Notes |
/// |-----------------|-----------------|-------|
/// | `home`          | `--home-dir`    | Always created (`--create-home`) |
/// | `shell`         | `--shell`       | Login shell |
/// | `uid`           | `--uid`         | Fixed UID |
/// | `primary_group` | `--gid`         | Optional group attached at creation |
/// | `name`          | positional      | Login name |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserArgs {
    /// Login name.
    pub name: String,
    /// Numeric UID.
    pub uid: u32,
    /// Login shell.
    pub shell: PathBuf,
    /// Home directory to create.
    pub home: PathBuf,
    /// Group to attach the user to.
    pub primary_group: Option<String>,
}

impl SystemCommand for CreateUserArgs {
    fn program(&self) -> &str {
        "useradd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--create-home".to_string(),
            "--home-dir".to_string(),
            self.home.display().to_string(),
            "--shell".to_string(),
            self.shell.display().to_string(),
            "--uid".to_string(),
            self.uid.to_string(),
        ];
        if let Some(ref group) = self.primary_group {
            args.push("--gid".to_string());
            args.push(group.clone());
        }
        args.push(self.name.clone());
        args
    }
}

// ============================================================================
// Set Password
// ============================================================================

/// Type-safe arguments for `chpasswd`.
///
/// Writes `user:password` straight into the shadow database. No strength
/// rules are applied.
#[derive(Clone, PartialEq, Eq)]
pub struct SetPasswordArgs {
    /// Account to update.
    pub user: String,
    /// Plaintext password (stdin only).
    pub password: String,
}

impl fmt::Debug for SetPasswordArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetPasswordArgs")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SystemCommand for SetPasswordArgs {
    fn program(&self) -> &str {
        "chpasswd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![]
    }

    fn stdin_payload(&self) -> Option<String> {
        Some(format!("{}:{}\n", self.user, self.password))
    }

    fn display(&self) -> String {
        format!("chpasswd <<< '{}:<redacted>'", self.user)
    }
}

// ============================================================================
// Grant Admin
// ============================================================================

/// Type-safe arguments for adding a user to the admin (sudo) group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantAdminArgs {
    /// Account to elevate.
    pub user: String,
    /// Group allowed to escalate privileges.
    pub admin_group: String,
}

impl SystemCommand for GrantAdminArgs {
    fn program(&self) -> &str {
        "usermod"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--append".to_string(),
            "--groups".to_string(),
            self.admin_group.clone(),
            self.user.clone(),
        ]
    }
}

// ============================================================================
// Tests
// ============================================================================
