//! Type-safe configuration types for container-bootstrap
//!
//! Stringly-typed choices (which entrypoint flavour, what to do when the
//! delegated setup script fails, how to hand off) are proper Rust enums so
//! they get compile-time validation and exhaustive matching.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Entrypoint flavour.
///
/// Both flavours create the same user; they differ in group handling,
/// working directory, and the exports appended to the shell profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Appends `source <env_file>` and the email export to `~/.bashrc`.
    #[default]
    #[strum(serialize = "workspace")]
    Workspace,
    /// Creates the fixed-GID docker users group, attaches the user to it and
    /// runs setup and hand-off from the user's home directory.
    #[strum(serialize = "docker")]
    Docker,
}

impl Variant {
    /// Whether this variant creates and attaches the fixed-GID group
    pub const fn creates_group(self) -> bool {
        matches!(self, Self::Docker)
    }

    /// Whether this variant appends exports to the user's shell profile
    pub const fn appends_exports(self) -> bool {
        matches!(self, Self::Workspace)
    }

    /// Whether setup and hand-off run from the user's home directory
    pub const fn enters_home(self) -> bool {
        matches!(self, Self::Docker)
    }
}

/// What to do when the delegated setup script exits unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SetupFailurePolicy {
    /// Log a warning and keep going
    #[default]
    Ignore,
    /// Fail the bootstrap before the hand-off
    Abort,
}

/// How control passes to the container command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HandoffMode {
    /// Spawn the command, forward signals, exit with its status
    #[default]
    Supervise,
    /// Replace the runner's process image with the command
    Exec,
}
