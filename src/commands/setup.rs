//! Type-safe arguments for the delegated environment setup.
//!
//! The setup script (conda environment creation and friends) must run as the
//! freshly created user so everything it writes is owned by that user. The
//! runner drops privileges with `su <user> -c <script>` and waits for it.

use std::path::{Path, PathBuf};

use crate::command_traits::{SystemCommand, shell_quote};

/// Type-safe arguments for running the setup script as the target user.
///
/// # Field to Flag Mapping
///
/// | Rust Field | Flag        | Notes |
/// |------------|-------------|-------|
/// | `user`     | positional  | Account to switch to |
/// | `script`   | `-c`        | Shell-quoted, run by the user's shell |
/// | `workdir`  | (cwd)       | Set on the child, not passed to `su` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSetupScriptArgs {
    /// Account to run as (must exist).
    pub user: String,
    /// Absolute path of the setup script.
    pub script: PathBuf,
    /// Working directory for the script.
    pub workdir: Option<PathBuf>,
}

impl SystemCommand for RunSetupScriptArgs {
    fn program(&self) -> &str {
        "su"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            self.user.clone(),
            "-c".to_string(),
            shell_quote(&self.script.display().to_string()),
        ]
    }

    fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }
}
