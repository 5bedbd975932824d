use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config_file::BootstrapSettings;
use crate::types::{HandoffMode, SetupFailurePolicy, Variant};

/// container-bootstrap - Provision a container user, then run the container command
#[derive(Parser, Debug)]
#[command(name = "container-bootstrap")]
#[command(about = "Provision an OS user inside a container and hand off to the container command")]
#[command(version)]
#[command(after_help = "ENVIRONMENT:
    user        Login name to create (required)
    password    Password to assign (required)
    email       Address exported as receiver_email (workspace variant)

EXAMPLES:
    ENTRYPOINT [\"container-bootstrap\", \"run\", \"--\"]
    CMD [\"jupyter\", \"lab\"]

    container-bootstrap --variant docker run -- bash
    container-bootstrap --variant docker plan
")]
pub struct Cli {
    /// Entrypoint flavour (workspace, docker)
    #[arg(long, global = true, default_value_t = Variant::Workspace)]
    pub variant: Variant,

    /// JSON settings file overriding the built-in constants
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// What to do when the setup script fails (ignore, abort)
    #[arg(long, global = true, value_name = "POLICY")]
    pub setup_failure: Option<SetupFailurePolicy>,

    /// How to pass control to the command (supervise, exec)
    #[arg(long, global = true, value_name = "MODE")]
    pub handoff: Option<HandoffMode>,

    /// Dry-run mode: log what would be executed without making changes.
    ///
    /// No account is created and the profile is not written. The
    /// container command is not started.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the user, then hand off to COMMAND
    Run {
        /// Container command and its arguments
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },
    /// Print the provisioning steps without running them
    Plan,
    /// Validate the environment and settings file
    Validate,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Apply command-line overrides on top of loaded settings
    pub fn apply_overrides(&self, settings: &mut BootstrapSettings) {
        if let Some(policy) = self.setup_failure {
            settings.setup_failure = policy;
        }
        if let Some(mode) = self.handoff {
            settings.handoff = mode;
        }
    }
}
