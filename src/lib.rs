//! container-bootstrap Library
//!
//! This library provides the provisioning pipeline behind the
//! `container-bootstrap` entrypoint: validated environment configuration,
//! typed account commands, the stage machine, and the hand-off.

pub mod bootstrap;
pub mod cli;
pub mod command_runner;
pub mod command_traits;
pub mod commands;
pub mod config;
pub mod config_file;
pub mod error;
pub mod handoff;
pub mod process_guard;
pub mod sanity;
pub mod shell_profile;
pub mod types;

// Re-export main types for convenience
pub use bootstrap::{
    Bootstrap, BootstrapContext, BootstrapReport, BootstrapStage, SetupOutcome,
    StageTransitionError,
};
pub use command_runner::{CommandOutput, Executor, ProcessExecutor, RecordingExecutor};
pub use command_traits::SystemCommand;
pub use commands::account::{CreateGroupArgs, CreateUserArgs, GrantAdminArgs, SetPasswordArgs};
pub use commands::setup::RunSetupScriptArgs;
pub use config::{BootstrapConfig, EnvSource, ProcessEnv};
pub use config_file::BootstrapSettings;
pub use error::{BootstrapError, ConfigError};
pub use handoff::HandoffCommand;
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use shell_profile::ProfileExports;
pub use types::{HandoffMode, SetupFailurePolicy, Variant};
