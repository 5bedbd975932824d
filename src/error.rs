//! Error handling module for container-bootstrap
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every provisioning step reports failure through these types so the runner
//! can abort with context instead of continuing past a broken step.

use thiserror::Error;

use crate::bootstrap::{BootstrapStage, StageTransitionError};

/// Main error type for the bootstrap runner
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// IO errors (profile file, working directory, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment configuration errors (missing or invalid `user`, `password`, `email`)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A provisioning command exited unsuccessfully
    #[error("{stage} failed: `{command}` exited with {status}: {stderr}")]
    StepFailed {
        stage: BootstrapStage,
        command: String,
        status: String,
        stderr: String,
    },

    /// A provisioning command could not be spawned or awaited
    #[error("{stage} failed: {message}")]
    StepSpawn { stage: BootstrapStage, message: String },

    /// Pre-flight check errors (not root, missing binaries)
    #[error("Pre-flight check failed: {0}")]
    Preflight(String),

    /// Stage machine transition errors
    #[error("Stage transition error: {0}")]
    Transition(#[from] StageTransitionError),

    /// Hand-off errors (empty command, spawn failure)
    #[error("Hand-off failed: {message}")]
    Handoff { message: String, exit_code: i32 },
}

/// Result type alias for bootstrap operations
pub type Result<T> = std::result::Result<T, BootstrapError>;

impl BootstrapError {
    /// Create a pre-flight error
    pub fn preflight(msg: impl Into<String>) -> Self {
        Self::Preflight(msg.into())
    }

    /// Create a hand-off error carrying the exit code the runner should use
    pub fn handoff(msg: impl Into<String>, exit_code: i32) -> Self {
        Self::Handoff {
            message: msg.into(),
            exit_code,
        }
    }

    /// Exit code the process should terminate with for this error.
    ///
    /// Hand-off failures follow the shell convention (126 not executable,
    /// 127 not found); everything else is a plain failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Handoff { exit_code, .. } => *exit_code,
            _ => 1,
        }
    }
}

/// Validation errors for the environment configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable `{0}` is required but not set")]
    Missing(&'static str),

    #[error("environment variable `{0}` is not valid UTF-8")]
    NotUnicode(&'static str),

    #[error("invalid user name `{name}`: {reason}")]
    InvalidUser { name: String, reason: &'static str },

    #[error("invalid password: {0}")]
    InvalidPassword(&'static str),

    #[error("invalid email `{email}`: {reason}")]
    InvalidEmail { email: String, reason: &'static str },
}
