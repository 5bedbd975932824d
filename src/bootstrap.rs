//! Bootstrap pipeline and stage machine
//!
//! The runner provisions the container user in a fixed order and refuses to
//! continue past a failed step. `BootstrapContext` is the authoritative
//! record of how far the pipeline got.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! ValidatingConfig
//!     ↓
//! CreatingGroup        (docker variant only)
//!     ↓
//! CreatingUser
//!     ↓
//! SettingPassword
//!     ↓
//! GrantingPrivileges
//!     ↓
//! DelegatingSetup
//!     ↓
//! AppendingExports     (workspace variant only)
//!     ↓
//! ReadyForHandoff
//!
//! (Any stage can transition to Failed)
//! ```
//!
//! Stages a variant does not perform are skipped; the remaining ones must be
//! visited in order.

use std::fmt;
use std::path::PathBuf;

use nix::unistd::Uid;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command_runner::{CommandOutput, Executor};
use crate::command_traits::SystemCommand;
use crate::commands::account::{CreateGroupArgs, CreateUserArgs, GrantAdminArgs, SetPasswordArgs};
use crate::commands::setup::RunSetupScriptArgs;
use crate::config::BootstrapConfig;
use crate::config_file::BootstrapSettings;
use crate::error::{BootstrapError, Result};
use crate::shell_profile::{ProfileExports, primary_group_of};
use crate::types::{SetupFailurePolicy, Variant};

/// Bootstrap stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BootstrapStage {
    /// Nothing has run yet
    NotStarted = 0,
    /// Checking the environment configuration
    ValidatingConfig = 1,
    /// Creating the fixed-GID docker users group
    CreatingGroup = 2,
    /// Creating the account and its home directory
    CreatingUser = 3,
    /// Injecting the password into the shadow database
    SettingPassword = 4,
    /// Adding the account to the admin group
    GrantingPrivileges = 5,
    /// Running the setup script as the new user
    DelegatingSetup = 6,
    /// Appending exports to the user's shell profile
    AppendingExports = 7,
    /// Provisioning done; the container command may take over (terminal)
    ReadyForHandoff = 8,
    /// Provisioning failed (terminal)
    Failed = 255,
}

impl BootstrapStage {
    /// Returns the numeric order of this stage
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Returns true if this is a terminal state
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ReadyForHandoff | Self::Failed)
    }

    /// Whether `variant` performs this stage
    pub const fn applies_to(self, variant: Variant) -> bool {
        match self {
            Self::CreatingGroup => variant.creates_group(),
            Self::AppendingExports => variant.appends_exports(),
            _ => true,
        }
    }

    /// Returns the next stage `variant` performs, or None at a terminal state
    pub fn next_for(self, variant: Variant) -> Option<Self> {
        if self.is_terminal() {
            return None;
        }
        Self::all_stages()
            .iter()
            .copied()
            .find(|stage| stage.order() > self.order() && stage.applies_to(variant))
    }

    /// Returns a human-readable description of this stage
    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::ValidatingConfig => "Validating configuration",
            Self::CreatingGroup => "Creating group",
            Self::CreatingUser => "Creating user",
            Self::SettingPassword => "Setting password",
            Self::GrantingPrivileges => "Granting admin privileges",
            Self::DelegatingSetup => "Running setup script",
            Self::AppendingExports => "Appending shell exports",
            Self::ReadyForHandoff => "Ready for hand-off",
            Self::Failed => "Bootstrap failed",
        }
    }

    /// Returns all stages in order (excluding Failed)
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::NotStarted,
            Self::ValidatingConfig,
            Self::CreatingGroup,
            Self::CreatingUser,
            Self::SettingPassword,
            Self::GrantingPrivileges,
            Self::DelegatingSetup,
            Self::AppendingExports,
            Self::ReadyForHandoff,
        ]
    }
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    /// Attempted to skip a stage the variant performs
    #[error("Cannot skip from {from} to {to} (expected {expected})")]
    SkippedStage {
        from: BootstrapStage,
        to: BootstrapStage,
        expected: BootstrapStage,
    },

    /// Attempted to go backwards
    #[error("Cannot go backwards from {from} to {to}")]
    BackwardTransition {
        from: BootstrapStage,
        to: BootstrapStage,
    },

    /// Attempted to enter a stage the variant does not perform
    #[error("Stage {stage} does not apply to the {variant} variant")]
    NotApplicable {
        stage: BootstrapStage,
        variant: Variant,
    },

    /// Attempted to transition from a terminal state
    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: BootstrapStage },

    /// Attempted to transition to the same state
    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: BootstrapStage },
}

/// Context tracking bootstrap progress.
///
/// # Example
///
/// ```
/// use container_bootstrap::bootstrap::{BootstrapContext, BootstrapStage};
/// use container_bootstrap::types::Variant;
///
/// let mut ctx = BootstrapContext::new(Variant::Workspace);
/// ctx.transition_to(BootstrapStage::ValidatingConfig).unwrap();
///
/// // The workspace variant never creates the group
/// assert!(ctx.transition_to(BootstrapStage::CreatingGroup).is_err());
/// ctx.transition_to(BootstrapStage::CreatingUser).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct BootstrapContext {
    variant: Variant,
    current: BootstrapStage,
    failed_at: Option<BootstrapStage>,
    history: Vec<BootstrapStage>,
}

impl BootstrapContext {
    /// Create a context in the NotStarted state
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            current: BootstrapStage::NotStarted,
            failed_at: None,
            history: Vec::with_capacity(BootstrapStage::all_stages().len()),
        }
    }

    /// Stage at which failure occurred, if any
    #[inline]
    pub fn failed_at(&self) -> Option<BootstrapStage> {
        self.failed_at
    }

    /// Stages entered so far, in order
    pub fn history(&self) -> &[BootstrapStage] {
        &self.history
    }

    /// Advance to the next stage the variant performs
    pub fn advance(&mut self) -> std::result::Result<BootstrapStage, StageTransitionError> {
        let next = self
            .current
            .next_for(self.variant)
            .ok_or(StageTransitionError::FromTerminalState { from: self.current })?;
        self.enter(next);
        Ok(next)
    }

    /// Transition to `target`, which must be the next stage the variant performs.
    pub fn transition_to(
        &mut self,
        target: BootstrapStage,
    ) -> std::result::Result<(), StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        if target == BootstrapStage::Failed {
            self.fail();
            return Ok(());
        }
        if target == self.current {
            return Err(StageTransitionError::AlreadyAtStage { stage: target });
        }
        if target.order() < self.current.order() {
            return Err(StageTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if !target.applies_to(self.variant) {
            return Err(StageTransitionError::NotApplicable {
                stage: target,
                variant: self.variant,
            });
        }

        match self.current.next_for(self.variant) {
            Some(expected) if expected == target => {
                self.enter(target);
                Ok(())
            }
            Some(expected) => Err(StageTransitionError::SkippedStage {
                from: self.current,
                to: target,
                expected,
            }),
            None => Err(StageTransitionError::FromTerminalState { from: self.current }),
        }
    }

    /// Mark the bootstrap failed at the current stage
    pub fn fail(&mut self) {
        if self.current != BootstrapStage::Failed {
            self.failed_at = Some(self.current);
            self.current = BootstrapStage::Failed;
        }
    }

    fn enter(&mut self, stage: BootstrapStage) {
        debug!(stage = %stage, "entering stage");
        self.history.push(stage);
        self.current = stage;
    }
}

/// How the delegated setup script ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Exited 0 (or skipped in dry-run)
    Succeeded,
    /// Failed and the policy said to carry on
    IgnoredFailure(String),
}

/// What a completed bootstrap did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Stages entered, in order
    pub stages: Vec<BootstrapStage>,
    /// Result of the setup script
    pub setup: SetupOutcome,
    /// Lines appended to the profile (workspace variant)
    pub exports: Option<[String; 2]>,
    /// Directory the container command should start in
    pub handoff_workdir: Option<PathBuf>,
}

/// The bootstrap pipeline for one user.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    config: BootstrapConfig,
    settings: BootstrapSettings,
    variant: Variant,
    dry_run: bool,
}

impl Bootstrap {
    pub fn new(config: BootstrapConfig, settings: BootstrapSettings, variant: Variant) -> Self {
        Self {
            config,
            settings,
            variant,
            dry_run: false,
        }
    }

    /// Render the profile exports without writing them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn settings(&self) -> &BootstrapSettings {
        &self.settings
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// The user's home directory
    pub fn home(&self) -> PathBuf {
        self.settings.home_dir(&self.config.user)
    }

    /// Working directory for setup and hand-off, if the variant changes it
    pub fn workdir(&self) -> Option<PathBuf> {
        self.variant.enters_home().then(|| self.home())
    }

    /// Run every stage, stopping at the first failure.
    pub fn run(&self, executor: &mut dyn Executor) -> Result<BootstrapReport> {
        let mut ctx = BootstrapContext::new(self.variant);
        match self.run_stages(&mut ctx, executor) {
            Ok(report) => Ok(report),
            Err(e) => {
                ctx.fail();
                warn!(stage = ?ctx.failed_at(), "bootstrap aborted");
                Err(e)
            }
        }
    }

    fn run_stages(
        &self,
        ctx: &mut BootstrapContext,
        executor: &mut dyn Executor,
    ) -> Result<BootstrapReport> {
        let user = &self.config.user;

        ctx.transition_to(BootstrapStage::ValidatingConfig)?;
        self.config.validate()?;
        match self.variant {
            Variant::Docker => info!(user = %user, "provisioning user"),
            Variant::Workspace => debug!(user = %user, "provisioning user"),
        }

        let primary_group = if self.variant.creates_group() {
            ctx.transition_to(BootstrapStage::CreatingGroup)?;
            let group = CreateGroupArgs {
                name: self.settings.docker_group.clone(),
                gid: self.settings.docker_gid,
            };
            self.run_step(BootstrapStage::CreatingGroup, executor, &group)?;
            Some(group.name)
        } else {
            None
        };

        ctx.transition_to(BootstrapStage::CreatingUser)?;
        self.run_step(
            BootstrapStage::CreatingUser,
            executor,
            &CreateUserArgs {
                name: user.clone(),
                uid: self.settings.uid,
                shell: self.settings.shell.clone(),
                home: self.home(),
                primary_group,
            },
        )?;

        ctx.transition_to(BootstrapStage::SettingPassword)?;
        self.run_step(
            BootstrapStage::SettingPassword,
            executor,
            &SetPasswordArgs {
                user: user.clone(),
                password: self.config.password.clone(),
            },
        )?;

        ctx.transition_to(BootstrapStage::GrantingPrivileges)?;
        self.run_step(
            BootstrapStage::GrantingPrivileges,
            executor,
            &GrantAdminArgs {
                user: user.clone(),
                admin_group: self.settings.admin_group.clone(),
            },
        )?;

        ctx.transition_to(BootstrapStage::DelegatingSetup)?;
        let setup = self.delegate_setup(executor)?;

        let exports = if self.variant.appends_exports() {
            ctx.transition_to(BootstrapStage::AppendingExports)?;
            Some(self.append_exports()?)
        } else {
            None
        };

        ctx.transition_to(BootstrapStage::ReadyForHandoff)?;
        info!(user = %user, variant = %self.variant, "bootstrap complete");

        Ok(BootstrapReport {
            stages: ctx.history().to_vec(),
            setup,
            exports,
            handoff_workdir: self.workdir(),
        })
    }

    /// Run one provisioning command; any failure is fatal.
    fn run_step(
        &self,
        stage: BootstrapStage,
        executor: &mut dyn Executor,
        cmd: &dyn SystemCommand,
    ) -> Result<CommandOutput> {
        info!(stage = %stage, command = %cmd.display(), "running");
        let output = executor
            .execute(cmd)
            .map_err(|e| BootstrapError::StepSpawn {
                stage,
                message: format!("{:#}", e),
            })?;

        if output.success {
            Ok(output)
        } else {
            Err(BootstrapError::StepFailed {
                stage,
                command: cmd.display(),
                status: output.status_description(),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Run the setup script as the new user, honouring the failure policy.
    fn delegate_setup(&self, executor: &mut dyn Executor) -> Result<SetupOutcome> {
        let args = RunSetupScriptArgs {
            user: self.config.user.clone(),
            script: self.settings.setup_script.clone(),
            workdir: self.workdir(),
        };

        match self.run_step(BootstrapStage::DelegatingSetup, executor, &args) {
            Ok(_) => Ok(SetupOutcome::Succeeded),
            Err(e) => match self.settings.setup_failure {
                SetupFailurePolicy::Abort => Err(e),
                SetupFailurePolicy::Ignore => {
                    warn!(error = %e, "setup script failed, continuing (setup_failure = ignore)");
                    Ok(SetupOutcome::IgnoredFailure(e.to_string()))
                }
            },
        }
    }

    fn append_exports(&self) -> Result<[String; 2]> {
        let exports = ProfileExports {
            env_file: self.settings.env_file.clone(),
            email_var: self.settings.email_var.clone(),
            email: self.config.email.clone(),
        };
        if exports.email.is_none() {
            warn!(var = %exports.email_var, "email not set, exporting an empty value");
        }

        let profile = self.settings.profile_path(&self.config.user);
        if self.dry_run {
            for line in exports.lines() {
                info!("[DRY RUN] Would append to {}: {}", profile.display(), line);
            }
        } else {
            let group = primary_group_of(&self.config.user);
            exports.append_to(&profile, Uid::from_raw(self.settings.uid), group)?;
        }
        Ok(exports.lines())
    }
}
