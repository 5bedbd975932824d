//! Type-Safe Command Execution
//!
//! Every provisioning command goes through an `Executor`. The production
//! executor, `ProcessExecutor`, guarantees:
//!
//! - Process group isolation and parent-death signal (death pact)
//! - PID registration for cleanup on SIGINT/SIGTERM
//! - Secrets on stdin, never in argv or logs
//!
//! `RecordingExecutor` runs nothing. It records what would have run, which
//! is what `plan` prints and what the tests assert on.

use crate::command_traits::SystemCommand;
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Something that can run a `SystemCommand`.
pub trait Executor {
    /// Run the command to completion.
    ///
    /// `Err` means the command could not be started or awaited. A command
    /// that ran and failed is `Ok` with `success == false`.
    fn execute(&mut self, cmd: &dyn SystemCommand) -> Result<CommandOutput>;
}

/// Output from a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output (empty when streamed to the terminal).
    pub stdout: String,
    /// Standard error (empty when streamed to the terminal).
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the command exited successfully (exit code 0).
    pub success: bool,
    /// Whether this was a dry-run (command was not actually executed).
    pub dry_run: bool,
}

impl CommandOutput {
    /// Output of a command that succeeded without printing anything
    pub fn succeeded() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
            dry_run: false,
        }
    }

    /// Output of a command that failed with `code`
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
            dry_run: false,
        }
    }

    /// Describe how the command ended, for error messages
    pub fn status_description(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "a signal".to_string(),
        }
    }
}

// ============================================================================
// Process Executor
// ============================================================================

/// Executes commands as real child processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor {
    dry_run: bool,
    streamed: Vec<String>,
}

impl ProcessExecutor {
    /// Create an executor. In dry-run mode mutating commands are only logged.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            streamed: Vec::new(),
        }
    }

    /// Let the named program write straight to the runner's stdout/stderr
    /// instead of being captured (long-running setup scripts).
    pub fn stream_output_of(mut self, program: impl Into<String>) -> Self {
        self.streamed.push(program.into());
        self
    }

    /// Where the child's stdin comes from
    fn stdin_source(&self, program: &str, has_payload: bool) -> StdinSource {
        if has_payload {
            StdinSource::Payload
        } else if self.streamed.iter().any(|p| p == program) {
            StdinSource::Inherit
        } else {
            StdinSource::Null
        }
    }
}

/// Stdin wiring for a provisioning child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StdinSource {
    /// Piped and fed the command's stdin payload
    Payload,
    /// The runner's own stdin (streamed programs)
    Inherit,
    /// `/dev/null`
    Null,
}

impl From<StdinSource> for Stdio {
    fn from(source: StdinSource) -> Self {
        match source {
            StdinSource::Payload => Stdio::piped(),
            StdinSource::Inherit => Stdio::inherit(),
            StdinSource::Null => Stdio::null(),
        }
    }
}

impl Executor for ProcessExecutor {
    fn execute(&mut self, cmd: &dyn SystemCommand) -> Result<CommandOutput> {
        let line = cmd.display();

        if self.dry_run && cmd.is_mutating() {
            info!("[DRY RUN] Skipped: {}", line);
            return Ok(CommandOutput {
                stdout: format!("[DRY RUN] Skipped: {}\n", line),
                stderr: String::new(),
                exit_code: Some(0),
                success: true,
                dry_run: true,
            });
        }

        let payload = cmd.stdin_payload();
        let capture = !self.streamed.iter().any(|p| p == cmd.program());

        debug!(command = %line, workdir = ?cmd.workdir(), "executing");

        let mut command = Command::new(cmd.program());
        command
            .args(cmd.to_cli_args())
            .stdin(self.stdin_source(cmd.program(), payload.is_some()))
            .in_new_process_group();

        if capture {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        if let Some(dir) = cmd.workdir() {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", cmd.program()))?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        // Feed stdin before waiting; dropping the handle closes the pipe
        let fed = match (payload, child.stdin.take()) {
            (Some(data), Some(mut stdin)) => stdin
                .write_all(data.as_bytes())
                .with_context(|| format!("Failed writing stdin of `{}`", cmd.program())),
            _ => Ok(()),
        };

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed waiting for `{}`", cmd.program()))
            .and_then(|output| fed.map(|()| output));

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }
        let output = output?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
            dry_run: false,
        };

        if result.success {
            debug!(command = %line, "command succeeded");
        } else {
            info!(command = %line, status = %result.status_description(), "command failed");
        }
        Ok(result)
    }
}

// ============================================================================
// Recording Executor
// ============================================================================

/// A command captured by `RecordingExecutor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Log-safe rendering (secrets redacted)
    pub display: String,
    /// Whether the command would receive data on stdin
    pub has_stdin: bool,
    pub workdir: Option<PathBuf>,
}

/// Executor that records commands instead of running them.
///
/// Every command succeeds unless a failure was scripted with `fail_program`.
#[derive(Debug, Default, Clone)]
pub struct RecordingExecutor {
    commands: Vec<RecordedCommand>,
    failures: HashMap<String, CommandOutput>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every invocation of `program` fail with `code` and `stderr`
    pub fn fail_program(
        mut self,
        program: impl Into<String>,
        code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        self.failures
            .insert(program.into(), CommandOutput::failed(code, stderr));
        self
    }

    /// Commands recorded so far, in execution order
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Programs recorded so far, in execution order
    pub fn programs(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.program.as_str()).collect()
    }
}

impl Executor for RecordingExecutor {
    fn execute(&mut self, cmd: &dyn SystemCommand) -> Result<CommandOutput> {
        self.commands.push(RecordedCommand {
            program: cmd.program().to_string(),
            args: cmd.to_cli_args(),
            display: cmd.display(),
            has_stdin: cmd.stdin_payload().is_some(),
            workdir: cmd.workdir().map(PathBuf::from),
        });

        Ok(self
            .failures
            .get(cmd.program())
            .cloned()
            .unwrap_or_else(CommandOutput::succeeded))
    }
}
