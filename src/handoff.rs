//! Hand-off to the container command.
//!
//! Once provisioning is done the runner gives control to the command line it
//! was started with (the image's `CMD`). Two modes:
//!
//! - **Supervise** (default): spawn the command with inherited stdio, forward
//!   signals to it through the global signal thread, wait, and report its
//!   exit status so the runner can exit with the same code. When the runner
//!   is PID 1 (or a child subreaper) it also reaps orphaned descendants
//!   while it waits.
//! - **Exec**: replace the runner's process image. Only returns on failure.
//!
//! Spawn failures map to the shell's conventions: 127 when the command does
//! not exist, 126 when it cannot be executed.

use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, info};

use crate::error::{BootstrapError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::types::HandoffMode;

/// Exit code when the command cannot be found
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code when the command was found but could not be executed
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

/// The command line to hand off to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffCommand {
    /// Program followed by its arguments
    pub argv: Vec<String>,
    /// Working directory; `None` inherits the runner's
    pub workdir: Option<PathBuf>,
}

impl HandoffCommand {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            workdir: None,
        }
    }

    /// Run the command from `dir`
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    fn command(&self) -> Result<Command> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| BootstrapError::handoff("no command to hand off to", EXIT_NOT_FOUND))?;

        let mut command = Command::new(program);
        command.args(args);
        if let Some(ref dir) = self.workdir {
            command.current_dir(dir);
        }
        Ok(command)
    }

    /// Hand off using `mode`, returning the exit code to terminate with.
    pub fn launch(&self, mode: HandoffMode) -> Result<i32> {
        match mode {
            HandoffMode::Supervise => self.supervise(),
            HandoffMode::Exec => Err(self.exec()),
        }
    }

    /// Spawn the command, forward signals to it, and wait for it.
    pub fn supervise(&self) -> Result<i32> {
        let mut command = self.command()?;
        command.die_with_parent();

        info!(command = ?self.argv, workdir = ?self.workdir, "handing off");

        let child = command.spawn().map_err(|e| self.spawn_error(e))?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.set_forward_target(pid, in_terminal_foreground());
        }

        let reap = adopts_orphans();
        let status = wait_for(Pid::from_raw(pid as i32), reap);
        if reap {
            reap_orphans();
        }

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.clear_forward_target();
        }

        let code = status?;
        debug!(pid, code, "handed-off command exited");
        Ok(code)
    }

    /// Replace the current process image with the command.
    ///
    /// Returns only if the replacement failed.
    pub fn exec(&self) -> BootstrapError {
        let mut command = match self.command() {
            Ok(command) => command,
            Err(e) => return e,
        };

        info!(command = ?self.argv, workdir = ?self.workdir, "exec hand-off");
        let err = command.exec();
        self.spawn_error(err)
    }

    fn spawn_error(&self, err: io::Error) -> BootstrapError {
        let program = self.argv.first().map(String::as_str).unwrap_or_default();
        let code = match err.kind() {
            io::ErrorKind::NotFound => EXIT_NOT_FOUND,
            _ => EXIT_NOT_EXECUTABLE,
        };
        BootstrapError::handoff(format!("{}: {}", program, err), code)
    }
}

/// Convert a wait status to a shell-style exit code.
///
/// A process killed by a signal reports `128 + signal`. Stop and continue
/// notifications have no exit code.
pub fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}

/// Whether orphaned processes get re-parented to the runner
fn adopts_orphans() -> bool {
    nix::unistd::getpid() == Pid::from_raw(1)
        || nix::sys::prctl::get_child_subreaper().unwrap_or(false)
}

/// Whether the runner's process group owns the terminal on stdin.
///
/// The handed-off command shares that group, so the terminal delivers
/// Ctrl-C and Ctrl-\ to it directly.
fn in_terminal_foreground() -> bool {
    // SAFETY: tcgetpgrp only queries the terminal attached to fd 0
    let foreground = unsafe { nix::libc::tcgetpgrp(nix::libc::STDIN_FILENO) };
    foreground != -1 && foreground == nix::unistd::getpgrp().as_raw()
}

/// Block until `target` exits and return its exit code.
///
/// With `reap_any`, every child that exits meanwhile is reaped too.
fn wait_for(target: Pid, reap_any: bool) -> Result<i32> {
    let who = if reap_any { Pid::from_raw(-1) } else { target };
    loop {
        let status = match waitpid(who, None) {
            Ok(status) => status,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(io::Error::from(e).into()),
        };
        let Some(code) = exit_code(status) else {
            continue;
        };
        match status.pid() {
            Some(pid) if pid == target => return Ok(code),
            pid => debug!(?pid, code, "reaped orphaned process"),
        }
    }
}

/// Reap orphans that already exited, without blocking
fn reap_orphans() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => debug!(pid = ?status.pid(), "reaped orphaned process"),
        }
    }
}
