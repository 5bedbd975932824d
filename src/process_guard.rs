//! Process lifecycle management for child processes
//!
//! Two jobs share one signal thread:
//!
//! - While provisioning, a SIGINT/SIGTERM/SIGHUP must not leave `useradd`
//!   or the setup script running half-way. Provisioning children are spawned
//!   in their own process group, tracked here, and terminated (SIGTERM, grace
//!   period, SIGKILL) before the runner exits with `128 + signal`.
//! - After hand-off, the runner stands in for the container command. Signals
//!   are forwarded to the handed-off child, which decides how to exit.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Global registry of child process IDs
static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Signals the runner handles or forwards
pub const HANDLED_SIGNALS: [i32; 6] = [
    libc::SIGINT,
    libc::SIGTERM,
    libc::SIGHUP,
    libc::SIGQUIT,
    libc::SIGUSR1,
    libc::SIGUSR2,
];

/// The handed-off command signals are relayed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ForwardTarget {
    pid: u32,
    /// Shares the terminal's foreground process group with the runner
    in_foreground: bool,
}

/// Registry tracking all spawned child processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    /// Set of provisioning child PIDs currently running
    pids: HashSet<u32>,
    /// Handed-off command that receives forwarded signals
    forward_to: Option<ForwardTarget>,
    /// Whether cleanup has already been initiated (prevent double-cleanup)
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    /// Register a new child process
    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!(pid, "registered child process");
    }

    /// Unregister a child process (called when it exits normally)
    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!(pid, "unregistered child process");
    }

    /// Get count of tracked children
    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Route incoming signals to the handed-off command.
    ///
    /// `in_foreground` marks a command in the terminal's foreground group,
    /// which already receives keyboard signals from the terminal itself.
    pub fn set_forward_target(&mut self, pid: u32, in_foreground: bool) {
        self.forward_to = Some(ForwardTarget { pid, in_foreground });
        tracing::debug!(pid, in_foreground, "forwarding signals to handed-off command");
    }

    /// Stop forwarding signals (the handed-off command has exited)
    pub fn clear_forward_target(&mut self) {
        self.forward_to = None;
    }

    /// Terminate all tracked child processes
    /// Sends SIGTERM first, waits up to `grace_period`, then SIGKILL
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            tracing::debug!("cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            tracing::debug!("no child processes to terminate");
            return;
        }

        tracing::info!(count = self.pids.len(), "terminating provisioning processes");

        // Group signal reaches grandchildren too (the setup script's own children)
        let pids_to_kill: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids_to_kill {
            if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
                tracing::warn!(pid, error = %e, "failed to send SIGTERM to process group");
                if let Err(e2) = send_signal(pid, Signal::SIGTERM) {
                    tracing::warn!(pid, error = %e2, "failed to send SIGTERM");
                }
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids_to_kill.iter().all(|&pid| !is_process_alive(pid)) {
                tracing::info!("all provisioning processes terminated gracefully");
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids_to_kill {
            if is_process_alive(pid) {
                tracing::warn!(pid, "process group did not terminate, sending SIGKILL");
                if let Err(e) = send_signal_to_group(pid, Signal::SIGKILL) {
                    tracing::error!(pid, error = %e, "failed to send SIGKILL to process group");
                    let _ = send_signal(pid, Signal::SIGKILL);
                }
            }
        }

        self.pids.clear();
        tracing::info!("child process cleanup complete");
    }
}

/// Send a signal to a process
pub(crate) fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Send a signal to an entire process group
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Check if a process is still alive (not dead or zombie)
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/pid/stat is the state; zombies count as dead
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// RAII guard that terminates provisioning children on drop
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    /// Create a new process guard attached to the global registry
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            tracing::debug!(children = registry.count(), "ProcessGuard dropped, initiating cleanup");
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// What the signal thread should do with a received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Pass the signal on to the handed-off command
    Forward(u32),
    /// Tear down provisioning and exit with `128 + signal`
    Shutdown,
    /// Nothing to forward to and not a termination signal, or a keyboard
    /// signal the terminal already delivered to the handed-off command
    Ignore,
}

/// Decide how to handle `sig` given the current registry state
pub fn signal_action(registry: &ChildRegistry, sig: i32) -> SignalAction {
    match registry.forward_to {
        Some(target) if target.in_foreground && matches!(sig, libc::SIGINT | libc::SIGQUIT) => {
            SignalAction::Ignore
        }
        Some(target) => SignalAction::Forward(target.pid),
        None if matches!(sig, libc::SIGINT | libc::SIGTERM | libc::SIGHUP | libc::SIGQUIT) => {
            SignalAction::Shutdown
        }
        None => SignalAction::Ignore,
    }
}

/// Initialize the global signal thread.
/// Call this once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new(HANDLED_SIGNALS)?;

    thread::spawn(move || {
        for sig in signals.forever() {
            let registry = ChildRegistry::global();
            let Ok(mut guard) = registry.lock() else {
                std::process::exit(128 + sig);
            };

            match signal_action(&guard, sig) {
                SignalAction::Forward(pid) => {
                    tracing::debug!(signal = sig, pid, "forwarding signal");
                    if let Ok(signal) = Signal::try_from(sig) {
                        if let Err(e) = send_signal(pid, signal) {
                            tracing::warn!(pid, error = %e, "failed to forward signal");
                        }
                    }
                }
                SignalAction::Shutdown => {
                    tracing::info!(signal = sig, "received signal during provisioning, cleaning up");
                    guard.terminate_all(Duration::from_secs(3));
                    std::process::exit(128 + sig);
                }
                SignalAction::Ignore => {
                    tracing::debug!(signal = sig, "ignoring signal, nothing to forward to");
                }
            }
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to tie children to the runner
pub trait CommandProcessGroup {
    /// Run the command in its own process group, dying with the runner.
    /// Used for provisioning children.
    fn in_new_process_group(&mut self) -> &mut Self;

    /// Keep the runner's process group (terminal, job control) but die with
    /// the runner. Used for the handed-off command.
    fn die_with_parent(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }

    fn die_with_parent(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        unsafe {
            self.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    /// Helper to wait for a process to terminate (reap zombie)
    fn wait_for_process_death(pid: u32, timeout: Duration) -> bool {
        use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};

        let start = Instant::now();
        let nix_pid = Pid::from_raw(pid as i32);

        while start.elapsed() < timeout {
            match waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, _)) | Ok(WaitStatus::Signaled(_, _, _)) => {
                    return true;
                }
                Ok(WaitStatus::StillAlive) => {}
                Err(nix::errno::Errno::ECHILD) => {
                    if !is_process_alive(pid) {
                        return true;
                    }
                }
                _ => {}
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();

        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);

        registry.unregister(5678);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_signal_action_routing() {
        let mut registry = ChildRegistry::default();
        assert_eq!(signal_action(&registry, libc::SIGTERM), SignalAction::Shutdown);
        assert_eq!(signal_action(&registry, libc::SIGINT), SignalAction::Shutdown);
        assert_eq!(signal_action(&registry, libc::SIGUSR1), SignalAction::Ignore);

        registry.set_forward_target(4242, false);
        assert_eq!(signal_action(&registry, libc::SIGTERM), SignalAction::Forward(4242));
        assert_eq!(signal_action(&registry, libc::SIGINT), SignalAction::Forward(4242));
        assert_eq!(signal_action(&registry, libc::SIGUSR1), SignalAction::Forward(4242));

        registry.clear_forward_target();
        assert_eq!(signal_action(&registry, libc::SIGHUP), SignalAction::Shutdown);
    }

    #[test]
    fn test_keyboard_signals_not_duplicated_for_foreground_command() {
        let mut registry = ChildRegistry::default();
        registry.set_forward_target(4242, true);

        // The terminal already sent these to the whole foreground group
        assert_eq!(signal_action(&registry, libc::SIGINT), SignalAction::Ignore);
        assert_eq!(signal_action(&registry, libc::SIGQUIT), SignalAction::Ignore);

        assert_eq!(signal_action(&registry, libc::SIGTERM), SignalAction::Forward(4242));
        assert_eq!(signal_action(&registry, libc::SIGHUP), SignalAction::Forward(4242));
    }

    #[test]
    fn test_terminate_all_kills_real_process() {
        let child = Command::new("sh")
            .args(["-c", "sleep 60"])
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sleep process");

        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        assert!(is_process_alive(pid), "Process should be alive after spawn");

        registry.terminate_all(Duration::from_millis(500));

        let died = wait_for_process_death(pid, Duration::from_secs(2));
        assert!(died, "Process should be dead after terminate_all");
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_all_handles_already_dead_process() {
        let mut child = Command::new("sh")
            .args(["-c", "exit 0"])
            .spawn()
            .expect("Failed to spawn sh");

        let pid = child.id();
        let _ = child.wait();

        let mut registry = ChildRegistry::default();
        registry.register(pid);

        // No panic = success
        registry.terminate_all(Duration::from_millis(100));
    }

    #[test]
    fn test_cleanup_initiated_flag_prevents_double_cleanup() {
        let mut registry = ChildRegistry::default();
        registry.register(999999);

        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);

        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(999999));
    }

    #[test]
    fn test_send_signal_to_nonexistent_pid() {
        assert!(send_signal(999999, Signal::SIGTERM).is_err());
    }
}
