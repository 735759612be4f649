use crate::error::{Result, WardenError};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
#[cfg(unix)]
use nix::unistd::{fork, ForkResult};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Operating-system facts and actions the manager needs about a process id.
///
/// Implementations hold no business logic. The manager is generic over this
/// trait so the supervisory decisions can be exercised without real children.
pub trait ProcessFacts {
    /// True if `pid` exists and has not already been reaped. Exited direct
    /// children are reaped first so a zombie is never reported alive.
    fn is_alive(&mut self, pid: u32) -> bool;

    /// Resident set size in megabytes, or 0 when the process is gone
    fn resident_memory_mb(&mut self, pid: u32) -> Result<f64>;

    /// Ask `pid` to stop (SIGTERM), or kill it outright (SIGKILL) when
    /// `forceful`. A pid that no longer exists is not an error.
    fn terminate(&mut self, pid: u32, forceful: bool) -> Result<()>;

    /// Start a new process that runs `entry` and exits with its return value.
    /// Returns the child's pid in the caller; never returns in the child.
    fn spawn_isolated(&mut self, entry: &dyn Fn() -> i32) -> Result<u32>;
}

/// Process facts backed by the live process table
pub struct SystemFacts {
    system: System,
}

impl SystemFacts {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refresh one pid and report whether it is present and not a zombie
    fn refresh(&mut self, pid: u32) -> bool {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        self.system
            .process(sys_pid)
            .map(|p| p.status() != ProcessStatus::Zombie)
            .unwrap_or(false)
    }

    /// Non-blocking reap of `pid` if it is one of our children.
    ///
    /// Returns true when the child had exited and has now been collected.
    #[cfg(unix)]
    fn try_reap(&self, pid: u32) -> bool {
        let nix_pid = nix::unistd::Pid::from_raw(pid as i32);
        match waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                info!(pid, code, "Reaped child process");
                true
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                info!(pid, signal = %sig, "Reaped child process killed by signal");
                true
            }
            Ok(_) => false,
            // Not our child, or already collected: the process table decides
            Err(Errno::ECHILD) => false,
            Err(e) => {
                debug!(pid, "waitpid failed: {}", e);
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn try_reap(&self, _pid: u32) -> bool {
        false
    }
}

impl Default for SystemFacts {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessFacts for SystemFacts {
    fn is_alive(&mut self, pid: u32) -> bool {
        if self.try_reap(pid) {
            return false;
        }
        self.refresh(pid)
    }

    fn resident_memory_mb(&mut self, pid: u32) -> Result<f64> {
        if !self.is_alive(pid) {
            return Ok(0.0);
        }

        // is_alive just refreshed this pid
        let process = self.system.process(Pid::from_u32(pid)).ok_or_else(|| {
            WardenError::InspectionError(pid, "process vanished while reading memory".to_string())
        })?;

        Ok(process.memory() as f64 / BYTES_PER_MB)
    }

    #[cfg(unix)]
    fn terminate(&mut self, pid: u32, forceful: bool) -> Result<()> {
        let sig = if forceful {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        };
        let nix_pid = nix::unistd::Pid::from_raw(pid as i32);

        match signal::kill(nix_pid, sig) {
            Ok(()) => {
                debug!(pid, signal = %sig, "Sent signal");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!(pid, "Process already gone, nothing to terminate");
                Ok(())
            }
            Err(e) => Err(WardenError::SignalError(format!(
                "Failed to send {} to {}: {}",
                sig, pid, e
            ))),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self, pid: u32, _forceful: bool) -> Result<()> {
        Err(WardenError::SignalError(format!(
            "Terminating process {} is only supported on Unix systems",
            pid
        )))
    }

    #[cfg(unix)]
    fn spawn_isolated(&mut self, entry: &dyn Fn() -> i32) -> Result<u32> {
        // The child continues on a copy of this address space and leaves via
        // process::exit, so nothing it mutates is visible to the parent.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => Ok(child.as_raw() as u32),
            Ok(ForkResult::Child) => {
                let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(entry))
                    .unwrap_or(1);
                std::process::exit(code);
            }
            Err(e) => Err(WardenError::SpawnError(format!("fork failed: {}", e))),
        }
    }

    #[cfg(not(unix))]
    fn spawn_isolated(&mut self, _entry: &dyn Fn() -> i32) -> Result<u32> {
        Err(WardenError::SpawnError(
            "Isolated worker processes are only supported on Unix systems".to_string(),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::process::Command;
    use std::time::Duration;

    #[test]
    fn test_own_process_is_alive_with_memory() {
        let mut facts = SystemFacts::new();
        let pid = std::process::id();

        assert!(facts.is_alive(pid));
        assert!(facts.resident_memory_mb(pid).unwrap() > 0.0);
    }

    #[test]
    fn test_exited_child_is_reaped_not_alive() {
        let mut facts = SystemFacts::new();

        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 3")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id();

        // Give the child time to exit and turn into a zombie
        std::thread::sleep(Duration::from_millis(300));

        assert!(!facts.is_alive(pid));
        assert_eq!(facts.resident_memory_mb(pid).unwrap(), 0.0);
    }

    #[test]
    fn test_terminate_graceful_and_forceful() {
        let mut facts = SystemFacts::new();

        for forceful in [false, true] {
            let child = Command::new("/bin/sleep")
                .arg("30")
                .spawn()
                .expect("Failed to spawn process");
            let pid = child.id();

            assert!(facts.is_alive(pid));
            facts.terminate(pid, forceful).unwrap();
            std::thread::sleep(Duration::from_millis(300));
            assert!(!facts.is_alive(pid));
        }
    }

    #[test]
    fn test_terminate_missing_pid_is_noop() {
        let mut facts = SystemFacts::new();

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id();
        child.wait().unwrap();

        assert!(facts.terminate(pid, false).is_ok());
        assert!(facts.terminate(pid, true).is_ok());
    }

    #[test]
    #[serial]
    fn test_spawn_isolated_runs_entry_in_child() {
        let mut facts = SystemFacts::new();
        let parent = std::process::id();

        let pid = facts.spawn_isolated(&|| 7).unwrap();
        assert_ne!(pid, parent);

        let status = waitpid(nix::unistd::Pid::from_raw(pid as i32), None).unwrap();
        assert_eq!(status, WaitStatus::Exited(nix::unistd::Pid::from_raw(pid as i32), 7));
    }
}
