//! OS process probes and termination.

use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Whether a process with this pid currently exists.
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 probes for existence without delivering anything.
    kill(Pid::from_raw(pid), None).is_ok()
}

/// The executable name of a running process, when the platform exposes it.
pub fn executable_name(pid: u32) -> Option<String> {
    if cfg!(target_os = "linux") {
        std::fs::read_to_string(format!("/proc/{pid}/comm"))
            .ok()
            .map(|name| name.trim().to_string())
    } else {
        None
    }
}

/// Send SIGTERM to a process.
pub fn terminate(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, error = %e, "SIGTERM failed");
            false
        }
    }
}

/// Send SIGKILL to a process.
pub fn force_kill(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, error = %e, "SIGKILL failed");
            false
        }
    }
}

/// Two-step termination: SIGTERM, then SIGKILL once the grace period
/// elapses with the process still alive.
pub async fn terminate_with_grace(pid: u32, grace: Duration) {
    if !process_alive(pid) {
        return;
    }
    terminate(pid);

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !process_alive(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if process_alive(pid) {
        warn!(pid, "grace period elapsed, force killing");
        force_kill(pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn test_unlikely_pid_is_dead() {
        // Max pid space on Linux defaults to 4 million; this is far above.
        assert!(!process_alive(u32::MAX - 1));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_executable_name_of_self() {
        let name = executable_name(std::process::id());
        assert!(name.is_some());
        assert!(!name.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_with_grace_on_dead_pid() {
        // Nothing to do, must return promptly without panicking.
        terminate_with_grace(u32::MAX - 1, Duration::from_millis(100)).await;
    }
}
