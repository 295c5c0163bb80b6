//! Local process liveness.
//!
//! A lock left behind by a crashed invocation on this host can be taken
//! over as soon as its process is gone instead of waiting for it to expire.

/// Answers whether a process on this host is still running.
pub trait ProcessLiveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness of processes on the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProcesses;

impl ProcessLiveness for LocalProcesses {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // Pids outside the signed range (or 0, the caller's group) never
        // name a single foreign process.
        let Ok(raw) = i32::try_from(pid) else {
            return true;
        };
        if raw <= 0 {
            return true;
        }
        matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}
