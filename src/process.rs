//! Process-liveness check (§6, §9 design notes): given a pid, is it alive?

/// Send signal 0 to `pid`; `ESRCH` means the process is gone, any other
/// outcome (including "alive" and "permission denied, but it exists") is
/// treated as alive. The lock manager's stale-lock doctrine requires never
/// guessing a process is dead when we can't prove it.
#[cfg(unix)]
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// No portable liveness probe without an extra dependency; conservatively
/// report every pid as alive so a stale lock is never auto-removed on a
/// platform we can't check.
#[cfg(not(unix))]
#[must_use]
pub fn is_alive(_pid: u32) -> bool {
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn pid_1_is_alive_if_reachable() {
        // pid 1 always exists on a running unix system (may be unreachable
        // under some sandboxes, in which case kill() returns EPERM, which
        // we also treat as "alive").
        assert!(is_alive(1));
    }

    #[test]
    fn an_implausibly_large_pid_is_reported_dead() {
        assert!(!is_alive(i32::MAX as u32 - 1));
    }
}
