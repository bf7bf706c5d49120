//! Helper process lifecycle: session setup, group termination, reaping.

use std::process::ExitStatus;

use tokio::process::{Child, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Killed,
}

/// Owns a spawned helper and guarantees it is killed.
///
/// [`terminate`](Self::terminate) signals the whole process group (Unix)
/// and reaps the child; it acts at most once; later calls report
/// [`KillOutcome::NotRunning`]. If the guard is dropped while still armed,
/// for example because the invocation future was cancelled, `Drop` sends
/// the kill without waiting.
pub struct ChildGuard {
    child: Option<Child>,
    /// Process group id; equals the child's pid when spawned via
    /// [`set_new_session`].
    pgid: Option<u32>,
}

impl ChildGuard {
    /// Wrap `child` immediately after `spawn()`.
    ///
    /// Pass `owns_group = true` only if the child leads its own process group.
    #[must_use]
    pub fn new(child: Child, owns_group: bool) -> Self {
        let pgid = if owns_group { child.id() } else { None };
        Self {
            child: Some(child),
            pgid,
        }
    }

    /// OS pid captured at spawn time, if known.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pgid.or_else(|| self.child.as_ref().and_then(Child::id))
    }

    /// Access the live child. `None` once terminated.
    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Wait for the helper to exit on its own. Cancel-safe.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        match self.child.as_mut() {
            Some(child) => child.wait().await,
            None => Err(std::io::Error::other("helper already terminated")),
        }
    }

    /// SIGKILL whatever remains of the helper's process group, without reaping.
    ///
    /// For use once the helper itself has exited but descendants it started
    /// may still hold its stdio pipes.
    pub fn kill_group(&self) -> KillOutcome {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            return match try_kill_process_group(pgid) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::debug!(pgid, "killpg failed: {e}");
                    KillOutcome::NotRunning
                }
            };
        }
        KillOutcome::NotRunning
    }

    /// Kill the helper (and its group) and wait for it to be reaped.
    pub async fn terminate(&mut self) -> KillOutcome {
        let Some(mut child) = self.child.take() else {
            return KillOutcome::NotRunning;
        };
        let outcome = signal_kill(&mut child, self.pgid);
        if let Err(e) = child.wait().await {
            tracing::warn!(pid = ?self.pgid, "Failed to reap helper process: {e}");
        }
        outcome
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        let _ = signal_kill(child, self.pgid);
        let _ = child.try_wait();
    }
}

fn signal_kill(child: &mut Child, pgid: Option<u32>) -> KillOutcome {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        match try_kill_process_group(pgid) {
            Ok(outcome) => return outcome,
            Err(e) => {
                tracing::debug!(pgid, "killpg failed, falling back to direct kill: {e}");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;

    match child.start_kill() {
        Ok(()) => KillOutcome::Killed,
        // Already exited and reaped.
        Err(_) => KillOutcome::NotRunning,
    }
}

/// Send SIGKILL to the process group `pgid`.
#[cfg(unix)]
pub fn try_kill_process_group(pgid: u32) -> std::io::Result<KillOutcome> {
    // SAFETY: killpg has no memory-safety preconditions.
    if unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) } == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(KillOutcome::NotRunning);
        }
        return Err(err);
    }
    Ok(KillOutcome::Killed)
}

/// Liveness probe via `kill(pid, 0)`. Reaped processes report `false`.
#[cfg(unix)]
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs permission and existence checks only.
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Put the child process in its own session (Unix only) so the entire process
/// group can be killed via `killpg`.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: the closure only calls async-signal-safe libc functions.
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Linux-only: the helper dies with the bridge even on SIGKILL of the host.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn set_new_session(_cmd: &mut Command) {}
