use std::io;
use std::os::unix::process::ExitStatusExt;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};
use nix::unistd::Pid;
use sandbox::{ExitStatus, LimitPolicy, ViolationKind};
use tracing::trace;

/// Send `signal` to the whole process group led by `pid`.
///
/// Requires the child to have been spawned with `process_group(0)` so that its
/// PGID equals its PID. Returns `false` if nothing was signalled (group gone or
/// PID not representable as `i32`).
pub(crate) fn signal_group(pid: u32, signal: Signal) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(e) => {
            trace!(pid, signal = %signal, error = %e, "killpg failed");
            false
        }
    }
}

/// Whether child `pid` has terminated, without reaping it.
///
/// Uses `waitid(WNOWAIT)`: the child stays a zombie, so its pid (and with it
/// the process-group id) cannot be handed to another process until the
/// caller reaps it.
pub(crate) fn leader_exited(pid: u32) -> io::Result<bool> {
    let raw = i32::try_from(pid)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid}: {e}")))?;
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    match waitid(Id::Pid(Pid::from_raw(raw)), flags) {
        Ok(WaitStatus::StillAlive) => Ok(false),
        Ok(_) => Ok(true),
        Err(Errno::EINTR) => Ok(false),
        // Already reaped.
        Err(Errno::ECHILD) => Ok(true),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Map the status of a child that exited without supervisor intervention.
///
/// A child that died from `SIGXCPU`, or from `SIGKILL` after using up its CPU
/// budget, was stopped by the kernel `RLIMIT_CPU` backstop and is reported as
/// a CPU violation.
pub(crate) fn classify_exit(
    status: std::process::ExitStatus,
    policy: &LimitPolicy,
    cpu_used: Option<Duration>,
) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::Exited(code);
    }
    let Some(signal) = status.signal() else {
        return ExitStatus::Exited(1);
    };
    let cpu_exhausted = match (policy.cpu_time_limit, cpu_used) {
        (Some(limit), Some(used)) => used >= limit,
        _ => false,
    };
    if signal == libc::SIGXCPU || (signal == libc::SIGKILL && cpu_exhausted) {
        return ExitStatus::TerminatedByPolicy(ViolationKind::CpuLimit);
    }
    ExitStatus::Signaled(signal)
}
