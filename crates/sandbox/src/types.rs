use std::fmt;
use std::time::Duration;

use uuid::Uuid;

/// Exit code reported for policy terminations (same as coreutils `timeout`).
const EXIT_CODE_POLICY: i32 = 124;
/// Exit code reported when the supervisor gave up on a faulty enforcer.
const EXIT_CODE_ENFORCER_FAULT: i32 = 125;
/// Exit code reported for cancelled runs (128 + SIGINT).
const EXIT_CODE_CANCELLED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    CpuLimit,
    MemoryLimit,
    WallClock,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CpuLimit => f.write_str("cpu_limit"),
            Self::MemoryLimit => f.write_str("memory_limit"),
            Self::WallClock => f.write_str("wall_clock"),
        }
    }
}

/// How a supervised child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The child exited on its own with this code.
    Exited(i32),
    /// The child died from a signal the supervisor did not send.
    Signaled(i32),
    /// The supervisor (or the kernel backstop) terminated the child for
    /// exceeding a limit.
    TerminatedByPolicy(ViolationKind),
    /// The caller cancelled the run.
    Cancelled,
    /// Sampling failed too many times in a row and the child was terminated.
    EnforcerFault,
}

impl ExitStatus {
    /// Shell-style exit code. Signals map to `128 + signal`.
    pub fn code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(signal) => 128 + signal,
            Self::TerminatedByPolicy(_) => EXIT_CODE_POLICY,
            Self::Cancelled => EXIT_CODE_CANCELLED,
            Self::EnforcerFault => EXIT_CODE_ENFORCER_FAULT,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn violation(&self) -> Option<ViolationKind> {
        match self {
            Self::TerminatedByPolicy(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
            Self::TerminatedByPolicy(kind) => write!(f, "terminated by policy ({kind})"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::EnforcerFault => f.write_str("terminated after enforcer fault"),
        }
    }
}

/// One monitoring-tick snapshot. `None` means the enforcer cannot observe
/// that resource on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSample {
    pub cpu_time: Option<Duration>,
    pub memory_bytes: Option<u64>,
    /// Time since the child was spawned.
    pub elapsed: Duration,
}

/// Outcome of one sandboxed run. Produced once, after the child is reaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub exit_status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub wall_clock_duration: Duration,
    /// Highest CPU time observed while the child was alive.
    pub cpu_time_used: Option<Duration>,
    pub peak_memory_used: Option<u64>,
    /// Set when output was dropped from either stream: the cap was hit or a
    /// read failed.
    pub truncated: bool,
    /// First error hit while draining stdout/stderr, if any.
    pub io_error: Option<String>,
}

impl ExecutionResult {
    pub fn violation(&self) -> Option<ViolationKind> {
        self.exit_status.violation()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(ExitStatus::Exited(3).code(), 3);
        assert_eq!(ExitStatus::Signaled(9).code(), 137);
        assert_eq!(
            ExitStatus::TerminatedByPolicy(ViolationKind::WallClock).code(),
            124
        );
        assert_eq!(ExitStatus::Cancelled.code(), 130);
    }

    #[test]
    fn only_clean_exit_is_success() {
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Exited(1).success());
        assert!(!ExitStatus::TerminatedByPolicy(ViolationKind::CpuLimit).success());
    }

    #[test]
    fn display_names_violation() {
        let status = ExitStatus::TerminatedByPolicy(ViolationKind::MemoryLimit);
        assert_eq!(status.to_string(), "terminated by policy (memory_limit)");
        assert_eq!(status.violation(), Some(ViolationKind::MemoryLimit));
    }
}
