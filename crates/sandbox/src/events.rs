use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::enforcer::{Capability, Support};
use crate::types::{ExitStatus, ResourceSample, ViolationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Why the supervisor started terminating a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Violation(ViolationKind),
    Cancelled,
    EnforcerFault,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Violation(kind) => write!(f, "violation: {kind}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::EnforcerFault => f.write_str("enforcer fault"),
        }
    }
}

/// Structured lifecycle events of a run. Formatting is the sink's business.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxEvent {
    Prepared {
        enforcer: String,
    },
    CapabilityDowngraded {
        capability: Capability,
        support: Support,
        reason: String,
    },
    Spawned {
        pid: u32,
        command: String,
    },
    SpawnFailed {
        error: String,
    },
    SampleFailed {
        consecutive: u32,
        error: String,
    },
    Violation {
        kind: ViolationKind,
        sample: ResourceSample,
    },
    Cancelled,
    Terminating {
        pid: u32,
        reason: TerminationReason,
    },
    /// The child outlived the grace period and was sent SIGKILL.
    Escalated {
        pid: u32,
        grace: Duration,
    },
    OutputTruncated {
        stream: Stream,
        cap: usize,
    },
    OutputError {
        stream: Stream,
        error: String,
    },
    /// The stream was still open when draining gave up: some process outside
    /// the child's group (e.g. one that called `setsid`) holds the pipe.
    OutputLeftOpen {
        stream: Stream,
    },
    Completed {
        status: ExitStatus,
        wall_clock: Duration,
    },
}

/// Receiver for [`SandboxEvent`]s. Must not block for long: it is called from
/// the monitoring loop.
pub trait EventSink: Send + Sync {
    fn emit(&self, run_id: Uuid, event: SandboxEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _run_id: Uuid, _event: SandboxEvent) {}
}
