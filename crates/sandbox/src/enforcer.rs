use std::fmt;
use std::process::Command;
use std::time::{Duration, Instant};

use crate::error::{Result, SandboxError};
use crate::policy::LimitPolicy;
use crate::types::{ResourceSample, ViolationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Cpu,
    Memory,
    Network,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Memory => f.write_str("memory"),
            Self::Network => f.write_str("network"),
        }
    }
}

/// How far a platform backs a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    /// Violations are detected and lead to termination.
    Enforced,
    /// Usage is measured and reported but never acted on.
    ObserveOnly,
    /// Neither measured nor enforced.
    Unavailable,
}

impl fmt::Display for Support {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enforced => f.write_str("enforced"),
            Self::ObserveOnly => f.write_str("observe-only"),
            Self::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// A required capability the enforcer could not fully back for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degradation {
    pub capability: Capability,
    pub support: Support,
    pub reason: String,
}

/// Per-run enforcer state, created by [`ResourceEnforcer::prepare`] and bound
/// to the child by [`EnforcementHandle::attach`] once it is spawned.
#[derive(Debug)]
pub struct EnforcementHandle {
    pid: Option<u32>,
    started: Instant,
    degraded: Vec<Degradation>,
}

impl EnforcementHandle {
    pub fn new(degraded: Vec<Degradation>) -> Self {
        Self {
            pid: None,
            started: Instant::now(),
            degraded,
        }
    }

    /// Bind the handle to the spawned child. Restarts the elapsed clock.
    pub fn attach(&mut self, pid: u32) {
        self.pid = Some(pid);
        self.started = Instant::now();
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn degraded(&self) -> &[Degradation] {
        &self.degraded
    }

    /// Fail with `EnforcerUnsupported` for the first degraded capability.
    pub fn require_enforced(&self) -> Result<()> {
        match self.degraded.first() {
            Some(d) => Err(SandboxError::EnforcerUnsupported {
                capability: d.capability,
                reason: d.reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Platform mechanism for constraining and observing a child process.
///
/// Implementations are stateless across runs; everything run-specific lives
/// in the [`EnforcementHandle`].
pub trait ResourceEnforcer: Send + Sync {
    /// Human-readable backend name (e.g. "procfs").
    fn name(&self) -> &str;

    fn support(&self, capability: Capability) -> Support;

    /// Apply pre-exec constraints to `command` before it is spawned.
    ///
    /// Capabilities the policy needs but the platform cannot enforce are
    /// recorded on the returned handle; whether that is fatal is up to the
    /// caller (see [`EnforcementHandle::require_enforced`]).
    fn prepare(&self, policy: &LimitPolicy, command: &mut Command) -> Result<EnforcementHandle>;

    /// Non-blocking usage snapshot of the attached child and its descendants.
    fn sample(&self, handle: &EnforcementHandle) -> std::io::Result<ResourceSample>;

    /// Which limit, if any, `sample` exceeds.
    fn violation(
        &self,
        _handle: &EnforcementHandle,
        policy: &LimitPolicy,
        sample: &ResourceSample,
    ) -> Option<ViolationKind> {
        evaluate(policy, sample)
    }

    /// Required capabilities of `policy` this enforcer cannot fully enforce.
    fn degradations(&self, policy: &LimitPolicy) -> Vec<Degradation> {
        policy
            .required_capabilities()
            .into_iter()
            .filter_map(|capability| match self.support(capability) {
                Support::Enforced => None,
                support => Some(Degradation {
                    capability,
                    support,
                    reason: format!("{} backend: {capability} is {support}", self.name()),
                }),
            })
            .collect()
    }
}

/// Compare a sample against the policy.
///
/// When several limits are exceeded at once, CPU wins over memory, which wins
/// over wall clock.
pub fn evaluate(policy: &LimitPolicy, sample: &ResourceSample) -> Option<ViolationKind> {
    if let (Some(limit), Some(used)) = (policy.cpu_time_limit, sample.cpu_time)
        && used > limit
    {
        return Some(ViolationKind::CpuLimit);
    }
    if let (Some(limit), Some(used)) = (policy.memory_limit, sample.memory_bytes)
        && used > limit
    {
        return Some(ViolationKind::MemoryLimit);
    }
    if let Some(timeout) = policy.wall_clock_timeout
        && sample.elapsed >= timeout
    {
        return Some(ViolationKind::WallClock);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LimitPolicy {
        LimitPolicy::default()
            .with_cpu_time_limit(Duration::from_secs(2))
            .with_memory_limit(1000)
            .with_wall_clock_timeout(Duration::from_secs(5))
    }

    #[test]
    fn within_limits_is_clean() {
        let sample = ResourceSample {
            cpu_time: Some(Duration::from_secs(1)),
            memory_bytes: Some(999),
            elapsed: Duration::from_secs(4),
        };
        assert_eq!(evaluate(&policy(), &sample), None);
    }

    #[test]
    fn cpu_wins_tie_break() {
        let sample = ResourceSample {
            cpu_time: Some(Duration::from_secs(3)),
            memory_bytes: Some(2000),
            elapsed: Duration::from_secs(6),
        };
        assert_eq!(evaluate(&policy(), &sample), Some(ViolationKind::CpuLimit));
    }

    #[test]
    fn memory_beats_wall_clock() {
        let sample = ResourceSample {
            cpu_time: Some(Duration::from_secs(1)),
            memory_bytes: Some(2000),
            elapsed: Duration::from_secs(6),
        };
        assert_eq!(
            evaluate(&policy(), &sample),
            Some(ViolationKind::MemoryLimit)
        );
    }

    #[test]
    fn unobserved_resources_never_violate() {
        let sample = ResourceSample {
            cpu_time: None,
            memory_bytes: None,
            elapsed: Duration::from_secs(1),
        };
        assert_eq!(evaluate(&policy(), &sample), None);
    }

    #[test]
    fn wall_clock_reached() {
        let sample = ResourceSample {
            elapsed: Duration::from_secs(5),
            ..ResourceSample::default()
        };
        assert_eq!(evaluate(&policy(), &sample), Some(ViolationKind::WallClock));
    }

    #[test]
    fn require_enforced_reports_first_degradation() {
        let handle = EnforcementHandle::new(vec![Degradation {
            capability: Capability::Network,
            support: Support::Unavailable,
            reason: "no namespaces".into(),
        }]);
        let err = handle.require_enforced().unwrap_err();
        assert!(
            matches!(
                err,
                SandboxError::EnforcerUnsupported {
                    capability: Capability::Network,
                    ..
                }
            ),
            "got: {err}"
        );
        assert!(EnforcementHandle::new(Vec::new()).require_enforced().is_ok());
    }
}
