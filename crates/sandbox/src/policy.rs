use std::time::Duration;

use crate::enforcer::Capability;
use crate::error::{Result, SandboxError};

/// Per-stream capture ceiling used when the caller does not pick one.
pub const DEFAULT_OUTPUT_CAP_BYTES: usize = 1024 * 1024;

/// Lower bound of the derived wall-clock backstop for policies that only
/// bound CPU or memory.
const MIN_WALL_CLOCK_BACKSTOP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkPosture {
    #[default]
    Unrestricted,
    Disabled,
}

/// Constraints for a single sandboxed run.
///
/// Build one, call [`LimitPolicy::validate`], and hand it to the runner by
/// reference. The runner never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitPolicy {
    /// Cumulative CPU time of the child and its descendants.
    pub cpu_time_limit: Option<Duration>,
    /// Resident memory ceiling in bytes.
    pub memory_limit: Option<u64>,
    /// Real elapsed time, regardless of CPU use.
    pub wall_clock_timeout: Option<Duration>,
    pub network: NetworkPosture,
    /// Ceiling applied to each captured stream independently.
    pub output_cap_bytes: usize,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            cpu_time_limit: None,
            memory_limit: None,
            wall_clock_timeout: None,
            network: NetworkPosture::Unrestricted,
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
        }
    }
}

impl LimitPolicy {
    pub fn with_cpu_time_limit(mut self, limit: Duration) -> Self {
        self.cpu_time_limit = Some(limit);
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_wall_clock_timeout(mut self, timeout: Duration) -> Self {
        self.wall_clock_timeout = Some(timeout);
        self
    }

    pub fn with_network(mut self, network: NetworkPosture) -> Self {
        self.network = network;
        self
    }

    pub fn with_output_cap(mut self, bytes: usize) -> Self {
        self.output_cap_bytes = bytes;
        self
    }

    /// Reject non-positive limits and policies that bound nothing.
    pub fn validate(&self) -> Result<()> {
        if self.cpu_time_limit.is_some_and(|d| d.is_zero()) {
            return Err(SandboxError::InvalidPolicy(
                "cpu_time_limit must be positive".into(),
            ));
        }
        if self.memory_limit == Some(0) {
            return Err(SandboxError::InvalidPolicy(
                "memory_limit must be positive".into(),
            ));
        }
        if self.wall_clock_timeout.is_some_and(|d| d.is_zero()) {
            return Err(SandboxError::InvalidPolicy(
                "wall_clock_timeout must be positive".into(),
            ));
        }
        if self.output_cap_bytes == 0 {
            return Err(SandboxError::InvalidPolicy(
                "output_cap_bytes must be positive".into(),
            ));
        }
        if self.cpu_time_limit.is_none()
            && self.memory_limit.is_none()
            && self.wall_clock_timeout.is_none()
        {
            return Err(SandboxError::InvalidPolicy(
                "at least one of cpu_time_limit, memory_limit or wall_clock_timeout must be set"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Wall-clock bound the supervisor enforces with its own clock.
    ///
    /// Falls back to `max(60s, 2 * cpu_time_limit)` when no explicit timeout
    /// is configured, so a validated policy always terminates.
    pub fn effective_wall_clock(&self) -> Duration {
        match (self.wall_clock_timeout, self.cpu_time_limit) {
            (Some(timeout), _) => timeout,
            (None, Some(cpu)) => cpu.saturating_mul(2).max(MIN_WALL_CLOCK_BACKSTOP),
            (None, None) => MIN_WALL_CLOCK_BACKSTOP,
        }
    }

    /// Capabilities an enforcer has to back for this policy to be fully enforced.
    pub fn required_capabilities(&self) -> Vec<Capability> {
        let mut required = Vec::new();
        if self.cpu_time_limit.is_some() {
            required.push(Capability::Cpu);
        }
        if self.memory_limit.is_some() {
            required.push(Capability::Memory);
        }
        if self.network == NetworkPosture::Disabled {
            required.push(Capability::Network);
        }
        required
    }
}

/// Convert a user-supplied number of seconds into a [`Duration`].
///
/// NaN, infinite, zero and negative values are rejected; `field` names the
/// option in the error message.
pub fn parse_seconds(field: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(SandboxError::InvalidPolicy(format!(
            "{field} must be a positive, finite number of seconds (got {secs})"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| SandboxError::InvalidPolicy(format!("{field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_policy_is_rejected() {
        let err = LimitPolicy::default().validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPolicy);
        assert!(err.to_string().contains("at least one"), "got: {err}");
    }

    #[test]
    fn network_posture_alone_is_not_a_limit() {
        let policy = LimitPolicy::default().with_network(NetworkPosture::Disabled);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let cases = [
            LimitPolicy::default().with_cpu_time_limit(Duration::ZERO),
            LimitPolicy::default().with_memory_limit(0),
            LimitPolicy::default().with_wall_clock_timeout(Duration::ZERO),
            LimitPolicy::default()
                .with_wall_clock_timeout(Duration::from_secs(1))
                .with_output_cap(0),
        ];
        for policy in cases {
            let err = policy.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidPolicy, "policy: {policy:?}");
        }
    }

    #[test]
    fn single_limit_is_enough() {
        LimitPolicy::default()
            .with_wall_clock_timeout(Duration::from_secs(1))
            .validate()
            .unwrap();
        LimitPolicy::default()
            .with_memory_limit(1024)
            .validate()
            .unwrap();
    }

    #[test]
    fn explicit_wall_clock_wins() {
        let policy = LimitPolicy::default()
            .with_cpu_time_limit(Duration::from_secs(600))
            .with_wall_clock_timeout(Duration::from_secs(5));
        assert_eq!(policy.effective_wall_clock(), Duration::from_secs(5));
    }

    #[test]
    fn derived_wall_clock_backstop() {
        let short = LimitPolicy::default().with_cpu_time_limit(Duration::from_secs(2));
        assert_eq!(short.effective_wall_clock(), Duration::from_secs(60));

        let long = LimitPolicy::default().with_cpu_time_limit(Duration::from_secs(100));
        assert_eq!(long.effective_wall_clock(), Duration::from_secs(200));

        let memory_only = LimitPolicy::default().with_memory_limit(1 << 20);
        assert_eq!(memory_only.effective_wall_clock(), Duration::from_secs(60));
    }

    #[test]
    fn required_capabilities_follow_set_limits() {
        let policy = LimitPolicy::default()
            .with_memory_limit(1 << 20)
            .with_network(NetworkPosture::Disabled);
        assert_eq!(
            policy.required_capabilities(),
            vec![Capability::Memory, Capability::Network]
        );
    }

    #[test]
    fn parse_seconds_rejects_non_finite_and_non_positive() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(parse_seconds("cpu", bad).is_err(), "accepted {bad}");
        }
        assert_eq!(
            parse_seconds("cpu", 1.5).unwrap(),
            Duration::from_millis(1500)
        );
    }
}
