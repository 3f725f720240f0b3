use std::path::PathBuf;
use std::time::Duration;

/// What to do when the policy needs a capability the enforcer cannot back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsupportedMode {
    /// Run anyway and emit `CapabilityDowngraded` events.
    #[default]
    Downgrade,
    /// Fail with `EnforcerUnsupported` before spawning.
    Fail,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between monitoring ticks.
    pub tick_interval: Duration,
    /// Wait between SIGTERM and SIGKILL.
    pub grace_period: Duration,
    /// How long to keep draining output once the child is reaped. Only a
    /// process that left the child's group can hold the pipes that long.
    pub drain_timeout: Duration,
    /// Consecutive failed samples tolerated before the child is terminated.
    pub max_sample_failures: u32,
    pub on_unsupported: UnsupportedMode,
    /// Shell used to run commands. Resolved from `PATH` when unset.
    pub shell: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            grace_period: Duration::from_millis(500),
            drain_timeout: Duration::from_millis(200),
            max_sample_failures: 5,
            on_unsupported: UnsupportedMode::Downgrade,
            shell: None,
        }
    }
}
