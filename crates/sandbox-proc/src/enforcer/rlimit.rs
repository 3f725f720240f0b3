use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use sandbox::{Capability, EnforcementHandle, LimitPolicy, ResourceEnforcer, ResourceSample, Support};

use super::{apply_cpu_rlimit, cpu_rlimit_secs};

/// Portable unix fallback. Nothing is sampled, so no capability is enforced
/// as a group budget and every requested limit is reported as a degradation.
///
/// A CPU limit is still installed as `RLIMIT_CPU` on the spawned shell.
/// Children inherit the limit but count their own CPU time against it, so it
/// bounds each process, not the combined time of the group. The supervisor's
/// wall-clock backstop applies as everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct RlimitEnforcer;

impl ResourceEnforcer for RlimitEnforcer {
    fn name(&self) -> &str {
        "rlimit"
    }

    fn support(&self, capability: Capability) -> Support {
        match capability {
            Capability::Cpu | Capability::Memory | Capability::Network => Support::Unavailable,
        }
    }

    fn prepare(
        &self,
        policy: &LimitPolicy,
        command: &mut Command,
    ) -> sandbox::Result<EnforcementHandle> {
        if let Some(limit) = policy.cpu_time_limit {
            let soft_secs = cpu_rlimit_secs(limit);
            // SAFETY: the hook only calls setrlimit(2), which is async-signal-safe.
            unsafe {
                command.pre_exec(move || apply_cpu_rlimit(soft_secs));
            }
        }
        Ok(EnforcementHandle::new(self.degradations(policy)))
    }

    fn sample(&self, handle: &EnforcementHandle) -> io::Result<ResourceSample> {
        Ok(ResourceSample {
            cpu_time: None,
            memory_bytes: None,
            elapsed: handle.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sandbox::NetworkPosture;

    use super::*;

    #[test]
    fn every_requested_limit_is_degraded() {
        let policy = LimitPolicy::default()
            .with_cpu_time_limit(Duration::from_secs(1))
            .with_memory_limit(1 << 20)
            .with_network(NetworkPosture::Disabled);
        let mut cmd = Command::new("true");
        let handle = RlimitEnforcer.prepare(&policy, &mut cmd).unwrap();

        let degraded: Vec<_> = handle.degraded().iter().map(|d| d.capability).collect();
        assert_eq!(
            degraded,
            [Capability::Cpu, Capability::Memory, Capability::Network]
        );
        assert!(handle.require_enforced().is_err());
    }

    #[test]
    fn samples_only_elapsed_time() {
        let handle = EnforcementHandle::new(Vec::new());
        let sample = RlimitEnforcer.sample(&handle).unwrap();
        assert_eq!(sample.cpu_time, None);
        assert_eq!(sample.memory_bytes, None);
    }
}
