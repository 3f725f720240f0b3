//! Platform [`ResourceEnforcer`] backends.
//!
//! [`platform_enforcer`] picks the strongest backend the running host offers;
//! the supervisor only ever sees the trait.

#[cfg(target_os = "linux")]
mod procfs;
mod rlimit;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::resource::{Resource, setrlimit};
use sandbox::ResourceEnforcer;

#[cfg(target_os = "linux")]
pub use self::procfs::ProcfsEnforcer;
pub use self::rlimit::RlimitEnforcer;

/// Select the enforcer for the running platform.
///
/// Linux hosts with a mounted `/proc` get [`ProcfsEnforcer`]; everything else
/// falls back to [`RlimitEnforcer`].
pub fn platform_enforcer() -> Arc<dyn ResourceEnforcer> {
    #[cfg(target_os = "linux")]
    {
        if let Some(enforcer) = ProcfsEnforcer::detect() {
            return Arc::new(enforcer);
        }
    }
    Arc::new(RlimitEnforcer)
}

/// `RLIMIT_CPU` soft limit for a CPU budget: the budget rounded up, plus one
/// second, so the sampling loop normally reacts before the kernel does.
pub(crate) fn cpu_rlimit_secs(limit: Duration) -> u64 {
    let whole = limit.as_secs();
    let rounded = if limit.subsec_nanos() > 0 { whole + 1 } else { whole };
    rounded.saturating_add(1)
}

/// Install `RLIMIT_CPU` in the calling process. Soft limit delivers SIGXCPU,
/// hard limit one second later delivers SIGKILL.
///
/// Runs between fork and exec: only async-signal-safe calls are allowed.
pub(crate) fn apply_cpu_rlimit(soft_secs: u64) -> io::Result<()> {
    let soft = soft_secs as libc::rlim_t;
    let hard = soft_secs.saturating_add(1) as libc::rlim_t;
    setrlimit(Resource::RLIMIT_CPU, soft, hard).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_rlimit_rounds_up_and_pads() {
        assert_eq!(cpu_rlimit_secs(Duration::from_secs(2)), 3);
        assert_eq!(cpu_rlimit_secs(Duration::from_millis(1500)), 3);
        assert_eq!(cpu_rlimit_secs(Duration::from_millis(1)), 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn platform_enforcer_enforces_cpu() {
        let enforcer = platform_enforcer();
        assert_eq!(
            enforcer.support(sandbox::Capability::Cpu),
            sandbox::Support::Enforced
        );
    }
}
