use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

use nix::errno::Errno;
use nix::sched::{CloneFlags, unshare};
use nix::unistd::{SysconfVar, sysconf};
use sandbox::{
    Capability, EnforcementHandle, LimitPolicy, NetworkPosture, ResourceEnforcer, ResourceSample,
    Support,
};
use tracing::debug;

use super::{apply_cpu_rlimit, cpu_rlimit_secs};
use crate::procfs::group_usage;

const PROC_ROOT: &str = "/proc";
const DEFAULT_CLOCK_TICKS: u64 = 100;
const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Network detachment support, probed once per process on first use.
static NETWORK_SUPPORT: OnceLock<Support> = OnceLock::new();

/// Linux enforcer: samples CPU time and RSS of the child's process group from
/// `/proc`, installs an `RLIMIT_CPU` backstop and, when asked to, moves the
/// child into an empty network namespace before exec.
///
/// Network support is probed by spawning a helper the first time it is
/// asked for, so the first [`support`](ResourceEnforcer::support) query for
/// [`Capability::Network`] blocks.
#[derive(Debug, Clone)]
pub struct ProcfsEnforcer {
    proc_root: PathBuf,
    clock_ticks: u64,
    page_size: u64,
}

impl ProcfsEnforcer {
    /// Returns `None` when `/proc` is not mounted.
    pub fn detect() -> Option<Self> {
        let proc_root = PathBuf::from(PROC_ROOT);
        if !proc_root.join("self").join("stat").exists() {
            return None;
        }
        Some(Self {
            proc_root,
            clock_ticks: sysconf_u64(SysconfVar::CLK_TCK).unwrap_or(DEFAULT_CLOCK_TICKS),
            page_size: sysconf_u64(SysconfVar::PAGE_SIZE).unwrap_or(DEFAULT_PAGE_SIZE),
        })
    }

    fn ticks_to_duration(&self, ticks: u64) -> Duration {
        let whole = Duration::from_secs(ticks / self.clock_ticks);
        let frac = Duration::from_nanos((ticks % self.clock_ticks) * 1_000_000_000 / self.clock_ticks);
        whole + frac
    }
}

impl ResourceEnforcer for ProcfsEnforcer {
    fn name(&self) -> &str {
        "procfs"
    }

    fn support(&self, capability: Capability) -> Support {
        match capability {
            Capability::Cpu | Capability::Memory => Support::Enforced,
            Capability::Network => *NETWORK_SUPPORT.get_or_init(probe_network),
        }
    }

    fn prepare(
        &self,
        policy: &LimitPolicy,
        command: &mut Command,
    ) -> sandbox::Result<EnforcementHandle> {
        let cpu_rlimit = policy.cpu_time_limit.map(cpu_rlimit_secs);
        let detach_net = policy.network == NetworkPosture::Disabled
            && self.support(Capability::Network) == Support::Enforced;

        if cpu_rlimit.is_some() || detach_net {
            // SAFETY: the hook only issues setrlimit(2) and unshare(2), both
            // async-signal-safe, and touches no shared state.
            unsafe {
                command.pre_exec(move || {
                    if let Some(soft_secs) = cpu_rlimit {
                        apply_cpu_rlimit(soft_secs)?;
                    }
                    if detach_net {
                        detach_network()?;
                    }
                    Ok(())
                });
            }
        }

        Ok(EnforcementHandle::new(self.degradations(policy)))
    }

    fn sample(&self, handle: &EnforcementHandle) -> io::Result<ResourceSample> {
        let pid = handle.pid().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "enforcement handle not attached")
        })?;
        let pgid = i32::try_from(pid)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid}: {e}")))?;

        let usage = group_usage(&self.proc_root, pgid)?;
        Ok(ResourceSample {
            cpu_time: Some(self.ticks_to_duration(usage.cpu_ticks)),
            memory_bytes: Some(usage.rss_pages.saturating_mul(self.page_size)),
            elapsed: handle.elapsed(),
        })
    }
}

fn sysconf_u64(var: SysconfVar) -> Option<u64> {
    sysconf(var)
        .ok()
        .flatten()
        .and_then(|v| u64::try_from(v).ok())
        .filter(|v| *v > 0)
}

/// Move the calling process into a fresh, empty network namespace.
///
/// Unprivileged callers need a user namespace for that, so `EPERM` on the
/// plain `CLONE_NEWNET` retries with `CLONE_NEWUSER` added.
fn detach_network() -> io::Result<()> {
    match unshare(CloneFlags::CLONE_NEWNET) {
        Ok(()) => Ok(()),
        Err(Errno::EPERM) => unshare(CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNET)
            .map_err(io::Error::from),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Check whether [`detach_network`] works on this host by running `true`
/// behind it.
fn probe_network() -> Support {
    let Ok(probe) = which::which("true") else {
        debug!("network probe skipped: `true` not found");
        return Support::Unavailable;
    };
    let mut cmd = Command::new(probe);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    // SAFETY: detach_network only issues unshare(2).
    unsafe {
        cmd.pre_exec(detach_network);
    }
    match cmd.status() {
        Ok(status) if status.success() => Support::Enforced,
        Ok(status) => {
            debug!(code = status.code(), "network probe exited unsuccessfully");
            Support::Unavailable
        }
        Err(e) => {
            debug!(error = %e, "network namespaces unavailable");
            Support::Unavailable
        }
    }
}
