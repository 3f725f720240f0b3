use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use nix::sys::signal::Signal;
use sandbox::{
    EnforcementHandle, EventSink, ExitStatus, LimitPolicy, ResourceEnforcer, ResourceSample,
    SandboxError, SandboxEvent, Stream, TerminationReason, ViolationKind,
};
use tokio::process::Child;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::capture::{Captured, OutputCapture};
use crate::command::{preview, shell_command};
use crate::config::{SupervisorConfig, UnsupportedMode};
use crate::process::{classify_exit, leader_exited, signal_group};

/// `tokio::time::interval` panics on a zero period.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Fallback re-check interval for [`ExitWatch`] in case a SIGCHLD is missed.
const EXIT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Spawning,
    Running,
    /// The child exited on its own.
    Completed,
    /// The wall-clock limit was hit.
    TimedOut,
    /// Terminated for a CPU/memory violation, cancellation or enforcer fault.
    Killed,
    SpawnFailed,
}

impl SupervisorState {
    fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Spawning, Self::Running)
                | (Self::Spawning, Self::SpawnFailed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::TimedOut)
                | (Self::Running, Self::Killed)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawning => f.write_str("spawning"),
            Self::Running => f.write_str("running"),
            Self::Completed => f.write_str("completed"),
            Self::TimedOut => f.write_str("timed_out"),
            Self::Killed => f.write_str("killed"),
            Self::SpawnFailed => f.write_str("spawn_failed"),
        }
    }
}

/// Everything the supervisor observed about one reaped child.
#[derive(Debug)]
pub struct SupervisorReport {
    pub state: SupervisorState,
    pub exit_status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub wall_clock: Duration,
    pub cpu_time: Option<Duration>,
    pub peak_memory: Option<u64>,
}

/// Highest usage seen across samples.
#[derive(Debug, Default)]
struct Usage {
    cpu_time: Option<Duration>,
    peak_memory: Option<u64>,
}

impl Usage {
    fn record(&mut self, sample: &ResourceSample) {
        if let Some(cpu) = sample.cpu_time {
            self.cpu_time = Some(self.cpu_time.map_or(cpu, |prev| prev.max(cpu)));
        }
        if let Some(mem) = sample.memory_bytes {
            self.peak_memory = Some(self.peak_memory.map_or(mem, |prev| prev.max(mem)));
        }
    }
}

enum MonitorOutcome {
    /// The leader exited on its own and is waiting to be reaped.
    Exited,
    Terminate(TerminationReason),
}

/// Notices the leader's exit without reaping it.
///
/// Until the zombie is reaped its pid, which is also the group id, cannot be
/// reused, so the group can still be signalled safely.
struct ExitWatch {
    pid: u32,
    sigchld: Option<tokio::signal::unix::Signal>,
}

impl ExitWatch {
    fn exited(&self) -> bool {
        matches!(leader_exited(self.pid), Ok(true))
    }

    /// Resolves once the leader has exited. Cancel-safe.
    async fn wait(&mut self) -> io::Result<()> {
        loop {
            if leader_exited(self.pid)? {
                return Ok(());
            }
            let listening = match self.sigchld.as_mut() {
                Some(sigchld) => tokio::select! {
                    received = sigchld.recv() => received.is_some(),
                    () = tokio::time::sleep(EXIT_POLL) => true,
                },
                None => {
                    tokio::time::sleep(EXIT_POLL).await;
                    true
                }
            };
            if !listening {
                self.sigchld = None;
            }
        }
    }
}

/// Spawns one child, monitors it against a [`LimitPolicy`] and reaps it.
///
/// Owns the child exclusively; nothing else signals or waits on it. One
/// supervisor handles exactly one run.
pub struct ProcessSupervisor<'a> {
    run_id: Uuid,
    enforcer: &'a dyn ResourceEnforcer,
    sink: &'a dyn EventSink,
    config: &'a SupervisorConfig,
    state: SupervisorState,
}

impl<'a> ProcessSupervisor<'a> {
    pub fn new(
        run_id: Uuid,
        enforcer: &'a dyn ResourceEnforcer,
        sink: &'a dyn EventSink,
        config: &'a SupervisorConfig,
    ) -> Self {
        Self {
            run_id,
            enforcer,
            sink,
            config,
            state: SupervisorState::Spawning,
        }
    }

    fn transition(&mut self, to: SupervisorState) {
        debug_assert!(
            self.state.can_transition(to),
            "invalid supervisor transition {} -> {to}",
            self.state
        );
        trace!(run_id = %self.run_id, from = %self.state, to = %to, "supervisor transition");
        self.state = to;
    }

    fn emit(&self, event: SandboxEvent) {
        self.sink.emit(self.run_id, event);
    }

    fn spawn_failed(&mut self, err: &SandboxError) {
        self.transition(SupervisorState::SpawnFailed);
        self.emit(SandboxEvent::SpawnFailed {
            error: err.to_string(),
        });
    }

    /// Run `command` through `shell` until it reaches a terminal state.
    ///
    /// Returns an error only if the child could not be started; every outcome
    /// after a successful spawn is a report, and the child is always reaped
    /// before this returns.
    pub async fn run(
        mut self,
        shell: &Path,
        command: &str,
        policy: &LimitPolicy,
        cancel: &CancellationToken,
    ) -> sandbox::Result<SupervisorReport> {
        let mut std_cmd = shell_command(shell, command);
        let mut handle = match self.enforcer.prepare(policy, &mut std_cmd) {
            Ok(handle) => handle,
            Err(e) => {
                self.spawn_failed(&e);
                return Err(e);
            }
        };
        self.emit(SandboxEvent::Prepared {
            enforcer: self.enforcer.name().to_string(),
        });

        if self.config.on_unsupported == UnsupportedMode::Fail
            && let Err(e) = handle.require_enforced()
        {
            self.spawn_failed(&e);
            return Err(e);
        }
        for degradation in handle.degraded() {
            self.emit(SandboxEvent::CapabilityDowngraded {
                capability: degradation.capability,
                support: degradation.support,
                reason: degradation.reason.clone(),
            });
        }

        // Listen before spawning so the child's SIGCHLD cannot slip past.
        let sigchld = match signal(SignalKind::child()) {
            Ok(sigchld) => Some(sigchld),
            Err(e) => {
                debug!(run_id = %self.run_id, error = %e, "no SIGCHLD stream, polling for exit");
                None
            }
        };

        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.kill_on_drop(true);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = SandboxError::SpawnFailed(format!("spawn {}: {e}", shell.display()));
                self.spawn_failed(&err);
                return Err(err);
            }
        };
        // `id()` is only `None` once the child has been reaped.
        let Some(pid) = child.id() else {
            let err = SandboxError::SpawnFailed("child reaped before its pid was read".into());
            self.spawn_failed(&err);
            return Err(err);
        };
        handle.attach(pid);
        self.transition(SupervisorState::Running);
        self.emit(SandboxEvent::Spawned {
            pid,
            command: preview(command),
        });

        let cap = policy.output_cap_bytes;
        let stdout = child
            .stdout
            .take()
            .map(|out| OutputCapture::spawn(Stream::Stdout, out, cap));
        let stderr = child
            .stderr
            .take()
            .map(|err| OutputCapture::spawn(Stream::Stderr, err, cap));

        let mut exit = ExitWatch { pid, sigchld };
        let mut usage = Usage::default();
        let outcome = self
            .monitor(&mut exit, &handle, policy, cancel, &mut usage)
            .await;

        let exit_status = match outcome {
            MonitorOutcome::Exited => {
                // Take down anything the leader left in its group, then reap.
                signal_group(pid, Signal::SIGKILL);
                let status = match child.wait().await {
                    Ok(status) => classify_exit(status, policy, usage.cpu_time),
                    Err(e) => {
                        warn!(run_id = %self.run_id, pid, error = %e, "failed to reap child");
                        ExitStatus::EnforcerFault
                    }
                };
                let killed = status.violation().is_some() || status == ExitStatus::EnforcerFault;
                self.transition(if killed {
                    SupervisorState::Killed
                } else {
                    SupervisorState::Completed
                });
                status
            }
            MonitorOutcome::Terminate(reason) => {
                self.emit(SandboxEvent::Terminating { pid, reason });
                self.terminate(&mut child, &mut exit).await;
                self.transition(match reason {
                    TerminationReason::Violation(ViolationKind::WallClock) => {
                        SupervisorState::TimedOut
                    }
                    _ => SupervisorState::Killed,
                });
                match reason {
                    TerminationReason::Violation(kind) => ExitStatus::TerminatedByPolicy(kind),
                    TerminationReason::Cancelled => ExitStatus::Cancelled,
                    TerminationReason::EnforcerFault => ExitStatus::EnforcerFault,
                }
            }
        };
        let wall_clock = handle.elapsed();

        let drain = self.config.drain_timeout;
        let (stdout, stderr) = tokio::join!(finish(stdout, drain), finish(stderr, drain));
        self.report_output(Stream::Stdout, &stdout, cap);
        self.report_output(Stream::Stderr, &stderr, cap);

        self.emit(SandboxEvent::Completed {
            status: exit_status,
            wall_clock,
        });

        Ok(SupervisorReport {
            state: self.state,
            exit_status,
            stdout,
            stderr,
            wall_clock,
            cpu_time: usage.cpu_time,
            peak_memory: usage.peak_memory,
        })
    }

    /// Tick until the child exits or has to be terminated.
    ///
    /// Child exit wins over a cancellation or violation arriving at the same
    /// time: the select is biased towards it, and every other arm re-checks
    /// for an exit before committing to termination.
    async fn monitor(
        &self,
        exit: &mut ExitWatch,
        handle: &EnforcementHandle,
        policy: &LimitPolicy,
        cancel: &CancellationToken,
        usage: &mut Usage,
    ) -> MonitorOutcome {
        let backstop =
            tokio::time::sleep(policy.effective_wall_clock().saturating_sub(handle.elapsed()));
        tokio::pin!(backstop);

        let mut ticker = tokio::time::interval(self.config.tick_interval.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                biased;

                result = exit.wait() => {
                    return match result {
                        Ok(()) => MonitorOutcome::Exited,
                        Err(e) => {
                            warn!(run_id = %self.run_id, error = %e, "checking child exit failed");
                            MonitorOutcome::Terminate(TerminationReason::EnforcerFault)
                        }
                    };
                }
                () = cancel.cancelled() => {
                    if exit.exited() {
                        return MonitorOutcome::Exited;
                    }
                    self.emit(SandboxEvent::Cancelled);
                    return MonitorOutcome::Terminate(TerminationReason::Cancelled);
                }
                () = &mut backstop => {
                    if exit.exited() {
                        return MonitorOutcome::Exited;
                    }
                    let sample = ResourceSample {
                        elapsed: handle.elapsed(),
                        ..ResourceSample::default()
                    };
                    self.emit(SandboxEvent::Violation { kind: ViolationKind::WallClock, sample });
                    return MonitorOutcome::Terminate(TerminationReason::Violation(
                        ViolationKind::WallClock,
                    ));
                }
                _ = ticker.tick() => {
                    if exit.exited() {
                        return MonitorOutcome::Exited;
                    }
                    match self.enforcer.sample(handle) {
                        Ok(sample) => {
                            failures = 0;
                            usage.record(&sample);
                            if let Some(kind) = self.enforcer.violation(handle, policy, &sample) {
                                self.emit(SandboxEvent::Violation { kind, sample });
                                return MonitorOutcome::Terminate(TerminationReason::Violation(kind));
                            }
                        }
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            self.emit(SandboxEvent::SampleFailed {
                                consecutive: failures,
                                error: e.to_string(),
                            });
                            if failures >= self.config.max_sample_failures {
                                return MonitorOutcome::Terminate(TerminationReason::EnforcerFault);
                            }
                        }
                    }
                }
            }
        }
    }

    /// SIGTERM the group, wait out the grace period, SIGKILL, reap.
    ///
    /// The leader is only reaped at the very end, so every signal here still
    /// targets this run's group.
    async fn terminate(&self, child: &mut Child, exit: &mut ExitWatch) {
        let pid = exit.pid;
        signal_group(pid, Signal::SIGTERM);

        match tokio::time::timeout(self.config.grace_period, exit.wait()).await {
            Ok(Ok(())) => {
                debug!(run_id = %self.run_id, pid, "child exited within grace period");
            }
            Ok(Err(e)) => {
                warn!(run_id = %self.run_id, pid, error = %e, "checking child exit failed");
            }
            Err(_) => {
                self.emit(SandboxEvent::Escalated {
                    pid,
                    grace: self.config.grace_period,
                });
            }
        }

        signal_group(pid, Signal::SIGKILL);
        if let Err(e) = child.start_kill() {
            debug!(run_id = %self.run_id, pid, error = %e, "start_kill failed");
        }
        if let Err(e) = child.wait().await {
            warn!(run_id = %self.run_id, pid, error = %e, "failed to reap child");
        }
    }

    fn report_output(&self, stream: Stream, captured: &Captured, cap: usize) {
        if let Some(error) = &captured.error {
            self.emit(SandboxEvent::OutputError {
                stream,
                error: error.clone(),
            });
        } else if captured.truncated {
            self.emit(SandboxEvent::OutputTruncated { stream, cap });
        }
        if !captured.closed {
            self.emit(SandboxEvent::OutputLeftOpen { stream });
        }
    }
}

async fn finish(capture: Option<OutputCapture>, timeout: Duration) -> Captured {
    match capture {
        Some(capture) => capture.finish(timeout).await,
        None => Captured {
            closed: true,
            ..Captured::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use SupervisorState::*;
        assert!(Spawning.can_transition(Running));
        assert!(Spawning.can_transition(SpawnFailed));
        assert!(Running.can_transition(TimedOut));
        assert!(!Running.can_transition(SpawnFailed));
        assert!(!Completed.can_transition(Running));
    }

    #[test]
    fn usage_keeps_peaks() {
        let mut usage = Usage::default();
        usage.record(&ResourceSample {
            cpu_time: Some(Duration::from_millis(10)),
            memory_bytes: Some(500),
            elapsed: Duration::ZERO,
        });
        usage.record(&ResourceSample {
            cpu_time: Some(Duration::from_millis(20)),
            memory_bytes: Some(100),
            elapsed: Duration::ZERO,
        });
        assert_eq!(usage.cpu_time, Some(Duration::from_millis(20)));
        assert_eq!(usage.peak_memory, Some(500));
    }
}
