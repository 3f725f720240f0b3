use sandbox::{EventSink, SandboxEvent};
use tracing::{info, warn};
use uuid::Uuid;

/// Forwards sandbox events to `tracing`. The default sink of
/// [`SandboxRunner`](crate::SandboxRunner).
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, run_id: Uuid, event: SandboxEvent) {
        match event {
            SandboxEvent::Prepared { enforcer } => {
                info!(%run_id, %enforcer, "enforcement prepared");
            }
            SandboxEvent::CapabilityDowngraded {
                capability,
                support,
                reason,
            } => {
                warn!(%run_id, %capability, %support, %reason, "capability downgraded");
            }
            SandboxEvent::Spawned { pid, command } => {
                info!(%run_id, pid, %command, "spawned");
            }
            SandboxEvent::SpawnFailed { error } => {
                warn!(%run_id, %error, "spawn failed");
            }
            SandboxEvent::SampleFailed { consecutive, error } => {
                warn!(%run_id, consecutive, %error, "resource sample failed");
            }
            SandboxEvent::Violation { kind, sample } => {
                warn!(
                    %run_id,
                    %kind,
                    cpu_ms = sample.cpu_time.map(|d| d.as_millis() as u64),
                    memory_bytes = sample.memory_bytes,
                    elapsed_ms = sample.elapsed.as_millis() as u64,
                    "limit exceeded"
                );
            }
            SandboxEvent::Cancelled => {
                info!(%run_id, "cancellation requested");
            }
            SandboxEvent::Terminating { pid, reason } => {
                info!(%run_id, pid, %reason, "terminating");
            }
            SandboxEvent::Escalated { pid, grace } => {
                warn!(%run_id, pid, grace_ms = grace.as_millis() as u64, "grace period expired, sent SIGKILL");
            }
            SandboxEvent::OutputTruncated { stream, cap } => {
                warn!(%run_id, %stream, cap, "output truncated");
            }
            SandboxEvent::OutputError { stream, error } => {
                warn!(%run_id, %stream, %error, "output capture failed");
            }
            SandboxEvent::OutputLeftOpen { stream } => {
                warn!(%run_id, %stream, "output still open after drain, a process escaped the group");
            }
            SandboxEvent::Completed { status, wall_clock } => {
                info!(
                    %run_id,
                    %status,
                    wall_ms = wall_clock.as_millis() as u64,
                    "completed"
                );
            }
        }
    }
}
