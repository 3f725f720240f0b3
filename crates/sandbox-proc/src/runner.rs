use std::io;
use std::sync::Arc;

use sandbox::{EventSink, ExecutionResult, LimitPolicy, ResourceEnforcer, SandboxError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::enforcer::platform_enforcer;
use crate::prerequisites::resolve_shell;
use crate::sink::TracingSink;
use crate::supervisor::{ProcessSupervisor, SupervisorReport};

/// Runs commands under a [`LimitPolicy`], one supervised child per call.
///
/// Holds no per-run state: a single runner can be shared (e.g. behind an
/// `Arc`) and drive many runs concurrently.
pub struct SandboxRunner {
    enforcer: Arc<dyn ResourceEnforcer>,
    sink: Arc<dyn EventSink>,
    config: SupervisorConfig,
}

impl Default for SandboxRunner {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl SandboxRunner {
    /// Runner with the platform enforcer and a [`TracingSink`].
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            enforcer: platform_enforcer(),
            sink: Arc::new(TracingSink),
            config,
        }
    }

    pub fn with_enforcer(mut self, enforcer: Arc<dyn ResourceEnforcer>) -> Self {
        self.enforcer = enforcer;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn enforcer(&self) -> &dyn ResourceEnforcer {
        self.enforcer.as_ref()
    }

    /// Run `command` to completion under `policy`.
    ///
    /// A non-zero exit or a policy termination is a successful run; errors
    /// mean nothing was (or could be) spawned.
    pub async fn run(&self, command: &str, policy: &LimitPolicy) -> sandbox::Result<ExecutionResult> {
        self.run_with_cancel(command, policy, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), terminating the child early once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        command: &str,
        policy: &LimitPolicy,
        cancel: CancellationToken,
    ) -> sandbox::Result<ExecutionResult> {
        policy.validate()?;
        let shell = resolve_shell(self.config.shell.as_deref())?;
        self.check_support(policy).await?;

        let run_id = Uuid::new_v4();
        let supervisor = ProcessSupervisor::new(
            run_id,
            self.enforcer.as_ref(),
            self.sink.as_ref(),
            &self.config,
        );
        let report = supervisor.run(&shell, command, policy, &cancel).await?;
        Ok(assemble(run_id, report))
    }

    /// Query support for every capability `policy` needs on the blocking pool.
    ///
    /// Backends may answer by probing the host (spawning a helper process),
    /// which must not stall a runtime worker. Answers are cached by the
    /// backend, so `prepare` later gets them without blocking.
    async fn check_support(&self, policy: &LimitPolicy) -> sandbox::Result<()> {
        let capabilities = policy.required_capabilities();
        if capabilities.is_empty() {
            return Ok(());
        }
        let enforcer = Arc::clone(&self.enforcer);
        tokio::task::spawn_blocking(move || {
            for capability in capabilities {
                enforcer.support(capability);
            }
        })
        .await
        .map_err(|e| SandboxError::Io(io::Error::other(format!("capability check: {e}"))))
    }
}

/// Run `command` with a default [`SandboxRunner`].
pub async fn run(command: &str, policy: &LimitPolicy) -> sandbox::Result<ExecutionResult> {
    SandboxRunner::default().run(command, policy).await
}

fn assemble(run_id: Uuid, report: SupervisorReport) -> ExecutionResult {
    let SupervisorReport {
        exit_status,
        stdout,
        stderr,
        wall_clock,
        cpu_time,
        peak_memory,
        ..
    } = report;

    ExecutionResult {
        run_id,
        exit_status,
        truncated: stdout.truncated || stderr.truncated,
        io_error: stdout.error.clone().or_else(|| stderr.error.clone()),
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        wall_clock_duration: wall_clock,
        cpu_time_used: cpu_time,
        peak_memory_used: peak_memory,
    }
}
