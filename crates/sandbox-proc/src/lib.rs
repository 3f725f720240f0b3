//! Process sandbox backend: spawns a shell command as its own process group,
//! enforces a [`sandbox::LimitPolicy`] on it and reports a
//! [`sandbox::ExecutionResult`].

mod capture;
mod command;
mod config;
pub mod enforcer;
mod prerequisites;
mod process;
#[cfg(target_os = "linux")]
mod procfs;
mod runner;
mod sink;
mod supervisor;

pub use capture::Captured;
pub use config::{SupervisorConfig, UnsupportedMode};
pub use enforcer::platform_enforcer;
pub use runner::{SandboxRunner, run};
pub use sink::TracingSink;
pub use supervisor::{ProcessSupervisor, SupervisorReport, SupervisorState};
