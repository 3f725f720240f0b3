mod enforcer;
mod error;
mod events;
mod policy;
mod types;

pub use enforcer::{Capability, Degradation, EnforcementHandle, ResourceEnforcer, Support, evaluate};
pub use error::{ErrorKind, Result, SandboxError};
pub use events::{EventSink, NullSink, SandboxEvent, Stream, TerminationReason};
pub use policy::{DEFAULT_OUTPUT_CAP_BYTES, LimitPolicy, NetworkPosture, parse_seconds};
pub use types::{ExecutionResult, ExitStatus, ResourceSample, ViolationKind};
