use crate::enforcer::Capability;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("enforcer does not support {capability}: {reason}")]
    EnforcerUnsupported {
        capability: Capability,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`SandboxError`], for callers that branch on
/// the failure class rather than the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidPolicy,
    SpawnFailed,
    EnforcerUnsupported,
    Io,
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPolicy(_) => ErrorKind::InvalidPolicy,
            Self::SpawnFailed(_) => ErrorKind::SpawnFailed,
            Self::EnforcerUnsupported { .. } => ErrorKind::EnforcerUnsupported,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
