use thiserror::Error;

/// Errors surfaced by checked particle, pool and factory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("particle {index} is already valid")]
    ParticleAlreadyValid { index: u32 },
    #[error("particle {index} is not valid")]
    ParticleNotValid { index: u32 },
    #[error("index {index} out of range (max {max})")]
    IndexOutOfRange { index: u32, max: u32 },
    #[error("required buffer `{0}` missing from creation data")]
    MissingBuffer(&'static str),
    #[error("serialized layout mismatch: {0}")]
    LayoutMismatch(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("subsystem `{0}` is not registered")]
    SubsystemUnavailable(&'static str),
}

pub type SimResult<T> = Result<T, SimError>;
