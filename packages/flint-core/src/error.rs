use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Programming bug in the engine or in the compiler driving it.
    /// Never recoverable; the message names the offending entity.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// Persisted analysis does not match the expected shape. Callers
    /// should treat this as "no previous analysis" and fall back to a
    /// full build.
    #[error("analysis format error: {0}")]
    Format(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::ContractViolation(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }
}
