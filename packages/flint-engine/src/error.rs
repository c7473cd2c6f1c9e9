use flint_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The compiler signaled cooperative cancellation. The driver rolls
    /// class files back and returns the previous analysis; no partial
    /// state escapes.
    #[error("compilation cancelled")]
    Cancelled,

    /// Any other failure from the compile function. Class files are
    /// rolled back and the error propagates.
    #[error("compiler failure: {0}")]
    Compiler(#[source] anyhow::Error),
}

/// How a single compile invocation ended, as reported by the
/// caller-supplied compile function.
#[derive(Debug)]
pub enum CompileFailure {
    /// Distinguished cancellation signal, observed between cycles.
    Cancelled,
    Failed(anyhow::Error),
}

impl From<CompileFailure> for EngineError {
    fn from(failure: CompileFailure) -> Self {
        match failure {
            CompileFailure::Cancelled => EngineError::Cancelled,
            CompileFailure::Failed(e) => EngineError::Compiler(e),
        }
    }
}
