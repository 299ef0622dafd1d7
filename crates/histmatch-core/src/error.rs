//! Error type shared by every pipeline stage.

use std::path::PathBuf;

use thiserror::Error;

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("simulation {case} failed: {reason}")]
    SimulationFailure { case: String, reason: String },

    #[error("simulation {case} timed out after {seconds:.1}s")]
    Timeout { case: String, seconds: f64 },

    #[error("no result for {case}: expected {}", path.display())]
    MissingResult { case: String, path: PathBuf },

    #[error("no design found at {}", .0.display())]
    DesignNotFound(PathBuf),

    #[error("corrupt design at {}: {reason}", path.display())]
    CorruptDesign { path: PathBuf, reason: String },

    #[error("surrogate fit failed: {0}")]
    FitFailure(String),

    #[error("degenerate uncertainty at query {index}: {reason}")]
    DegenerateUncertainty { index: usize, reason: String },

    #[error("batch interrupted before {remaining} case(s) were dispatched")]
    Interrupted { remaining: usize },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wrap an I/O error with the operation that produced it.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether a later attempt of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
