use thiserror::Error;

/// Errors returned by allocation, estimation and the execution driver.
#[derive(Debug, Error)]
pub enum Error {
    /// Settings that cannot describe a runnable study.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two inputs that must agree in shape do not.
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    /// Too few valid samples to form the requested statistic.
    #[error("insufficient samples for {context}: need {needed}, have {available}")]
    InsufficientSamples {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    /// A linear system stayed singular after the allowed diagonal nudges.
    #[error("singular system in {context} after {attempts} regularization attempts")]
    SingularSystem {
        context: &'static str,
        attempts: usize,
    },

    /// No design satisfies the constraints (degenerate accuracy target, empty pool).
    #[error("infeasible allocation: {0}")]
    Infeasible(String),

    /// The model evaluator failed as a whole (individual sample faults are not errors).
    #[error("evaluator failure: {0}")]
    Evaluator(String),

    /// The numerical optimizer produced no usable point.
    #[error("optimizer failure: {0}")]
    OptimizerFailure(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Error::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }
}
