//! Error types for direction computation.

use thiserror::Error;

/// Result type alias for direction operations.
pub type Result<T> = std::result::Result<T, DirectionError>;

/// Errors that can occur while computing landscape directions.
#[derive(Debug, Error)]
pub enum DirectionError {
    /// The trajectory of intermediate parameters was empty.
    #[error("intermediate parameters must not be empty")]
    EmptyTrajectory,

    /// Neither parameters nor a parameter source were supplied.
    #[error("either optimized parameters or a parameter source must be provided")]
    MissingParameters,

    /// Invalid configuration parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two lists that must correspond element-wise have different lengths.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Shape mismatch between corresponding tensors.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Not enough samples (or features) to extract the requested components.
    #[error("insufficient samples: need at least {required}, got {actual}")]
    InsufficientSamples {
        /// Minimum required count.
        required: usize,
        /// Count that was supplied.
        actual: usize,
    },

    /// A shared parameter store was poisoned by a panicking writer.
    #[error("parameter store lock poisoned")]
    LockPoisoned,

    /// A numerical routine produced an unusable result.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Candle tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl DirectionError {
    /// Create an invalid config error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a numerical error.
    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical(msg.into())
    }
}
