//! Error types for gazetrain-rs.

use thiserror::Error;

/// Result type alias for gazetrain operations.
pub type Result<T> = std::result::Result<T, GazeError>;

/// Errors that can occur in gazetrain-rs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GazeError {
    /// Tensor operation failed
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid configuration (unknown model family, bad hyperparameters)
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed input shape on add/predict; rejected before any state mutation
    #[error("validation error: expected {expected}, got {got}")]
    Validation { expected: String, got: String },

    /// Stored data violates dataset invariants (torn write, corrupt slot)
    #[error("data error: {0}")]
    Data(String),

    /// Reducer fit/transform failure
    #[error("reducer error: {0}")]
    Reducer(String),

    /// Training loop failure
    #[error("training error: {0}")]
    Training(String),

    /// Checkpoint save/load failure
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GazeError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a shape validation error
    pub fn validation(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::Validation {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create a data corruption error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Create a training error
    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}
