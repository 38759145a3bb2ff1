//! Error types for the evaluation engine

use std::fmt;

/// Errors that can occur during model evaluation
#[derive(Debug, Clone)]
pub enum EvalError {
    /// Invalid input parameters
    InvalidInput(String),

    /// Checkpoint deserialization or shape-validation error
    Checkpoint(String),

    /// Dataset index construction error (missing or malformed metadata)
    Dataset(String),

    /// Audio decoding or feature extraction error
    Feature(String),

    /// Model forward-pass error
    Inference(String),

    /// File I/O error
    Io(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            EvalError::Checkpoint(msg) => write!(f, "Checkpoint error: {}", msg),
            EvalError::Dataset(msg) => write!(f, "Dataset error: {}", msg),
            EvalError::Feature(msg) => write!(f, "Feature error: {}", msg),
            EvalError::Inference(msg) => write!(f, "Inference error: {}", msg),
            EvalError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<std::io::Error> for EvalError {
    fn from(err: std::io::Error) -> Self {
        EvalError::Io(err.to_string())
    }
}
