//! Error types for flowsr

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for flowsr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for flowsr
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input (wrong rank, non-positive factor, too small volume, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Array shape does not match what the operation requires
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Output file already present; flowsr never overwrites
    #[error("Output already exists: {}", .0.display())]
    OutputExists(PathBuf),

    /// Requested dataset key is missing
    #[error("Key '{key}' not found in {}", .path.display())]
    KeyNotFound { path: PathBuf, key: String },

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// External model error
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Error::Model(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch<S: Into<String>>(context: S, expected: &[usize], actual: &[usize]) -> Self {
        Error::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message() {
        let err = Error::shape_mismatch("stitch", &[8, 8, 8], &[8, 8, 4]);
        assert_eq!(
            err.to_string(),
            "Shape mismatch in stitch: expected [8, 8, 8], got [8, 8, 4]"
        );
    }

    #[test]
    fn test_output_exists_message() {
        let err = Error::OutputExists(PathBuf::from("/tmp/out.h5"));
        assert_eq!(err.to_string(), "Output already exists: /tmp/out.h5");
    }
}
