//! Error types for the vecppo core library

use thiserror::Error;

/// Core error type for PPO training
#[derive(Error, Debug)]
pub enum PpoError {
    /// Environment or worker failure
    #[error("Environment error: {0}")]
    Environment(String),

    /// Policy capability failure
    #[error("Policy error: {0}")]
    Policy(String),

    /// Shape contract violated at a call boundary
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Where the mismatch was detected
        context: &'static str,
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Continuation mask entry outside {0, 1}
    #[error("Invalid mask value {value} for environment {index}")]
    InvalidMask {
        /// Environment lane
        index: usize,
        /// Offending value
        value: f32,
    },

    /// Rejected configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Non-finite loss, gradient or degenerate statistics
    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PpoError {
    /// Shorthand for a dimension mismatch
    #[must_use]
    pub fn dims(context: &'static str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            actual,
        }
    }
}

/// Result type alias for vecppo operations
pub type Result<T> = std::result::Result<T, PpoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_message() {
        let err = PpoError::dims("state stack", 4, 3);
        assert_eq!(
            err.to_string(),
            "Dimension mismatch in state stack: expected 4, got 3"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PpoError = io.into();
        assert!(matches!(err, PpoError::Io(_)));
    }
}
