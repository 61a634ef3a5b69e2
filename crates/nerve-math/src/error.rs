//! Error types for the math helpers

use thiserror::Error;

/// Result type for math operations
pub type Result<T> = std::result::Result<T, MathError>;

/// Errors that can occur in the math helpers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MathError {
    /// Invalid input to a computation
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Why the input was rejected
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MathError::InvalidInput {
            reason: "grid dimensions must be positive",
        };
        let msg = format!("{}", err);
        assert!(msg.contains("grid dimensions"));
    }
}
