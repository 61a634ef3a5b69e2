//! Error types for trace output

use thiserror::Error;

/// Result type for trace operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Errors that can occur while writing trace output
#[derive(Error, Debug)]
pub enum TraceError {
    /// Underlying I/O failure
    #[error("Trace I/O error: {source}")]
    Io {
        #[from]
        /// Source I/O error
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TraceError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let msg = format!("{}", err);
        assert!(msg.contains("missing"));
    }
}
