//! Error types for the fingerprint engine

use std::fmt;

/// Errors that can occur during audio analysis
///
/// Only a few of these ever reach the caller of [`crate::analyze_audio`]: silent or empty
/// buffers produce a zero-confidence result, and transform or calibration problems are
/// absorbed and logged. Timeouts and pool misuse are always surfaced.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Invalid input parameters
    InvalidInput(String),

    /// Processing error during analysis
    ProcessingError(String),

    /// Numerical error (overflow, underflow, etc.)
    NumericalError(String),

    /// A calibration rule file could not be read or parsed
    Calibration(String),

    /// The whole-track analysis exceeded its wall-clock budget
    Timeout {
        /// Budget that was exceeded, in seconds
        seconds: f32,
    },

    /// A worker tried to build another worker pool
    NestedPool,

    /// A worker thread died or hung up before reporting a result
    WorkerFailed(String),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AnalysisError::ProcessingError(msg) => write!(f, "Processing error: {}", msg),
            AnalysisError::NumericalError(msg) => write!(f, "Numerical error: {}", msg),
            AnalysisError::Calibration(msg) => write!(f, "Calibration error: {}", msg),
            AnalysisError::Timeout { seconds } => {
                write!(f, "Analysis timed out after {:.1}s", seconds)
            }
            AnalysisError::NestedPool => {
                write!(f, "Refusing to create a worker pool from inside a worker")
            }
            AnalysisError::WorkerFailed(msg) => write!(f, "Worker failed: {}", msg),
        }
    }
}

impl std::error::Error for AnalysisError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = AnalysisError::Timeout { seconds: 12.0 };
        assert_eq!(err.to_string(), "Analysis timed out after 12.0s");

        let err = AnalysisError::InvalidInput("empty".to_string());
        assert!(err.to_string().contains("empty"));

        assert!(AnalysisError::NestedPool.to_string().contains("inside a worker"));
    }
}
