//! Error taxonomy for the windowing, encoding and feature stages.
//!
//! Numeric degeneracies (zero variance, zero total intensity) are not errors;
//! they resolve to defined values inside the stage that meets them. Most
//! variants here abort a single unit of work (one window, one row or one
//! source); header, CSV and IO failures abort the stage.

use crate::capture::CaptureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Window length is zero or not a perfect square.
    #[error("invalid window size {size}: must be a non-zero perfect square")]
    InvalidWindowSize { size: usize },

    /// A table header does not name the columns it should.
    #[error("header column {column}: expected {expected:?}, found {found:?}")]
    InvalidHeader {
        column: usize,
        expected: String,
        found: String,
    },

    /// A persisted row does not have the width the table header promises.
    #[error("line {line}: expected {expected} fields, found {found}")]
    RowWidth {
        line: u64,
        expected: usize,
        found: usize,
    },

    /// A persisted field could not be parsed as a label or a finite real.
    #[error("line {line}, column {column}: cannot parse {value:?}")]
    NonNumericField {
        line: u64,
        column: usize,
        value: String,
    },

    /// Total intensity is zero and the centroid policy refuses to fall back.
    #[error("degenerate image: total intensity is zero")]
    DegenerateImage,

    /// A timestamp went backwards and the monotonic policy rejects it.
    #[error("timestamp {index} precedes its predecessor (delta {delta}s)")]
    NonMonotonicTimestamps { index: usize, delta: f64 },

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the error only concerns one row or window, so processing
    /// can carry on with the next one.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::RowWidth { .. }
                | PipelineError::NonNumericField { .. }
                | PipelineError::DegenerateImage
                | PipelineError::NonMonotonicTimestamps { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_errors_are_recoverable() {
        let err = PipelineError::NonNumericField {
            line: 3,
            column: 2,
            value: "abc".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("line 3"));

        let err = PipelineError::InvalidWindowSize { size: 10 };
        assert!(!err.is_recoverable());
    }
}
