//! Timestamp source abstraction.
//!
//! A source yields the packet timestamps of one capture, in capture order,
//! together with the single label that applies to the whole capture. Only
//! timestamps are read; packet contents never leave the capture adapter.

use crate::core::error::PipelineError;
use crate::core::windowing::{iat_windows, IatWindow, Label};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading a capture.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture {0:?} not found")]
    NotFound(PathBuf),

    #[error("cannot read capture {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed capture {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Fallible stream of timestamps in seconds.
pub type TimestampIter<'a> = Box<dyn Iterator<Item = Result<f64, CaptureError>> + 'a>;

/// Anything that can replay the ordered packet timestamps of one capture.
pub trait TimestampSource: Send + Sync {
    /// Label applied to every window of this capture.
    fn label(&self) -> Label;

    /// Human-readable name for logs.
    fn name(&self) -> String;

    /// Open the capture and stream its timestamps.
    fn timestamps(&self) -> Result<TimestampIter<'_>, CaptureError>;
}

/// An in-memory timestamp sequence for one capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampSequence {
    pub label: Label,
    /// Seconds, assumed non-decreasing
    pub timestamps: Vec<f64>,
}

impl TimestampSequence {
    pub fn new(label: Label, timestamps: Vec<f64>) -> Self {
        Self { label, timestamps }
    }

    /// Window the sequence, trusting its ordering.
    pub fn windows(&self, size: usize) -> Result<Vec<IatWindow>, PipelineError> {
        iat_windows(&self.timestamps, self.label, size)
    }
}

impl TimestampSource for TimestampSequence {
    fn label(&self) -> Label {
        self.label
    }

    fn name(&self) -> String {
        format!("memory[{} timestamps]", self.timestamps.len())
    }

    fn timestamps(&self) -> Result<TimestampIter<'_>, CaptureError> {
        Ok(Box::new(self.timestamps.iter().copied().map(Ok)))
    }
}
