//! Inter-arrival time windowing.
//!
//! Timestamps are turned into consecutive differences and chunked into
//! fixed-length, non-overlapping windows. Only the previous timestamp is
//! held while walking a capture, so memory does not grow with capture size.
//! A trailing group shorter than the window length is discarded.

use crate::core::error::PipelineError;
use crate::core::image::grid_side;
use serde::{Deserialize, Serialize};

/// Ground-truth class attached to every window of a capture.
pub type Label = i64;

/// Default number of inter-arrival times per window (a 16x16 grid).
pub const DEFAULT_WINDOW_SIZE: usize = 256;

/// A window length that can be laid out as a square grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct WindowSize {
    len: usize,
    side: usize,
}

impl WindowSize {
    /// Validate a window length; it must be a non-zero perfect square.
    pub fn new(len: usize) -> Result<Self, PipelineError> {
        grid_side(len)
            .map(|side| Self { len, side })
            .ok_or(PipelineError::InvalidWindowSize { size: len })
    }

    /// Number of inter-arrival times per window.
    pub fn get(&self) -> usize {
        self.len
    }

    /// Side length of the square grid.
    pub fn side(&self) -> usize {
        self.side
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            len: DEFAULT_WINDOW_SIZE,
            side: 16,
        }
    }
}

impl TryFrom<usize> for WindowSize {
    type Error = PipelineError;

    fn try_from(len: usize) -> Result<Self, Self::Error> {
        Self::new(len)
    }
}

impl From<WindowSize> for usize {
    fn from(size: WindowSize) -> Self {
        size.len
    }
}

/// What to do when a timestamp is earlier than the one before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonotonicPolicy {
    /// Trust the capture ordering; negative differences pass through.
    #[default]
    Trust,
    /// Stop the source with `NonMonotonicTimestamps`.
    Reject,
}

/// A fixed-length group of consecutive inter-arrival times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IatWindow {
    pub label: Label,
    pub iats: Vec<f64>,
}

/// Lazy consecutive differences of a timestamp sequence.
pub struct InterArrivals<I> {
    timestamps: I,
    previous: Option<f64>,
    seen: usize,
}

impl<I: Iterator<Item = f64>> InterArrivals<I> {
    pub fn new(timestamps: I) -> Self {
        Self {
            timestamps,
            previous: None,
            seen: 0,
        }
    }

    /// Number of timestamps consumed so far.
    pub fn timestamps_seen(&self) -> usize {
        self.seen
    }
}

impl<I: Iterator<Item = f64>> Iterator for InterArrivals<I> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        loop {
            let timestamp = self.timestamps.next()?;
            self.seen += 1;
            if let Some(previous) = self.previous.replace(timestamp) {
                return Some(timestamp - previous);
            }
        }
    }
}

/// Counts describing how a source was windowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowingSummary {
    /// Timestamps read from the source
    pub timestamps: usize,
    /// Complete windows produced
    pub windows: usize,
    /// Trailing differences discarded because they did not fill a window
    pub dropped_iats: usize,
}

impl WindowingSummary {
    /// Fewer than two timestamps: no difference could be computed at all.
    pub fn insufficient_data(&self) -> bool {
        self.timestamps < 2
    }
}

/// Lazy chunking of inter-arrival times into labeled windows.
pub struct IatWindows<I> {
    diffs: InterArrivals<I>,
    label: Label,
    size: usize,
    policy: MonotonicPolicy,
    emitted: usize,
    dropped: usize,
    done: bool,
}

impl<I: Iterator<Item = f64>> IatWindows<I> {
    /// Create a windower over `timestamps`; `size` must be non-zero.
    pub fn new<T>(
        timestamps: T,
        label: Label,
        size: usize,
        policy: MonotonicPolicy,
    ) -> Result<Self, PipelineError>
    where
        T: IntoIterator<IntoIter = I>,
    {
        if size == 0 {
            return Err(PipelineError::InvalidWindowSize { size });
        }
        Ok(Self {
            diffs: InterArrivals::new(timestamps.into_iter()),
            label,
            size,
            policy,
            emitted: 0,
            dropped: 0,
            done: false,
        })
    }

    /// Summary of the work done so far. Final once the iterator is exhausted.
    pub fn summary(&self) -> WindowingSummary {
        WindowingSummary {
            timestamps: self.diffs.timestamps_seen(),
            windows: self.emitted,
            dropped_iats: self.dropped,
        }
    }
}

impl<I: Iterator<Item = f64>> Iterator for IatWindows<I> {
    type Item = Result<IatWindow, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut iats = Vec::with_capacity(self.size);
        while let Some(delta) = self.diffs.next() {
            if delta < 0.0 && self.policy == MonotonicPolicy::Reject {
                self.done = true;
                return Some(Err(PipelineError::NonMonotonicTimestamps {
                    index: self.diffs.timestamps_seen() - 1,
                    delta,
                }));
            }

            iats.push(delta);
            if iats.len() == self.size {
                self.emitted += 1;
                return Some(Ok(IatWindow {
                    label: self.label,
                    iats,
                }));
            }
        }

        self.done = true;
        self.dropped = iats.len();
        None
    }
}

/// Window an in-memory timestamp slice, trusting its ordering.
pub fn iat_windows(
    timestamps: &[f64],
    label: Label,
    size: usize,
) -> Result<Vec<IatWindow>, PipelineError> {
    IatWindows::new(timestamps.iter().copied(), label, size, MonotonicPolicy::Trust)?.collect()
}
