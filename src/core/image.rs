//! Encoding of an IAT window as a synthetic grayscale image.
//!
//! Values are scaled to the 8-bit intensity range over the window's own
//! min/max and laid out row-major in a square grid. Nothing is rendered;
//! the feature extractor works on the raw intensities.

use crate::core::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Upper end of the intensity range.
pub const MAX_INTENSITY: f64 = 255.0;

/// Square grid of intensities in `[0, 255]`, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityGrid {
    side: usize,
    values: Vec<f64>,
}

impl IntensityGrid {
    /// Build a single-channel grid from row-major values.
    pub fn new(side: usize, values: Vec<f64>) -> Result<Self, PipelineError> {
        if side == 0 || values.len() != side * side {
            return Err(PipelineError::InvalidWindowSize { size: values.len() });
        }
        Ok(Self { side, values })
    }

    /// Build a grid from interleaved multi-channel pixels, collapsing the
    /// channels of each pixel by arithmetic mean.
    pub fn from_channels(
        side: usize,
        channels: usize,
        pixels: &[f64],
    ) -> Result<Self, PipelineError> {
        if channels == 0 || pixels.len() != side * side * channels {
            return Err(PipelineError::InvalidWindowSize { size: pixels.len() });
        }
        let values = pixels
            .chunks_exact(channels)
            .map(|pixel| pixel.iter().sum::<f64>() / channels as f64)
            .collect();
        Self::new(side, values)
    }

    pub fn side(&self) -> usize {
        self.side
    }

    /// Row-major intensities.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Intensity at column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x < self.side && y < self.side {
            Some(self.values[y * self.side + x])
        } else {
            None
        }
    }

    /// Iterate `(x, y, intensity)` in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i % self.side, i / self.side, v))
    }
}

/// Side of the square grid holding `len` values, if `len` is a non-zero
/// perfect square.
pub fn grid_side(len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let side = (len as f64).sqrt().round() as usize;
    (side * side == len).then_some(side)
}

/// Scale values to `[0, 255]` over their own range.
///
/// When every value is identical the range is zero and all outputs are
/// `0.0` rather than the result of a division.
pub fn normalize_iats(iats: &[f64]) -> Vec<f64> {
    let min = iats.iter().copied().fold(f64::INFINITY, f64::min);
    let max = iats.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if iats.is_empty() || range == 0.0 {
        return vec![0.0; iats.len()];
    }
    iats.iter()
        .map(|&iat| MAX_INTENSITY * (iat - min) / range)
        .collect()
}

/// Normalize one window and reshape it into a square grid.
pub fn encode_window(iats: &[f64]) -> Result<IntensityGrid, PipelineError> {
    let side = grid_side(iats.len()).ok_or(PipelineError::InvalidWindowSize { size: iats.len() })?;
    IntensityGrid::new(side, normalize_iats(iats))
}
