//! Core numeric stages of the pipeline.
//!
//! This module contains:
//! - Windowing of packet timestamps into fixed-length IAT windows
//! - Encoding of a window as a square intensity grid
//! - Feature computation from an intensity grid
//! - The error taxonomy shared by all stages

pub mod error;
pub mod features;
pub mod image;
pub mod windowing;

// Re-export commonly used types
pub use error::PipelineError;
pub use features::{extract_features, CentroidPolicy, FeatureVector, ImageFeatures, FEATURE_NAMES};
pub use image::{encode_window, grid_side, normalize_iats, IntensityGrid};
pub use windowing::{
    iat_windows, IatWindow, IatWindows, InterArrivals, Label, MonotonicPolicy, WindowSize,
    WindowingSummary, DEFAULT_WINDOW_SIZE,
};
