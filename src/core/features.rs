//! Feature computation from intensity grids.
//!
//! Each grid is summarised by first-order statistics, a histogram mode,
//! the intensity-weighted centroid and the third and fourth standardized
//! moments. Every value is a pure function of the grid, and degenerate
//! grids resolve to defined values so no NaN or infinity is emitted.

use crate::core::error::PipelineError;
use crate::core::image::IntensityGrid;
use crate::core::windowing::Label;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};

/// Number of equal-width bins used to locate the mode.
const HISTOGRAM_BINS: usize = 256;

/// Column names of the feature table, in output order.
pub const FEATURE_NAMES: [&str; 9] = [
    "mean_gray",
    "std_dev",
    "mode",
    "center_x",
    "center_y",
    "integrated_density",
    "median",
    "skewness",
    "kurtosis",
];

/// What the centroid is when the grid carries no intensity at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentroidPolicy {
    /// Use the geometric center of the grid, `(side - 1) / 2` on both axes.
    #[default]
    GridCenter,
    /// Fail with `DegenerateImage`.
    Reject,
}

/// Statistical and moment features of one intensity grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageFeatures {
    /// Arithmetic mean intensity
    pub mean_gray: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Left edge of the most populated histogram bin
    pub mode: f64,
    /// Intensity-weighted mean column index
    pub center_x: f64,
    /// Intensity-weighted mean row index
    pub center_y: f64,
    /// Sum of all intensities
    pub integrated_density: f64,
    /// Median intensity
    pub median: f64,
    /// Third standardized moment
    pub skewness: f64,
    /// Fourth standardized moment (not excess)
    pub kurtosis: f64,
}

impl ImageFeatures {
    /// Values in `FEATURE_NAMES` order.
    pub fn to_array(&self) -> [f64; 9] {
        [
            self.mean_gray,
            self.std_dev,
            self.mode,
            self.center_x,
            self.center_y,
            self.integrated_density,
            self.median,
            self.skewness,
            self.kurtosis,
        ]
    }
}

/// Features of one window, tagged with its capture's label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub label: Label,
    pub features: ImageFeatures,
}

/// Compute all features of a grid.
pub fn extract_features(
    grid: &IntensityGrid,
    policy: CentroidPolicy,
) -> Result<ImageFeatures, PipelineError> {
    let values = grid.values();
    let count = values.len() as f64;

    let integrated_density: f64 = values.iter().sum();
    let mean_gray = integrated_density / count;
    let std_dev = (central_moment(values, mean_gray, 2)).sqrt();

    let (center_x, center_y) = match centroid(grid) {
        Some(center) => center,
        None => match policy {
            CentroidPolicy::GridCenter => {
                let middle = (grid.side() as f64 - 1.0) / 2.0;
                (middle, middle)
            }
            CentroidPolicy::Reject => return Err(PipelineError::DegenerateImage),
        },
    };

    Ok(ImageFeatures {
        mean_gray,
        std_dev,
        mode: histogram_mode(values),
        center_x,
        center_y,
        integrated_density,
        median: Median::median(&Data::new(values.to_vec())),
        skewness: standardized_moment(values, mean_gray, std_dev, 3),
        kurtosis: standardized_moment(values, mean_gray, std_dev, 4),
    })
}

/// Mean of `(v - mean)^order`.
fn central_moment(values: &[f64], mean: f64, order: i32) -> f64 {
    values.iter().map(|&v| (v - mean).powi(order)).sum::<f64>() / values.len() as f64
}

/// Central moment scaled by `std^order`; zero for a flat grid.
fn standardized_moment(values: &[f64], mean: f64, std_dev: f64, order: i32) -> f64 {
    if std_dev > 0.0 {
        central_moment(values, mean, order) / std_dev.powi(order)
    } else {
        0.0
    }
}

/// Raw first-order spatial moments divided by the zeroth.
///
/// `None` when the grid has no intensity to weight by.
fn centroid(grid: &IntensityGrid) -> Option<(f64, f64)> {
    let (mut m00, mut m10, mut m01) = (0.0, 0.0, 0.0);
    for (x, y, intensity) in grid.pixels() {
        m00 += intensity;
        m10 += x as f64 * intensity;
        m01 += y as f64 * intensity;
    }

    if m00 == 0.0 {
        return None;
    }
    Some((m10 / m00, m01 / m00))
}

/// Left edge of the fullest of 256 equal-width bins over the values' range.
///
/// Bins are half-open except the last, which also takes the maximum. A flat
/// sample is binned over `[v - 0.5, v + 0.5]`. Ties go to the lowest bin.
fn histogram_mode(values: &[f64]) -> f64 {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (first, last) = if min == max {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    };

    let step = (last - first) / HISTOGRAM_BINS as f64;
    let edge = |k: usize| {
        if k == HISTOGRAM_BINS {
            last
        } else {
            first + k as f64 * step
        }
    };

    let mut counts = [0usize; HISTOGRAM_BINS];
    for &v in values {
        let mut bin = (((v - first) / (last - first)) * HISTOGRAM_BINS as f64) as usize;
        bin = bin.min(HISTOGRAM_BINS - 1);
        // Scaled index can land one off an edge; settle against the edges.
        if bin > 0 && v < edge(bin) {
            bin -= 1;
        } else if bin < HISTOGRAM_BINS - 1 && v >= edge(bin + 1) {
            bin += 1;
        }
        counts[bin] += 1;
    }

    let mut best = 0;
    for (bin, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = bin;
        }
    }
    edge(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::encode_window;

    fn grid(side: usize, values: Vec<f64>) -> IntensityGrid {
        IntensityGrid::new(side, values).unwrap()
    }

    fn ramp_window() -> Vec<f64> {
        (0..256).map(|i| ((i * 53) % 97) as f64 * 0.0007).collect()
    }

    #[test]
    fn test_flat_window_features() {
        let grid = encode_window(&[5.0; 256]).unwrap();
        let f = extract_features(&grid, CentroidPolicy::GridCenter).unwrap();

        assert_eq!(f.mean_gray, 0.0);
        assert_eq!(f.std_dev, 0.0);
        assert_eq!(f.mode, 0.0);
        assert_eq!(f.integrated_density, 0.0);
        assert_eq!(f.median, 0.0);
        assert_eq!(f.skewness, 0.0);
        assert_eq!(f.kurtosis, 0.0);
        assert_eq!((f.center_x, f.center_y), (7.5, 7.5));
    }

    #[test]
    fn test_flat_window_rejected_by_policy() {
        let grid = encode_window(&[0.0; 16]).unwrap();
        assert!(matches!(
            extract_features(&grid, CentroidPolicy::Reject),
            Err(PipelineError::DegenerateImage)
        ));
    }

    #[test]
    fn test_flat_nonzero_grid_has_zero_moments() {
        let f = extract_features(&grid(2, vec![10.0; 4]), CentroidPolicy::Reject).unwrap();
        assert_eq!(f.mean_gray, 10.0);
        assert_eq!(f.skewness, 0.0);
        assert_eq!(f.kurtosis, 0.0);
        assert_eq!(f.mode, 10.0);
        assert_eq!((f.center_x, f.center_y), (0.5, 0.5));
    }

    #[test]
    fn test_basic_statistics() {
        let f = extract_features(&grid(2, vec![0.0, 255.0, 85.0, 170.0]), CentroidPolicy::GridCenter)
            .unwrap();

        assert!((f.mean_gray - 127.5).abs() < 1e-9);
        assert!((f.integrated_density - 510.0).abs() < 1e-9);
        assert!((f.median - 127.5).abs() < 1e-9);
        // Deviations are +-127.5 and +-42.5.
        let variance = (127.5f64.powi(2) * 2.0 + 42.5f64.powi(2) * 2.0) / 4.0;
        assert!((f.std_dev - variance.sqrt()).abs() < 1e-9);
        assert!(f.skewness.abs() < 1e-9);
        let fourth = (127.5f64.powi(4) * 2.0 + 42.5f64.powi(4) * 2.0) / 4.0;
        assert!((f.kurtosis - fourth / variance.powi(2)).abs() < 1e-9);
    }

    #[test]
    fn test_centroid_uses_column_for_x() {
        // All intensity in the right column, bottom row heavier.
        let f = extract_features(&grid(2, vec![0.0, 100.0, 0.0, 300.0]), CentroidPolicy::Reject)
            .unwrap();
        assert!((f.center_x - 1.0).abs() < 1e-12);
        assert!((f.center_y - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_skewness_sign() {
        let f = extract_features(&grid(2, vec![0.0, 0.0, 0.0, 255.0]), CentroidPolicy::Reject)
            .unwrap();
        assert!(f.skewness > 0.0);
        // One outlier out of four: skewness 2/sqrt(3), kurtosis 7/3.
        assert!((f.skewness - 2.0 / 3f64.sqrt()).abs() < 1e-9);
        assert!((f.kurtosis - 7.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_mode_picks_first_fullest_bin() {
        assert_eq!(histogram_mode(&[0.0, 255.0, 255.0, 0.0]), 0.0);
        assert_eq!(histogram_mode(&[0.0, 255.0, 255.0, 10.0]), 255.0 - 255.0 / 256.0);

        let mode = histogram_mode(&[0.0, 100.0, 100.0, 100.0, 255.0]);
        assert!(mode <= 100.0 && 100.0 - mode < 255.0 / 256.0);
    }

    #[test]
    fn test_density_matches_mean_times_area() {
        let grid = encode_window(&ramp_window()).unwrap();
        let f = extract_features(&grid, CentroidPolicy::Reject).unwrap();
        assert!((f.integrated_density - f.mean_gray * 256.0).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_bounds() {
        let grid = encode_window(&ramp_window()).unwrap();
        let f = extract_features(&grid, CentroidPolicy::Reject).unwrap();
        assert!((0.0..=15.0).contains(&f.center_x));
        assert!((0.0..=15.0).contains(&f.center_y));
        assert!(f.to_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_feature_array_order() {
        let f = ImageFeatures {
            mean_gray: 1.0,
            std_dev: 2.0,
            mode: 3.0,
            center_x: 4.0,
            center_y: 5.0,
            integrated_density: 6.0,
            median: 7.0,
            skewness: 8.0,
            kurtosis: 9.0,
        };
        assert_eq!(f.to_array(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(FEATURE_NAMES.len(), f.to_array().len());
    }
}
