//! Covert IAT Features - image-based features from packet inter-arrival times.
//!
//! This library turns labeled packet captures into a tabular dataset for
//! covert-channel detection. Timing is the only signal used: packet
//! payloads and headers are never inspected.
//!
//! # Stages
//!
//! - **Stage 1**: packet timestamps are differenced into inter-arrival
//!   times (IATs) and cut into fixed-length labeled windows, written to an
//!   IAT table.
//! - **Stage 2**: each IAT row is min-max normalized into a square
//!   grayscale grid, and nine image statistics are computed per grid and
//!   written to a feature table.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Covert IAT Features                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Capture   │──▶│  Windowing  │──▶│  IAT table  │       │
//! │  │   (pcap)    │   │  (N IATs)   │   │   (csv)     │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                              │              │
//! │                                              ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Features   │◀──│  Features   │◀──│    Image    │       │
//! │  │   table     │   │ (9 stats)   │   │ (√N × √N)   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                                             │
//! │        Run statistics recorded by every stage               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use covert_iat_features::core::{encode_window, extract_features, iat_windows, CentroidPolicy};
//!
//! let timestamps: Vec<f64> = (0..17).map(|i| (i * i) as f64 * 0.001).collect();
//! let windows = iat_windows(&timestamps, 1, 16).unwrap();
//! assert_eq!(windows.len(), 1);
//!
//! let grid = encode_window(&windows[0].iats).unwrap();
//! let features = extract_features(&grid, CentroidPolicy::GridCenter).unwrap();
//! assert!(features.mean_gray > 0.0);
//! ```

pub mod capture;
pub mod config;
pub mod core;
pub mod dataset;
pub mod pipeline;
pub mod stats;

// Re-export key types at crate root for convenience
pub use capture::{CaptureError, PcapSource, TimestampSequence, TimestampSource};
pub use config::{Config, ConfigError, LogConfig, SourceConfig};
pub use core::{
    encode_window, extract_features, iat_windows, CentroidPolicy, FeatureVector, IatWindow,
    ImageFeatures, IntensityGrid, MonotonicPolicy, PipelineError, WindowSize,
};
pub use dataset::{FeatureTableWriter, IatTableReader, IatTableWriter};
pub use pipeline::{Pipeline, PipelineOptions, RunReport};
pub use stats::{create_shared_stats, RunStats, SharedRunStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
