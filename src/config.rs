//! Configuration for the IAT feature pipeline.
//!
//! Every path the pipeline touches comes from here; nothing is hard-coded
//! in the processing code. The file is JSON and any field may be omitted.

use crate::capture::{PcapSource, TimestampSource};
use crate::core::features::CentroidPolicy;
use crate::core::windowing::{Label, MonotonicPolicy, WindowSize};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Main configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inter-arrival times per window; must be a perfect square
    pub window_size: WindowSize,

    /// Labeled captures feeding stage 1
    pub sources: Vec<SourceConfig>,

    /// IAT table written by stage 1 and read by stage 2
    pub iat_output: PathBuf,

    /// Feature table written by stage 2
    pub features_output: PathBuf,

    /// Worker threads for both stages
    pub workers: usize,

    /// Handling of timestamps that go backwards
    pub monotonic: MonotonicPolicy,

    /// Centroid of a grid with zero total intensity
    pub centroid: CentroidPolicy,

    /// Where to persist run statistics, if anywhere
    pub stats_path: Option<PathBuf>,

    /// Logging
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: WindowSize::default(),
            sources: vec![
                SourceConfig::new("packet_captures/covert_traffic.pcap", 1),
                SourceConfig::new("packet_captures/overt_traffic.pcap", 0),
            ],
            iat_output: PathBuf::from("iat_data.csv"),
            features_output: PathBuf::from("image_features.csv"),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            monotonic: MonotonicPolicy::default(),
            centroid: CentroidPolicy::default(),
            stats_path: None,
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("covert-iat-features")
            .join("config.json")
    }

    /// Capture readers for every configured source.
    pub fn timestamp_sources(&self) -> Vec<Box<dyn TimestampSource>> {
        self.sources
            .iter()
            .map(|source| Box::new(source.to_source()) as Box<dyn TimestampSource>)
            .collect()
    }

    /// Check values serde cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.iat_output == self.features_output {
            return Err(ConfigError::Invalid(format!(
                "IAT and feature tables share the path {:?}",
                self.iat_output
            )));
        }
        Ok(())
    }
}

/// One labeled capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub label: Label,
}

impl SourceConfig {
    pub fn new(path: impl Into<PathBuf>, label: Label) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }

    /// Capture reader for this source.
    pub fn to_source(&self) -> PcapSource {
        PcapSource::new(&self.path, self.label)
    }
}

impl FromStr for SourceConfig {
    type Err = ConfigError;

    /// Parse `PATH=LABEL`, splitting on the last `=`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, label) = s
            .rsplit_once('=')
            .ok_or_else(|| ConfigError::Invalid(format!("expected PATH=LABEL, got {s:?}")))?;
        let path = path.trim();
        if path.is_empty() {
            return Err(ConfigError::Invalid(format!("empty path in {s:?}")));
        }
        let label = label
            .trim()
            .parse::<Label>()
            .map_err(|_| ConfigError::Invalid(format!("label in {s:?} is not an integer")))?;
        Ok(Self::new(path, label))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// One JSON object per line instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_parsing() {
        let source: SourceConfig = "captures/covert.pcap=1".parse().unwrap();
        assert_eq!(source.path, PathBuf::from("captures/covert.pcap"));
        assert_eq!(source.label, 1);

        let source: SourceConfig = "odd=name.pcap = 0".parse().unwrap();
        assert_eq!(source.path, PathBuf::from("odd=name.pcap"));
        assert_eq!(source.label, 0);

        assert!("captures/covert.pcap".parse::<SourceConfig>().is_err());
        assert!("captures/covert.pcap=yes".parse::<SourceConfig>().is_err());
        assert!("=1".parse::<SourceConfig>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window_size.get(), 256);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].label, 1);
        assert_eq!(config.monotonic, MonotonicPolicy::Trust);
        assert_eq!(config.centroid, CentroidPolicy::GridCenter);
        assert!(config.workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "window_size": 64, "centroid": "reject" }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.window_size.side(), 8);
        assert_eq!(config.centroid, CentroidPolicy::Reject);
        assert_eq!(config.iat_output, PathBuf::from("iat_data.csv"));
    }

    #[test]
    fn test_non_square_window_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "window_size": 1024 }"#).unwrap();
        assert!(Config::load_from(&path).is_ok());

        std::fs::write(&path, r#"{ "window_size": 250 }"#).unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.workers = 3;
        config.monotonic = MonotonicPolicy::Reject;

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.workers, 3);
        assert_eq!(loaded.monotonic, MonotonicPolicy::Reject);
        assert_eq!(loaded.sources, config.sources);
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load_from(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config.window_size.get(), 256);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.features_output = config.iat_output.clone();
        assert!(config.validate().is_err());
    }
}
