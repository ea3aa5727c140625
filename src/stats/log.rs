//! Run statistics for the pipeline.
//!
//! Counters are atomic so worker threads can record into one shared log.
//! Sources that produced nothing because they were too short are counted
//! apart from differences dropped because they did not fill a window.

use crate::core::windowing::WindowingSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counters for one pipeline run.
#[derive(Debug)]
pub struct RunStats {
    run_id: Uuid,
    /// Sources read to the end
    sources_processed: AtomicU64,
    /// Sources that were missing or failed to parse
    sources_skipped: AtomicU64,
    /// Sources with fewer than two timestamps
    sources_insufficient: AtomicU64,
    /// Timestamps read across all sources
    timestamps_read: AtomicU64,
    /// IAT windows produced by stage 1
    windows_extracted: AtomicU64,
    /// Trailing differences discarded by stage 1
    iats_dropped: AtomicU64,
    /// Rows read by stage 2
    rows_read: AtomicU64,
    /// Rows rejected by stage 2
    rows_rejected: AtomicU64,
    /// Feature vectors written by stage 2
    vectors_written: AtomicU64,
    /// Grids with zero total intensity
    blank_images: AtomicU64,
    started_at: DateTime<Utc>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            sources_processed: AtomicU64::new(0),
            sources_skipped: AtomicU64::new(0),
            sources_insufficient: AtomicU64::new(0),
            timestamps_read: AtomicU64::new(0),
            windows_extracted: AtomicU64::new(0),
            iats_dropped: AtomicU64::new(0),
            rows_read: AtomicU64::new(0),
            rows_rejected: AtomicU64::new(0),
            vectors_written: AtomicU64::new(0),
            blank_images: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record a source that was windowed to the end.
    pub fn record_source(&self, summary: &WindowingSummary) {
        self.sources_processed.fetch_add(1, Ordering::Relaxed);
        if summary.insufficient_data() {
            self.sources_insufficient.fetch_add(1, Ordering::Relaxed);
        }
        self.timestamps_read
            .fetch_add(summary.timestamps as u64, Ordering::Relaxed);
        self.windows_extracted
            .fetch_add(summary.windows as u64, Ordering::Relaxed);
        self.iats_dropped
            .fetch_add(summary.dropped_iats as u64, Ordering::Relaxed);
    }

    pub fn record_source_skipped(&self) {
        self.sources_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_row_read(&self) {
        self.rows_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_row_rejected(&self) {
        self.rows_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vector_written(&self) {
        self.vectors_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blank_image(&self) {
        self.blank_images.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id,
            sources_processed: self.sources_processed.load(Ordering::Relaxed),
            sources_skipped: self.sources_skipped.load(Ordering::Relaxed),
            sources_insufficient: self.sources_insufficient.load(Ordering::Relaxed),
            timestamps_read: self.timestamps_read.load(Ordering::Relaxed),
            windows_extracted: self.windows_extracted.load(Ordering::Relaxed),
            iats_dropped: self.iats_dropped.load(Ordering::Relaxed),
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_rejected: self.rows_rejected.load(Ordering::Relaxed),
            vectors_written: self.vectors_written.load(Ordering::Relaxed),
            blank_images: self.blank_images.load(Ordering::Relaxed),
            started_at: self.started_at,
            elapsed_secs: (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Run {}:\n\
             - Sources processed: {} ({} too short, {} skipped)\n\
             - Timestamps read: {}\n\
             - IAT windows extracted: {} ({} trailing IATs dropped)\n\
             - Rows read: {} ({} rejected)\n\
             - Feature vectors written: {} ({} blank images)\n\
             - Elapsed: {:.2} seconds",
            s.run_id,
            s.sources_processed,
            s.sources_insufficient,
            s.sources_skipped,
            s.timestamps_read,
            s.windows_extracted,
            s.iats_dropped,
            s.rows_read,
            s.rows_rejected,
            s.vectors_written,
            s.blank_images,
            s.elapsed_secs
        )
    }

    /// Save a snapshot to disk as JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot()).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the run counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub sources_processed: u64,
    pub sources_skipped: u64,
    pub sources_insufficient: u64,
    pub timestamps_read: u64,
    pub windows_extracted: u64,
    pub iats_dropped: u64,
    pub rows_read: u64,
    pub rows_rejected: u64,
    pub vectors_written: u64,
    pub blank_images: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

/// Thread-safe shared run statistics.
pub type SharedRunStats = Arc<RunStats>;

/// Create a new shared statistics log.
pub fn create_shared_stats() -> SharedRunStats {
    Arc::new(RunStats::new())
}

/// Load a previously saved snapshot.
pub fn load_snapshot(path: &Path) -> Result<RunSnapshot, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(std::io::Error::other)
}
