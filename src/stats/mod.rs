//! Run statistics for the pipeline.
//!
//! Tracks what each run read, produced and rejected so that empty outputs
//! can be told apart from short captures, partial windows or bad rows.

pub mod log;

// Re-export commonly used types
pub use log::{create_shared_stats, load_snapshot, RunSnapshot, RunStats, SharedRunStats};
