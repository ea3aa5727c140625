//! Timestamp sources for the pipeline.
//!
//! Capture parsing itself is delegated to `pcap-parser`; this module only
//! adapts captures (or in-memory sequences) into labeled timestamp streams.

pub mod pcap;
pub mod types;

// Re-export commonly used types
pub use pcap::{PcapSource, PcapTimestamps};
pub use types::{CaptureError, TimestampIter, TimestampSequence, TimestampSource};
