//! Pipeline orchestration.
//!
//! Stage 1 windows labeled captures into the IAT table; stage 2 turns each
//! IAT row into a feature row. Both stages fan work out to scoped worker
//! threads over bounded channels and funnel results back to a single
//! writer, which is the only shared resource.
//!
//! ```text
//! sources ──▶ [workers: windowing] ──▶ writer ──▶ iat_data.csv
//! iat_data.csv ──▶ reader ──▶ [workers: encode + extract] ──▶ re-order ──▶ writer
//! ```

use crate::capture::{CaptureError, TimestampSource};
use crate::config::Config;
use crate::core::error::PipelineError;
use crate::core::features::{extract_features, CentroidPolicy, FeatureVector};
use crate::core::image::encode_window;
use crate::core::windowing::{IatWindow, IatWindows, MonotonicPolicy, WindowSize};
use crate::dataset::{FeatureTableWriter, IatRow, IatTableReader, IatTableWriter};
use crate::stats::SharedRunStats;
use crossbeam_channel::{bounded, Sender};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use tracing::{debug, info, warn};

/// Capacity of the channels between readers, workers and the writer.
const CHANNEL_CAPACITY: usize = 1024;

/// Knobs shared by both stages.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub window_size: WindowSize,
    pub workers: usize,
    pub monotonic: MonotonicPolicy,
    pub centroid: CentroidPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            window_size: WindowSize::default(),
            workers: 1,
            monotonic: MonotonicPolicy::default(),
            centroid: CentroidPolicy::default(),
        }
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            window_size: config.window_size,
            workers: config.workers.max(1),
            monotonic: config.monotonic,
            centroid: config.centroid,
        }
    }
}

/// Row counts of a full run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub windows_written: u64,
    pub vectors_written: u64,
}

/// Result of one stage 2 row, tagged for re-ordering.
struct RowOutcome {
    seq: u64,
    line: Option<u64>,
    result: Result<FeatureVector, PipelineError>,
}

/// Errors that cost one row rather than the whole stage.
fn rejects_row(error: &PipelineError) -> bool {
    error.is_recoverable() || matches!(error, PipelineError::InvalidWindowSize { .. })
}

/// Drives captures through windowing, encoding and feature extraction.
pub struct Pipeline {
    options: PipelineOptions,
    stats: SharedRunStats,
}

impl Pipeline {
    pub fn new(options: PipelineOptions, stats: SharedRunStats) -> Self {
        Self { options, stats }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn stats(&self) -> &SharedRunStats {
        &self.stats
    }

    /// Run both stages over the sources and paths named in `config`.
    pub fn run(&self, config: &Config) -> Result<RunReport, PipelineError> {
        let sources = config.timestamp_sources();
        self.run_with(&sources, &config.iat_output, &config.features_output)
    }

    /// Run both stages: captures to the IAT table at `iat_path`, then that
    /// table to the feature table at `features_path`. Both files are
    /// truncated first.
    pub fn run_with(
        &self,
        sources: &[Box<dyn TimestampSource>],
        iat_path: &Path,
        features_path: &Path,
    ) -> Result<RunReport, PipelineError> {
        let mut iat_writer = IatTableWriter::create(iat_path, self.options.window_size)?;
        let windows_written = self.extract_iats(sources, &mut iat_writer)?;
        drop(iat_writer);
        info!(windows = windows_written, path = %iat_path.display(), "IAT table written");

        let mut reader = IatTableReader::open(iat_path)?;
        let mut feature_writer = FeatureTableWriter::create(features_path)?;
        let vectors_written = self.features_from_table(&mut reader, &mut feature_writer)?;
        info!(vectors = vectors_written, path = %features_path.display(), "feature table written");

        Ok(RunReport {
            windows_written,
            vectors_written,
        })
    }

    /// Stage 1: window every source and write the windows as IAT rows.
    ///
    /// Sources are spread over the workers; windows of one source keep
    /// their order, windows of different sources may interleave. A source
    /// that cannot be opened is logged and skipped.
    pub fn extract_iats<W: Write>(
        &self,
        sources: &[Box<dyn TimestampSource>],
        writer: &mut IatTableWriter<W>,
    ) -> Result<u64, PipelineError> {
        let workers = self.options.workers.clamp(1, sources.len().max(1));
        debug!(sources = sources.len(), workers, "extracting IAT windows");

        thread::scope(|scope| {
            let (job_tx, job_rx) = bounded::<&dyn TimestampSource>(sources.len());
            for source in sources {
                // Capacity equals the job count, so this never blocks.
                let _ = job_tx.send(source.as_ref());
            }
            drop(job_tx);

            let (window_tx, window_rx) = bounded::<IatWindow>(CHANNEL_CAPACITY);
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let window_tx = window_tx.clone();
                scope.spawn(move || {
                    for source in job_rx.iter() {
                        if !self.window_source(source, &window_tx) {
                            break;
                        }
                    }
                });
            }
            drop(window_tx);

            let mut written = 0u64;
            for window in window_rx.iter() {
                writer.write_window(&window)?;
                written += 1;
            }
            writer.flush()?;
            Ok(written)
        })
    }

    /// Stream one source's windows into `tx`. Returns `false` once the
    /// receiving side has gone away.
    fn window_source(&self, source: &dyn TimestampSource, tx: &Sender<IatWindow>) -> bool {
        let name = source.name();
        let label = source.label();

        let timestamps = match source.timestamps() {
            Ok(timestamps) => timestamps,
            Err(e) => {
                warn!(source = %name, error = %e, "skipping source");
                self.stats.record_source_skipped();
                return true;
            }
        };

        let mut capture_error: Option<CaptureError> = None;
        let mut rejected: Option<PipelineError> = None;
        let mut receiver_alive = true;

        let summary = {
            let clean = timestamps.map_while(|timestamp| match timestamp {
                Ok(t) => Some(t),
                Err(e) => {
                    capture_error = Some(e);
                    None
                }
            });
            let mut windows = match IatWindows::new(
                clean,
                label,
                self.options.window_size.get(),
                self.options.monotonic,
            ) {
                Ok(windows) => windows,
                Err(e) => {
                    warn!(source = %name, error = %e, "skipping source");
                    self.stats.record_source_skipped();
                    return true;
                }
            };

            for window in windows.by_ref() {
                match window {
                    Ok(window) => {
                        if tx.send(window).is_err() {
                            receiver_alive = false;
                            break;
                        }
                    }
                    Err(e) => {
                        rejected = Some(e);
                        break;
                    }
                }
            }
            windows.summary()
        };

        if let Some(e) = capture_error {
            warn!(source = %name, error = %e, "capture ended early");
        }
        if let Some(e) = rejected {
            warn!(source = %name, error = %e, "source rejected; later timestamps ignored");
        }

        self.stats.record_source(&summary);
        if summary.insufficient_data() {
            info!(source = %name, label, timestamps = summary.timestamps, "too few timestamps for any window");
        } else {
            info!(
                source = %name,
                label,
                timestamps = summary.timestamps,
                windows = summary.windows,
                dropped = summary.dropped_iats,
                "source windowed"
            );
        }
        receiver_alive
    }

    /// Stage 2: turn every IAT row into a feature row.
    ///
    /// Rows are processed in parallel but written in input order. Rows that
    /// fail to parse or encode are logged, counted and skipped; I/O and
    /// CSV failures abort the stage.
    pub fn features_from_table<R, W>(
        &self,
        reader: &mut IatTableReader<R>,
        writer: &mut FeatureTableWriter<W>,
    ) -> Result<u64, PipelineError>
    where
        R: Read + Send,
        W: Write,
    {
        let workers = self.options.workers.max(1);
        debug!(
            window_size = reader.window_size().get(),
            workers, "extracting features"
        );

        thread::scope(|scope| {
            let (row_tx, row_rx) = bounded::<(u64, Result<IatRow, PipelineError>)>(CHANNEL_CAPACITY);
            let (outcome_tx, outcome_rx) = bounded::<RowOutcome>(CHANNEL_CAPACITY);

            scope.spawn(move || {
                for (seq, row) in (0u64..).zip(reader.rows()) {
                    if row_tx.send((seq, row)).is_err() {
                        break;
                    }
                }
            });

            for _ in 0..workers {
                let row_rx = row_rx.clone();
                let outcome_tx = outcome_tx.clone();
                scope.spawn(move || {
                    for (seq, row) in row_rx.iter() {
                        let outcome = match row {
                            Ok(row) => RowOutcome {
                                seq,
                                line: Some(row.line),
                                result: self.featurize_window(&row.window),
                            },
                            Err(e) => RowOutcome {
                                seq,
                                line: None,
                                result: Err(e),
                            },
                        };
                        if outcome_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(row_rx);
            drop(outcome_tx);

            let mut pending: BTreeMap<u64, RowOutcome> = BTreeMap::new();
            let mut next_seq = 0u64;
            let mut written = 0u64;
            for outcome in outcome_rx.iter() {
                pending.insert(outcome.seq, outcome);
                while let Some(outcome) = pending.remove(&next_seq) {
                    next_seq += 1;
                    self.stats.record_row_read();
                    match outcome.result {
                        Ok(vector) => {
                            writer.write_vector(&vector)?;
                            self.stats.record_vector_written();
                            written += 1;
                        }
                        Err(e) if rejects_row(&e) => {
                            self.stats.record_row_rejected();
                            match outcome.line {
                                Some(line) => warn!(line, error = %e, "row rejected"),
                                None => warn!(error = %e, "row rejected"),
                            }
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            writer.flush()?;
            Ok(written)
        })
    }

    /// Encode and extract features for windows held in memory, in parallel.
    /// Results are in input order.
    pub fn featurize(&self, windows: &[IatWindow]) -> Vec<Result<FeatureVector, PipelineError>> {
        if windows.is_empty() {
            return Vec::new();
        }
        let chunk_size = windows.len().div_ceil(self.options.workers.max(1));

        thread::scope(|scope| {
            let handles: Vec<_> = windows
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|window| self.featurize_window(window))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }

    /// Encode one window and compute its features.
    pub fn featurize_window(&self, window: &IatWindow) -> Result<FeatureVector, PipelineError> {
        let grid = encode_window(&window.iats)?;
        if grid.values().iter().all(|&v| v == 0.0) {
            self.stats.record_blank_image();
        }
        let features = extract_features(&grid, self.options.centroid)?;
        Ok(FeatureVector {
            label: window.label,
            features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TimestampSequence;
    use crate::stats::create_shared_stats;

    fn pipeline(window_size: usize, workers: usize) -> Pipeline {
        Pipeline::new(
            PipelineOptions {
                window_size: WindowSize::new(window_size).unwrap(),
                workers,
                ..Default::default()
            },
            create_shared_stats(),
        )
    }

    fn jittered(count: usize, seed: u64) -> Vec<f64> {
        let mut t = 0.0;
        (0..count)
            .map(|i| {
                t += 0.001 + ((i as u64 * 7919 + seed) % 13) as f64 * 0.0005;
                t
            })
            .collect()
    }

    #[test]
    fn test_extract_counts_and_labels() {
        let pipeline = pipeline(4, 2);
        let sources: Vec<Box<dyn TimestampSource>> = vec![
            Box::new(TimestampSequence::new(1, jittered(14, 1))),
            Box::new(TimestampSequence::new(0, jittered(1, 2))),
            Box::new(TimestampSequence::new(0, jittered(9, 3))),
        ];

        let mut writer = IatTableWriter::new(Vec::new(), WindowSize::new(4).unwrap()).unwrap();
        let written = pipeline.extract_iats(&sources, &mut writer).unwrap();

        // 13 diffs -> 3 windows, 0 diffs -> 0, 8 diffs -> 2.
        assert_eq!(written, 5);
        let s = pipeline.stats().snapshot();
        assert_eq!(s.sources_processed, 3);
        assert_eq!(s.sources_insufficient, 1);
        assert_eq!(s.windows_extracted, 5);
        assert_eq!(s.iats_dropped, 1);
    }

    #[test]
    fn test_missing_source_is_skipped() {
        let pipeline = pipeline(4, 1);
        let sources: Vec<Box<dyn TimestampSource>> = vec![
            Box::new(crate::capture::PcapSource::new("/nonexistent/a.pcap", 1)),
            Box::new(TimestampSequence::new(0, jittered(5, 4))),
        ];

        let mut writer = IatTableWriter::new(Vec::new(), WindowSize::new(4).unwrap()).unwrap();
        assert_eq!(pipeline.extract_iats(&sources, &mut writer).unwrap(), 1);
        assert_eq!(pipeline.stats().snapshot().sources_skipped, 1);
    }

    #[test]
    fn test_featurize_preserves_order() {
        let pipeline = pipeline(16, 3);
        let windows: Vec<IatWindow> = (0..10)
            .map(|label| IatWindow {
                label,
                iats: jittered(16, label as u64),
            })
            .collect();

        let vectors = pipeline.featurize(&windows);
        assert_eq!(vectors.len(), 10);
        for (label, vector) in vectors.iter().enumerate() {
            assert_eq!(vector.as_ref().unwrap().label, label as i64);
        }
    }

    #[test]
    fn test_featurize_flat_window_counts_blank_image() {
        let pipeline = pipeline(16, 1);
        let vectors = pipeline.featurize(&[IatWindow {
            label: 0,
            iats: vec![5.0; 16],
        }]);

        let features = vectors[0].as_ref().unwrap().features;
        assert_eq!((features.center_x, features.center_y), (1.5, 1.5));
        assert_eq!(pipeline.stats().snapshot().blank_images, 1);
    }

    #[test]
    fn test_features_from_table_skips_bad_rows_in_order() {
        let pipeline = pipeline(4, 4);
        let text = "label,iat_1,iat_2,iat_3,iat_4\n\
                    1,0.1,0.2,0.3,0.4\n\
                    0,0.1,oops,0.3,0.4\n\
                    0,0.4,0.3,0.2,0.1\n\
                    1,0.1,0.2\n\
                    1,0.5,0.5,0.5,0.6\n";
        let mut reader = IatTableReader::new(text.as_bytes()).unwrap();
        let mut writer = FeatureTableWriter::new(Vec::new()).unwrap();

        let written = pipeline
            .features_from_table(&mut reader, &mut writer)
            .unwrap();
        assert_eq!(written, 3);

        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let labels: Vec<&str> = output
            .lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap())
            .collect();
        assert_eq!(labels, vec!["1", "0", "1"]);

        let s = pipeline.stats().snapshot();
        assert_eq!(s.rows_read, 5);
        assert_eq!(s.rows_rejected, 2);
        assert_eq!(s.vectors_written, 3);
    }

    #[test]
    fn test_invalid_utf8_row_does_not_stop_stage() {
        let pipeline = pipeline(4, 2);
        let bytes: &[u8] = b"label,iat_1,iat_2,iat_3,iat_4\n\
                             1,0.1,0.2,0.3,0.4\n\
                             0,0.1,\xff\xfe,0.3,0.4\n\
                             1,0.4,0.3,0.2,0.1\n";
        let mut reader = IatTableReader::new(bytes).unwrap();
        let mut writer = FeatureTableWriter::new(Vec::new()).unwrap();

        assert_eq!(pipeline.features_from_table(&mut reader, &mut writer).unwrap(), 2);
        let s = pipeline.stats().snapshot();
        assert_eq!(s.rows_read, 3);
        assert_eq!(s.rows_rejected, 1);
    }

    #[test]
    fn test_degenerate_rows_rejected_under_reject_policy() {
        let pipeline = Pipeline::new(
            PipelineOptions {
                window_size: WindowSize::new(4).unwrap(),
                centroid: CentroidPolicy::Reject,
                ..Default::default()
            },
            create_shared_stats(),
        );
        let text = "label,iat_1,iat_2,iat_3,iat_4\n0,1,1,1,1\n1,0,1,2,3\n";
        let mut reader = IatTableReader::new(text.as_bytes()).unwrap();
        let mut writer = FeatureTableWriter::new(Vec::new()).unwrap();

        assert_eq!(pipeline.features_from_table(&mut reader, &mut writer).unwrap(), 1);
        assert_eq!(pipeline.stats().snapshot().rows_rejected, 1);
    }
}
