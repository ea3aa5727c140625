//! Packet capture files as timestamp sources.
//!
//! Packets are streamed through `pcap-parser`, which detects legacy pcap and
//! pcapng from the file magic. Only record timestamps are kept. pcapng
//! timestamps are scaled by the resolution and offset of the interface that
//! captured them.

use crate::capture::types::{CaptureError, TimestampIter, TimestampSource};
use crate::core::windowing::Label;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{build_ts_resolution, create_reader, Block, PcapBlockOwned, PcapError};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reader buffer size; must hold the largest single record.
const READ_BUFFER: usize = 65536;

/// A capture file carrying one label.
#[derive(Debug, Clone)]
pub struct PcapSource {
    path: PathBuf,
    label: Label,
}

impl PcapSource {
    pub fn new(path: impl Into<PathBuf>, label: Label) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TimestampSource for PcapSource {
    fn label(&self) -> Label {
        self.label
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn timestamps(&self) -> Result<TimestampIter<'_>, CaptureError> {
        Ok(Box::new(PcapTimestamps::open(&self.path)?))
    }
}

/// Timestamp scale of one pcapng interface.
#[derive(Debug, Clone, Copy)]
struct InterfaceClock {
    /// Timestamp units per second
    resolution: u64,
    /// Seconds added to every timestamp
    offset: f64,
}

/// Streaming iterator over the packet timestamps of a pcap or pcapng file.
pub struct PcapTimestamps {
    reader: Box<dyn PcapReaderIterator>,
    path: PathBuf,
    nanosecond: bool,
    interfaces: Vec<InterfaceClock>,
    warned_simple: bool,
    done: bool,
}

impl PcapTimestamps {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        if !path.exists() {
            return Err(CaptureError::NotFound(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|source| CaptureError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = create_reader(READ_BUFFER, BufReader::new(file)).map_err(|e| {
            CaptureError::Parse {
                path: path.to_path_buf(),
                message: format!("not a pcap or pcapng file: {e:?}"),
            }
        })?;
        debug!(path = %path.display(), "opened capture");

        Ok(Self {
            reader,
            path: path.to_path_buf(),
            nanosecond: false,
            interfaces: Vec::new(),
            warned_simple: false,
            done: false,
        })
    }

    fn parse_error(&self, message: String) -> CaptureError {
        CaptureError::Parse {
            path: self.path.clone(),
            message,
        }
    }
}

impl Iterator for PcapTimestamps {
    type Item = Result<f64, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let timestamp = match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            self.nanosecond = header.is_nanosecond_precision();
                            Ok(None)
                        }
                        PcapBlockOwned::Legacy(packet) => Ok(Some(to_seconds(
                            packet.ts_sec,
                            packet.ts_usec,
                            self.nanosecond,
                        ))),
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            // Interface ids are scoped to their section.
                            self.interfaces.clear();
                            Ok(None)
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            match build_ts_resolution(idb.if_tsresol) {
                                Some(resolution) => {
                                    self.interfaces.push(InterfaceClock {
                                        resolution,
                                        offset: idb.if_tsoffset as f64,
                                    });
                                    Ok(None)
                                }
                                None => Err(format!(
                                    "unsupported timestamp resolution {:#x}",
                                    idb.if_tsresol
                                )),
                            }
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            match self.interfaces.get(epb.if_id as usize) {
                                Some(clock) => {
                                    Ok(Some(clock.seconds(epb.ts_high, epb.ts_low)))
                                }
                                None => Err(format!(
                                    "packet references unknown interface {}",
                                    epb.if_id
                                )),
                            }
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(_)) => {
                            if !self.warned_simple {
                                warn!(path = %self.path.display(), "simple packet blocks carry no timestamp; skipped");
                                self.warned_simple = true;
                            }
                            Ok(None)
                        }
                        PcapBlockOwned::NG(_) => Ok(None),
                    };
                    self.reader.consume(offset);
                    match timestamp {
                        Ok(Some(timestamp)) => return Some(Ok(timestamp)),
                        Ok(None) => {}
                        Err(message) => {
                            self.done = true;
                            return Some(Err(self.parse_error(message)));
                        }
                    }
                }
                Err(PcapError::Eof) => self.done = true,
                Err(PcapError::Incomplete { .. }) => {
                    if let Err(e) = self.reader.refill() {
                        self.done = true;
                        let message = format!("refill failed: {e:?}");
                        return Some(Err(self.parse_error(message)));
                    }
                }
                Err(e) => {
                    let message = format!("{e:?}");
                    self.done = true;
                    return Some(Err(self.parse_error(message)));
                }
            }
        }
        None
    }
}

impl InterfaceClock {
    /// 64-bit pcapng timestamp to seconds.
    fn seconds(&self, ts_high: u32, ts_low: u32) -> f64 {
        let units = (u64::from(ts_high) << 32) | u64::from(ts_low);
        let whole = units / self.resolution;
        let fraction = units % self.resolution;
        self.offset + whole as f64 + fraction as f64 / self.resolution as f64
    }
}

/// Legacy record header timestamp to seconds.
fn to_seconds(sec: u32, fraction: u32, nanosecond: bool) -> f64 {
    let scale = if nanosecond { 1e9 } else { 1e6 };
    sec as f64 + fraction as f64 / scale
}
