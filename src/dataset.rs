//! Tabular persistence of IAT windows and feature vectors.
//!
//! Two CSV layouts are used between and after the stages:
//!
//! ```text
//! label,iat_1,...,iat_N
//! label,mean_gray,std_dev,mode,center_x,center_y,integrated_density,median,skewness,kurtosis
//! ```
//!
//! Readers validate every row against the header width and parse every
//! field strictly, returning one result per row so a bad row can be
//! skipped without ending the run.

use crate::core::error::PipelineError;
use crate::core::features::{FeatureVector, FEATURE_NAMES};
use crate::core::windowing::{IatWindow, Label, WindowSize};
use csv::{ByteRecord, ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// One parsed row of the IAT table.
#[derive(Debug, Clone, PartialEq)]
pub struct IatRow {
    /// 1-based line number in the source file
    pub line: u64,
    pub window: IatWindow,
}

/// Header of the IAT table for windows of `size` values.
pub fn iat_header(size: usize) -> Vec<String> {
    std::iter::once("label".to_string())
        .chain((1..=size).map(|i| format!("iat_{i}")))
        .collect()
}

/// Header of the feature table.
pub fn feature_header() -> Vec<&'static str> {
    std::iter::once("label").chain(FEATURE_NAMES).collect()
}

/// Writes IAT windows, one row each, after a header.
pub struct IatTableWriter<W: Write> {
    writer: csv::Writer<W>,
    size: WindowSize,
}

impl IatTableWriter<File> {
    /// Create (or truncate) the table at `path`.
    pub fn create(path: &Path, size: WindowSize) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(File::create(path)?, size)
    }
}

impl<W: Write> IatTableWriter<W> {
    pub fn new(inner: W, size: WindowSize) -> Result<Self, PipelineError> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(iat_header(size.get()))?;
        Ok(Self { writer, size })
    }

    pub fn write_window(&mut self, window: &IatWindow) -> Result<(), PipelineError> {
        if window.iats.len() != self.size.get() {
            return Err(PipelineError::InvalidWindowSize {
                size: window.iats.len(),
            });
        }
        let record = std::iter::once(window.label.to_string())
            .chain(window.iats.iter().map(|iat| iat.to_string()));
        self.writer.write_record(record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), PipelineError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads the IAT table, inferring the window size from its header.
pub struct IatTableReader<R: Read> {
    reader: csv::Reader<R>,
    size: WindowSize,
}

impl IatTableReader<File> {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read> IatTableReader<R> {
    /// Read and validate the header: `label,iat_1,...,iat_N` with `N` a
    /// perfect square.
    pub fn new(inner: R) -> Result<Self, PipelineError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(inner);
        let headers = reader.headers()?.clone();
        let size = WindowSize::new(headers.len().saturating_sub(1))?;
        check_header(&headers, &iat_header(size.get()))?;
        Ok(Self { reader, size })
    }

    pub fn window_size(&self) -> WindowSize {
        self.size
    }

    /// Parse the remaining rows, one result per row. Fields are decoded
    /// here rather than by the CSV reader, so a field that is not UTF-8
    /// rejects only its own row.
    pub fn rows(&mut self) -> impl Iterator<Item = Result<IatRow, PipelineError>> + '_ {
        let size = self.size;
        self.reader
            .byte_records()
            .map(move |record| parse_iat_record(&record?, size))
    }
}

fn check_header(found: &StringRecord, expected: &[String]) -> Result<(), PipelineError> {
    for (column, (found, expected)) in found.iter().zip(expected).enumerate() {
        if found != expected {
            return Err(PipelineError::InvalidHeader {
                column: column + 1,
                expected: expected.clone(),
                found: found.to_string(),
            });
        }
    }
    Ok(())
}

fn parse_iat_record(record: &ByteRecord, size: WindowSize) -> Result<IatRow, PipelineError> {
    let line = record.position().map(|p| p.line()).unwrap_or(0);
    let expected = size.get() + 1;
    if record.len() != expected {
        return Err(PipelineError::RowWidth {
            line,
            expected,
            found: record.len(),
        });
    }

    let label = parse_label(&record[0], line)?;
    let iats = record
        .iter()
        .enumerate()
        .skip(1)
        .map(|(column, field)| parse_real(field, line, column + 1))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(IatRow {
        line,
        window: IatWindow { label, iats },
    })
}

fn parse_label(field: &[u8], line: u64) -> Result<Label, PipelineError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|text| text.parse::<Label>().ok())
        .ok_or_else(|| non_numeric(field, line, 1))
}

fn parse_real(field: &[u8], line: u64, column: usize) -> Result<f64, PipelineError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .ok_or_else(|| non_numeric(field, line, column))
}

fn non_numeric(field: &[u8], line: u64, column: usize) -> PipelineError {
    PipelineError::NonNumericField {
        line,
        column,
        value: String::from_utf8_lossy(field).into_owned(),
    }
}

/// Writes labeled feature vectors after a header.
pub struct FeatureTableWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl FeatureTableWriter<File> {
    /// Create (or truncate) the table at `path`.
    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(File::create(path)?)
    }
}

impl<W: Write> FeatureTableWriter<W> {
    pub fn new(inner: W) -> Result<Self, PipelineError> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(feature_header())?;
        Ok(Self { writer })
    }

    pub fn write_vector(&mut self, vector: &FeatureVector) -> Result<(), PipelineError> {
        let record = std::iter::once(vector.label.to_string())
            .chain(vector.features.to_array().into_iter().map(|v| v.to_string()));
        self.writer.write_record(record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), PipelineError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W, PipelineError> {
        self.writer
            .into_inner()
            .map_err(|e| PipelineError::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::ImageFeatures;

    fn table(text: &str) -> IatTableReader<&[u8]> {
        IatTableReader::new(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_iat_header() {
        assert_eq!(iat_header(2), vec!["label", "iat_1", "iat_2"]);
        assert_eq!(iat_header(256).len(), 257);
        assert_eq!(iat_header(256)[256], "iat_256");
    }

    #[test]
    fn test_write_then_read_iat_rows() {
        let mut buffer = Vec::new();
        {
            let mut writer = IatTableWriter::new(&mut buffer, WindowSize::new(4).unwrap()).unwrap();
            writer
                .write_window(&IatWindow {
                    label: 1,
                    iats: vec![0.1, 0.0, 0.3, 0.25],
                })
                .unwrap();
            writer.flush().unwrap();
        }

        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("label,iat_1,iat_2,iat_3,iat_4\n"));

        let mut reader = table(&text);
        assert_eq!(reader.window_size().get(), 4);
        let rows: Vec<IatRow> = reader.rows().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[0].window.iats, vec![0.1, 0.0, 0.3, 0.25]);
    }

    #[test]
    fn test_writer_rejects_wrong_width() {
        let mut writer = IatTableWriter::new(Vec::new(), WindowSize::new(4).unwrap()).unwrap();
        let result = writer.write_window(&IatWindow {
            label: 0,
            iats: vec![1.0; 3],
        });
        assert!(matches!(result, Err(PipelineError::InvalidWindowSize { size: 3 })));
    }

    #[test]
    fn test_header_must_be_square() {
        let result = IatTableReader::new("label,iat_1,iat_2,iat_3\n0,1,2,3\n".as_bytes());
        assert!(matches!(result, Err(PipelineError::InvalidWindowSize { size: 3 })));

        let result = IatTableReader::new("label\n0\n".as_bytes());
        assert!(matches!(result, Err(PipelineError::InvalidWindowSize { size: 0 })));
    }

    #[test]
    fn test_bad_rows_are_reported_individually() {
        let text = "label,iat_1,iat_2,iat_3,iat_4\n\
                    1,0.1,0.2,0.3,0.4\n\
                    1,0.1,0.2,0.3\n\
                    x,0.1,0.2,0.3,0.4\n\
                    0,0.1,abc,0.3,0.4\n\
                    0,0.1,NaN,0.3,0.4\n\
                    0,1,2,3,4\n";
        let mut reader = table(text);
        let rows: Vec<_> = reader.rows().collect();

        assert_eq!(rows.len(), 6);
        assert!(rows[0].is_ok());
        assert!(matches!(
            rows[1],
            Err(PipelineError::RowWidth { line: 3, expected: 5, found: 4 })
        ));
        assert!(matches!(
            rows[2],
            Err(PipelineError::NonNumericField { line: 4, column: 1, .. })
        ));
        assert!(matches!(
            rows[3],
            Err(PipelineError::NonNumericField { line: 5, column: 3, .. })
        ));
        assert!(matches!(rows[4], Err(PipelineError::NonNumericField { .. })));
        assert_eq!(rows[5].as_ref().unwrap().window.label, 0);
    }

    #[test]
    fn test_invalid_utf8_rejects_only_its_row() {
        let bytes: &[u8] = b"label,iat_1,iat_2,iat_3,iat_4\n\
                             1,0.1,0.2,0.3,0.4\n\
                             0,0.1,\xff\xfe,0.3,0.4\n\
                             1,0.4,0.3,0.2,0.1\n";
        let mut reader = IatTableReader::new(bytes).unwrap();
        let rows: Vec<_> = reader.rows().collect();

        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        match &rows[1] {
            Err(PipelineError::NonNumericField { line, column, value }) => {
                assert_eq!((*line, *column), (3, 3));
                assert!(value.contains('\u{FFFD}'));
            }
            other => panic!("unexpected row: {other:?}"),
        }
        assert_eq!(rows[2].as_ref().unwrap().window.iats[0], 0.4);
    }

    #[test]
    fn test_header_names_are_checked() {
        let mut features = FeatureTableWriter::new(Vec::new()).unwrap();
        features.flush().unwrap();
        let text = features.into_inner().unwrap();
        assert!(matches!(
            IatTableReader::new(text.as_slice()),
            Err(PipelineError::InvalidHeader { column: 2, .. })
        ));

        let result = IatTableReader::new("label,iat_1,iat_2,iat_4,iat_3\n".as_bytes());
        assert!(matches!(
            result,
            Err(PipelineError::InvalidHeader { column: 4, .. })
        ));
    }

    #[test]
    fn test_feature_table_layout() {
        let mut writer = FeatureTableWriter::new(Vec::new()).unwrap();
        writer
            .write_vector(&FeatureVector {
                label: 1,
                features: ImageFeatures {
                    mean_gray: 1.5,
                    kurtosis: 3.0,
                    ..Default::default()
                },
            })
            .unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("label,mean_gray,std_dev,mode,center_x,center_y,integrated_density,median,skewness,kurtosis")
        );
        assert_eq!(lines.next(), Some("1,1.5,0,0,0,0,0,0,0,3"));
        assert_eq!(lines.next(), None);
    }
}
