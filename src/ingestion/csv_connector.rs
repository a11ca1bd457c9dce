//! CSV Connector - Streams a delimited source as fixed-size record batches

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::ingestion::batch::RecordBatch;
use crate::ingestion::source::{open_decoded, SourceLocation};

pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Lazy, forward-only sequence of `RecordBatch`es over a decoded CSV stream.
///
/// Every batch holds `chunk_size` rows except possibly the last. The first
/// error ends the sequence; the reader cannot be rewound.
pub struct CsvConnector {
    reader: csv::Reader<Box<dyn Read>>,
    columns: Arc<[String]>,
    chunk_size: usize,
    next_index: usize,
    rows_read: u64,
    record: StringRecord,
    finished: bool,
}

impl CsvConnector {
    /// Resolve `location`, decode it and read the header row.
    pub fn open(location: &str, chunk_size: usize, delimiter: u8) -> Result<Self> {
        let location = SourceLocation::parse(location)?;
        debug!(source = %location, chunk_size, "Opening CSV source");
        let stream = open_decoded(&location)?;
        Self::from_reader(stream, chunk_size, delimiter)
    }

    /// Wrap an already-decoded byte stream.
    pub fn from_reader(stream: Box<dyn Read>, chunk_size: usize, delimiter: u8) -> Result<Self> {
        if chunk_size == 0 {
            return Err(IngestError::Config("chunk size must be positive".to_string()));
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .delimiter(delimiter)
            .from_reader(stream);

        let headers = reader.headers().map_err(map_csv_error)?.clone();
        if headers.is_empty() {
            return Err(IngestError::Parse("source has no header row".to_string()));
        }

        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(headers.len());
        for (idx, raw) in headers.iter().enumerate() {
            let name = raw.trim().to_string();
            if name.is_empty() {
                return Err(IngestError::Parse(format!(
                    "header column {} has no name",
                    idx + 1
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(IngestError::Parse(format!(
                    "header repeats column '{}'",
                    name
                )));
            }
            columns.push(name);
        }
        debug!(columns = columns.len(), "Read source header");

        Ok(Self {
            reader,
            columns: columns.into(),
            chunk_size,
            next_index: 0,
            rows_read: 0,
            record: StringRecord::new(),
            finished: false,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn read_batch(&mut self) -> Result<Option<RecordBatch>> {
        let mut rows = Vec::with_capacity(self.chunk_size.min(DEFAULT_CHUNK_SIZE));
        let mut lines = Vec::with_capacity(rows.capacity());

        while rows.len() < self.chunk_size {
            let more = self
                .reader
                .read_record(&mut self.record)
                .map_err(map_csv_error)?;
            if !more {
                break;
            }
            let line = self.record.position().map(|p| p.line()).unwrap_or(0);
            let row = self
                .record
                .iter()
                .map(|cell| {
                    if cell.trim().is_empty() {
                        None
                    } else {
                        Some(cell.to_string())
                    }
                })
                .collect();
            rows.push(row);
            lines.push(line);
        }

        if rows.is_empty() {
            return Ok(None);
        }

        let read = rows.len() as u64;
        let batch = RecordBatch::new(self.next_index, Arc::clone(&self.columns), rows, lines)
            .with_row_offset(self.rows_read);
        self.next_index += 1;
        self.rows_read += read;
        Ok(Some(batch))
    }
}

impl Iterator for CsvConnector {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for CsvConnector {}

fn map_csv_error(err: csv::Error) -> IngestError {
    let line = err.position().map(|p| p.line());
    match err.into_kind() {
        csv::ErrorKind::Io(e) => IngestError::from_stream_io(e),
        csv::ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } => IngestError::Parse(format!(
            "line {}: expected {} fields, found {}",
            pos.map(|p| p.line()).or(line).unwrap_or(0),
            expected_len,
            len
        )),
        csv::ErrorKind::Utf8 { pos, err } => IngestError::Parse(format!(
            "line {}: invalid UTF-8 in field {}",
            pos.map(|p| p.line()).or(line).unwrap_or(0),
            err.field() + 1
        )),
        other => IngestError::Parse(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn connector(text: &str, chunk: usize) -> Result<CsvConnector> {
        CsvConnector::from_reader(Box::new(Cursor::new(text.as_bytes().to_vec())), chunk, b',')
    }

    #[test]
    fn test_boundary_chunk() {
        let mut text = String::from("id,name\n");
        for i in 0..7 {
            text.push_str(&format!("{},n{}\n", i, i));
        }
        let sizes: Vec<usize> = connector(&text, 3)
            .unwrap()
            .map(|b| b.unwrap().num_rows())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let offsets: Vec<u64> = connector(&text, 3)
            .unwrap()
            .map(|b| b.unwrap().row_offset())
            .collect();
        assert_eq!(offsets, vec![0, 3, 6]);

        let even: Vec<usize> = connector("id\n1\n2\n3\n4\n", 2)
            .unwrap()
            .map(|b| b.unwrap().num_rows())
            .collect();
        assert_eq!(even, vec![2, 2]);
    }

    #[test]
    fn test_blank_cells_are_null_and_lines_tracked() {
        let mut batches = connector("a,b\n1,\n ,x\n", 10).unwrap();
        let batch = batches.next().unwrap().unwrap();
        assert_eq!(batch.rows()[0], vec![Some("1".to_string()), None]);
        assert_eq!(batch.rows()[1], vec![None, Some("x".to_string())]);
        assert_eq!(batch.line(1), Some(3));
        assert_eq!(batch.index(), 0);
        assert!(batches.next().is_none());
    }

    #[test]
    fn test_ragged_row_fails_and_fuses() {
        let mut batches = connector("a,b\n1,2\n3\n4,5\n", 10).unwrap();
        match batches.next() {
            Some(Err(IngestError::Parse(msg))) => assert!(msg.contains("line 3"), "{msg}"),
            other => {
                let rows = other.map(|r| r.map(|b| b.num_rows()));
                panic!("expected parse error, got {:?}", rows)
            }
        }
        assert!(batches.next().is_none());
    }

    #[test]
    fn test_header_validation() {
        assert!(matches!(connector("", 10).err(), Some(IngestError::Parse(_))));
        assert!(matches!(connector("a,a\n1,2\n", 10).err(), Some(IngestError::Parse(_))));
        assert!(matches!(connector("a,\n1,2\n", 10).err(), Some(IngestError::Parse(_))));
        assert!(matches!(connector("a\n1\n", 0).err(), Some(IngestError::Config(_))));
    }

    #[test]
    fn test_header_only_yields_nothing() {
        let mut batches = connector("a,b\n", 10).unwrap();
        assert_eq!(batches.columns(), &["a".to_string(), "b".to_string()]);
        assert!(batches.next().is_none());
    }
}
