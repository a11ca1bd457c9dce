//! Record batches and typed cell values.
//!
//! The reader hands out `RecordBatch`es holding the raw text cells of up to
//! `chunk_size` rows. Coercion against a `ColumnSchema` turns a batch into
//! rows of `Scalar`s, which is what the table targets write.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(v) => write!(f, "{}", v),
            Scalar::Timestamp(v) => write!(f, "{}", v),
            Scalar::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// A fixed-size slice of source rows, still in text form.
///
/// Blank cells are stored as `None`. All batches of one run share the same
/// `columns` allocation.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    index: usize,
    row_offset: u64,
    columns: Arc<[String]>,
    rows: Vec<Vec<Option<String>>>,
    lines: Vec<u64>,
}

impl RecordBatch {
    /// Build a batch; `lines` holds the 1-based source line of each row.
    pub fn new(
        index: usize,
        columns: Arc<[String]>,
        rows: Vec<Vec<Option<String>>>,
        lines: Vec<u64>,
    ) -> Self {
        debug_assert_eq!(rows.len(), lines.len());
        Self {
            index,
            row_offset: 0,
            columns,
            rows,
            lines,
        }
    }

    /// Convenience constructor numbering rows as if they followed a header line.
    pub fn from_rows(index: usize, columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> Self {
        let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        let lines = (0..rows.len() as u64).map(|i| i + 2).collect();
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|c| c.map(str::to_string)).collect())
            .collect();
        Self::new(index, columns, rows, lines)
    }

    /// Set how many data rows of the source precede this batch.
    pub fn with_row_offset(mut self, row_offset: u64) -> Self {
        self.row_offset = row_offset;
        self
    }

    /// Zero-based position of this batch in the run.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Zero-based data-row offset of the first row in the source.
    pub fn row_offset(&self) -> u64 {
        self.row_offset
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    /// Source line of the row at `row`.
    pub fn line(&self, row: usize) -> Option<u64> {
        self.lines.get(row).copied()
    }

    /// Non-null cells of one column, in row order.
    pub fn column_values(&self, col: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows
            .iter()
            .filter_map(move |row| row.get(col).and_then(|c| c.as_deref()))
    }
}

/// A batch after coercion to the run's `ColumnSchema`.
#[derive(Debug, Clone)]
pub struct TypedBatch {
    pub index: usize,
    pub rows: Vec<Vec<Scalar>>,
}
