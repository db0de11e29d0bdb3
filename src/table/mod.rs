// src/table/mod.rs
//! Local tabular data: loading CSV sources and merging them into the corpus
//! that queries run against.

pub mod load;
pub mod merge;

pub use load::{load_csv_table, read_csv_table};
pub use merge::{build_corpus, merge_tables, LoadOptions};

use crate::error::{LookupError, Result};

/// Rows of one source as read from disk, before merging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawTable {
    /// Column names from the header row.
    pub headers: Vec<String>,
    /// One entry per column, `None` for an empty cell.
    pub rows: Vec<Vec<Option<String>>>,
}

/// One row of the corpus. Values line up with [`Corpus::columns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    values: Vec<Option<String>>,
}

impl Record {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn value(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }
}

/// The merged, read-only collection of local records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    columns: Vec<String>,
    key_index: usize,
    records: Vec<Record>,
}

impl Corpus {
    /// Fails with a configuration error when `key_column` is not a column.
    pub fn from_table(table: RawTable, key_column: &str) -> Result<Self> {
        let key_index = table
            .headers
            .iter()
            .position(|h| h == key_column)
            .ok_or_else(|| {
                LookupError::Config(format!(
                    "column '{}' is missing from the data (columns: {})",
                    key_column,
                    table.headers.join(", ")
                ))
            })?;
        let width = table.headers.len();
        let records = table
            .rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, None);
                Record::new(row)
            })
            .collect();
        Ok(Self {
            columns: table.headers,
            key_index,
            records,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn key_column(&self) -> &str {
        &self.columns[self.key_index]
    }

    /// Key cell of `record`; `None` when null.
    pub fn key<'a>(&self, record: &'a Record) -> Option<&'a str> {
        record.value(self.key_index)
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn get<'a>(&self, record: &'a Record, column: &str) -> Option<&'a str> {
        self.column_index(column).and_then(|i| record.value(i))
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.records.len(), self.columns.len())
    }
}
