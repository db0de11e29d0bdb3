// src/table/load.rs
use arrow::{
    array::{Array, AsArray},
    csv::{reader::Format, ReaderBuilder},
    datatypes::{DataType, Field, Schema},
    error::ArrowError,
    record_batch::RecordBatch,
};
use std::{
    fs::File,
    io::{BufRead, BufReader, Cursor},
    path::Path,
    sync::Arc,
};
use tracing::{debug, instrument};

use super::RawTable;
use crate::error::{LookupError, Result};

/// Parse a header line into an all-text schema: every column is nullable
/// Utf8 so identifiers keep their leading zeros.
pub fn header_schema(line: &str, delimiter: u8) -> std::result::Result<Schema, ArrowError> {
    let line = line.trim_start_matches('\u{feff}').trim_end_matches(['\r', '\n']);
    let (inferred, _) = Format::default()
        .with_header(true)
        .with_delimiter(delimiter)
        .infer_schema(Cursor::new(line.as_bytes()), Some(0))?;
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|f| Field::new(f.name().trim(), DataType::Utf8, true))
        .collect();
    Ok(Schema::new(fields))
}

/// Read the header line off `reader`. `None` for an empty source.
pub fn read_header<R: BufRead>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Build an arrow CSV reader over what follows the header. With a
/// projection, batches carry only those columns.
pub fn batch_reader<R: BufRead>(
    reader: R,
    schema: Schema,
    delimiter: u8,
    batch_size: usize,
    projection: Option<Vec<usize>>,
) -> std::result::Result<arrow::csv::reader::BufReader<R>, ArrowError> {
    let mut builder = ReaderBuilder::new(Arc::new(schema))
        .with_header(false)
        .with_delimiter(delimiter)
        .with_quote(b'"')
        .with_batch_size(batch_size);
    if let Some(projection) = projection {
        builder = builder.with_projection(projection);
    }
    builder.build_buffered(reader)
}

/// Cells of column `idx` in `batch`, nulls kept as `None`.
pub fn text_column(batch: &RecordBatch, idx: usize) -> Option<Vec<Option<String>>> {
    let col = batch.column(idx).as_string_opt::<i32>()?;
    Some(
        (0..col.len())
            .map(|i| col.is_valid(i).then(|| col.value(i).to_string()))
            .collect(),
    )
}

/// Load a comma-separated file with a header row. Every cell is text; empty
/// cells are null.
#[instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn load_csv_table<P: AsRef<Path>>(path: P, batch_size: usize) -> Result<RawTable> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let file = File::open(path)?;
    read_csv_table(BufReader::new(file), &name, b',', batch_size)
}

/// Same as [`load_csv_table`] over any buffered reader.
pub fn read_csv_table<R: BufRead>(
    mut reader: R,
    source_name: &str,
    delimiter: u8,
    batch_size: usize,
) -> Result<RawTable> {
    let header = read_header(&mut reader)?
        .ok_or_else(|| LookupError::parse(source_name, "empty file, no header row"))?;
    let schema = header_schema(&header, delimiter).map_err(|e| LookupError::parse(source_name, e))?;
    let headers: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(LookupError::parse(source_name, "header row has no column names"));
    }

    let csv = batch_reader(reader, schema, delimiter, batch_size, None)
        .map_err(|e| LookupError::parse(source_name, e))?;

    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    for (batch_idx, batch) in csv.enumerate() {
        let batch = batch.map_err(|e| {
            LookupError::parse(source_name, format!("batch {}: {}", batch_idx, e))
        })?;
        let columns: Vec<Vec<Option<String>>> = (0..batch.num_columns())
            .map(|i| {
                text_column(&batch, i)
                    .ok_or_else(|| LookupError::parse(source_name, "non-text column"))
            })
            .collect::<Result<_>>()?;

        rows.reserve(batch.num_rows());
        for r in 0..batch.num_rows() {
            rows.push(columns.iter().map(|c| c[r].clone()).collect());
        }
        debug!(batch = batch_idx, rows = batch.num_rows(), "read batch");
    }

    Ok(RawTable { headers, rows })
}
