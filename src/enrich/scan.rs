// src/enrich/scan.rs
use arrow::{
    array::{Array, AsArray},
    error::ArrowError,
};
use std::{
    io::{self, BufRead},
    time::{Duration, Instant},
};
use tracing::{debug, trace};

use super::{EnrichmentResult, ScanState};
use crate::error::EnrichmentError;
use crate::table::load::{batch_reader, header_schema, read_header};

/// Column names in the remote table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanColumns {
    pub key: String,
    pub name: String,
    pub legal_form: String,
}

impl Default for ScanColumns {
    fn default() -> Self {
        Self {
            key: "CUI".to_string(),
            name: "DENUMIRE".to_string(),
            legal_form: "FORMA_JURIDICA".to_string(),
        }
    }
}

/// How one scan went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub state: ScanState,
    pub result: EnrichmentResult,
    /// Batches pulled from the source, including the matching one.
    pub batches: usize,
    pub rows: usize,
}

/// Scan a delimited table for the first row whose trimmed key equals the
/// trimmed `target`, reading `batch_size` rows at a time and only the three
/// needed columns. Stops reading as soon as a batch contains the match.
/// `timeout` is checked between batches; a read that fails with `TimedOut`
/// is reported as a timeout too.
pub fn scan_for_key<R: BufRead>(
    mut reader: R,
    target: &str,
    columns: &ScanColumns,
    delimiter: u8,
    batch_size: usize,
    timeout: Option<Duration>,
) -> Result<ScanReport, EnrichmentError> {
    let target = target.trim();
    let deadline = timeout.map(|limit| (Instant::now() + limit, limit));

    let header = read_header(&mut reader)
        .map_err(|e| io_failure(e, timeout))?
        .ok_or_else(|| EnrichmentError::Parse("empty resource, no header row".into()))?;
    let schema = header_schema(&header, delimiter).map_err(|e| EnrichmentError::Parse(e.to_string()))?;

    let position = |name: &str| {
        schema.index_of(name).map_err(|_| {
            EnrichmentError::Parse(format!(
                "column '{}' not in header ({} columns with delimiter {:?})",
                name,
                schema.fields().len(),
                delimiter as char
            ))
        })
    };
    let key_idx = position(columns.key.as_str())?;
    let name_idx = position(columns.name.as_str())?;
    let form_idx = position(columns.legal_form.as_str())?;

    let mut projection = vec![key_idx, name_idx, form_idx];
    projection.sort_unstable();
    projection.dedup();

    let csv = batch_reader(reader, schema, delimiter, batch_size, Some(projection))
        .map_err(|e| EnrichmentError::Parse(e.to_string()))?;

    let mut batches = 0;
    let mut rows = 0;
    for batch in csv {
        if let Some((at, limit)) = deadline {
            if Instant::now() >= at {
                return Err(EnrichmentError::Timeout(limit));
            }
        }
        let batch = batch.map_err(|e| match e {
            ArrowError::IoError(_, io) => io_failure(io, timeout),
            other => EnrichmentError::Parse(format!("batch {}: {}", batches, other)),
        })?;
        batches += 1;

        let text = |name: &str| {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_string_opt::<i32>())
                .ok_or_else(|| EnrichmentError::Parse(format!("column '{}' missing from batch", name)))
        };
        let keys = text(columns.key.as_str())?;
        let names = text(columns.name.as_str())?;
        let forms = text(columns.legal_form.as_str())?;

        let cell = |col: &arrow::array::StringArray, i: usize| {
            col.is_valid(i).then(|| col.value(i).to_string())
        };

        for i in 0..batch.num_rows() {
            if keys.is_valid(i) && keys.value(i).trim() == target {
                rows += i + 1;
                debug!(batches, rows, "match");
                return Ok(ScanReport {
                    state: ScanState::Matched,
                    result: EnrichmentResult::Found {
                        name: cell(names, i),
                        legal_form: cell(forms, i),
                    },
                    batches,
                    rows,
                });
            }
        }
        rows += batch.num_rows();
        trace!(batches, rows, "batch scanned");
    }

    debug!(batches, rows, "exhausted without match");
    Ok(ScanReport {
        state: ScanState::Exhausted,
        result: EnrichmentResult::NotFound,
        batches,
        rows,
    })
}

fn io_failure(err: io::Error, timeout: Option<Duration>) -> EnrichmentError {
    if err.kind() == io::ErrorKind::TimedOut {
        EnrichmentError::Timeout(timeout.unwrap_or_default())
    } else {
        EnrichmentError::Transport(err.to_string())
    }
}
