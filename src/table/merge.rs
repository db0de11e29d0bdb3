// src/table/merge.rs
use std::path::Path;
use tracing::{info, instrument, warn};

use super::{load::load_csv_table, Corpus, RawTable};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub key_column: String,
    /// Rows per CSV batch while loading.
    pub batch_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            key_column: "CUI".to_string(),
            batch_size: 64 * 1024,
        }
    }
}

/// Concatenate `large` and `small`. Columns are the union (large's order
/// first, then columns only `small` has); cells a source lacks are null.
/// Rows keep their order, large first. Nothing is deduplicated.
pub fn merge_tables(large: RawTable, small: Option<RawTable>) -> RawTable {
    let Some(small) = small else {
        return large;
    };

    let mut headers = large.headers;
    for h in &small.headers {
        if !headers.contains(h) {
            headers.push(h.clone());
        }
    }
    let width = headers.len();

    // For each merged column, where it sits in the small source.
    let small_positions: Vec<Option<usize>> = headers
        .iter()
        .map(|h| small.headers.iter().position(|s| s == h))
        .collect();

    let mut rows = large.rows;
    for row in &mut rows {
        row.resize(width, None);
    }
    rows.reserve(small.rows.len());
    for mut row in small.rows {
        rows.push(
            small_positions
                .iter()
                .map(|pos| pos.and_then(|p| row.get_mut(p).and_then(Option::take)))
                .collect(),
        );
    }

    RawTable { headers, rows }
}

/// Load the large source (required) and the small one (optional) and merge
/// them into the corpus.
///
/// A small path that does not exist is logged and skipped; a small file that
/// exists but does not parse is an error like any failure on the large one.
#[instrument(level = "info", skip_all, fields(large = %large.as_ref().display()))]
pub fn build_corpus<P: AsRef<Path>>(
    large: P,
    small: Option<&Path>,
    options: &LoadOptions,
) -> Result<Corpus> {
    let large_table = load_csv_table(large.as_ref(), options.batch_size)?;
    info!(
        rows = large_table.rows.len(),
        columns = large_table.headers.len(),
        "large source loaded"
    );

    let small_table = match small {
        Some(path) if path.exists() => {
            let table = load_csv_table(path, options.batch_size)?;
            info!(
                path = %path.display(),
                rows = table.rows.len(),
                columns = table.headers.len(),
                "small source loaded"
            );
            Some(table)
        }
        Some(path) => {
            warn!(path = %path.display(), "small source not found, using the large source only");
            None
        }
        None => None,
    };

    let corpus = Corpus::from_table(merge_tables(large_table, small_table), &options.key_column)?;
    let (rows, columns) = corpus.shape();
    info!(rows, columns, "corpus ready");
    Ok(corpus)
}
