// src/error.rs
use std::{io, sync::Arc, time::Duration};

use thiserror::Error;

/// Failures surfaced by corpus construction and blob acquisition.
///
/// `Clone` so that every caller waiting on a shared download observes the
/// same outcome.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("cannot parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },
    #[error("cannot resolve dataset '{dataset}': {reason}")]
    Resolution { dataset: String, reason: String },
    #[error("timed out after {limit:?} while {during}")]
    Timeout { limit: Duration, during: String },
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for LookupError {
    fn from(err: io::Error) -> Self {
        LookupError::Io(Arc::new(err))
    }
}

impl LookupError {
    pub fn parse(source_name: impl Into<String>, reason: impl ToString) -> Self {
        LookupError::Parse {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn resolution(dataset: impl Into<String>, reason: impl ToString) -> Self {
        LookupError::Resolution {
            dataset: dataset.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = LookupError> = std::result::Result<T, E>;

/// Failures inside a single enrichment call. These never leave the scanner:
/// `Enricher::enrich` turns every one of them into "not found".
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("location unavailable: {0}")]
    Resolution(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed remote table: {0}")]
    Parse(String),
    #[error("scan timed out after {0:?}")]
    Timeout(Duration),
}

impl From<LookupError> for EnrichmentError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::Resolution { .. } => EnrichmentError::Resolution(err.to_string()),
            LookupError::Parse { .. } => EnrichmentError::Parse(err.to_string()),
            LookupError::Timeout { limit, .. } => EnrichmentError::Timeout(limit),
            other => EnrichmentError::Transport(other.to_string()),
        }
    }
}
