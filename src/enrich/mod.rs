// src/enrich/mod.rs
//! Best-effort enrichment of local hits from the remote company register.
//!
//! Each lookup resolves the register's current location, streams it and
//! scans it batch by batch until the key turns up. There is no index and no
//! state shared between lookups; every call pays for its own linear scan.
//! Whatever goes wrong inside a call ends as [`EnrichmentResult::NotFound`].

pub mod body;
pub mod scan;

pub use scan::{scan_for_key, ScanColumns, ScanReport};

use futures::{stream, StreamExt};
use std::{io::BufReader, sync::Arc, time::Duration};
use tokio::{runtime::Handle, time::Instant};
use tracing::{debug, instrument, warn};

use crate::error::EnrichmentError;
use crate::fetch::{open_stream, LocationResolver, Transfer};
use body::BlockingBody;

/// Read buffer between the network stream and the CSV decoder.
const READ_BUFFER_BYTES: usize = 256 * 1024;

/// Canonical name and legal form for one key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnrichmentResult {
    #[default]
    NotFound,
    /// The row exists; either cell may still be empty.
    Found {
        name: Option<String>,
        legal_form: Option<String>,
    },
}

impl EnrichmentResult {
    pub fn is_found(&self) -> bool {
        matches!(self, EnrichmentResult::Found { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            EnrichmentResult::Found { name, .. } => name.as_deref(),
            EnrichmentResult::NotFound => None,
        }
    }

    pub fn legal_form(&self) -> Option<&str> {
        match self {
            EnrichmentResult::Found { legal_form, .. } => legal_form.as_deref(),
            EnrichmentResult::NotFound => None,
        }
    }
}

/// Where a single enrichment call is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScanState {
    Idle,
    ResolvingLocation,
    ResolutionFailed,
    Scanning,
    Matched,
    Exhausted,
}

impl ScanState {
    pub fn as_str(&self) -> &str {
        match self {
            ScanState::Idle => "idle",
            ScanState::ResolvingLocation => "resolving-location",
            ScanState::ResolutionFailed => "resolution-failed",
            ScanState::Scanning => "scanning",
            ScanState::Matched => "matched",
            ScanState::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::ResolutionFailed | ScanState::Matched | ScanState::Exhausted
        )
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    /// Catalog entry of the remote register.
    pub dataset_id: String,
    pub columns: ScanColumns,
    pub delimiter: u8,
    /// Rows per batch.
    pub batch_size: usize,
    pub timeout: Option<Duration>,
}

impl EnrichmentSettings {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            columns: ScanColumns::default(),
            delimiter: b';',
            batch_size: 100_000,
            timeout: None,
        }
    }
}

pub struct Enricher {
    resolver: Arc<dyn LocationResolver>,
    transfer: Arc<dyn Transfer>,
    settings: EnrichmentSettings,
}

impl Enricher {
    pub fn new(
        resolver: Arc<dyn LocationResolver>,
        transfer: Arc<dyn Transfer>,
        settings: EnrichmentSettings,
    ) -> Self {
        Self {
            resolver,
            transfer,
            settings,
        }
    }

    /// Look `key` up in the remote register. Never fails: every error is
    /// logged and reported as not found.
    #[instrument(level = "info", skip(self))]
    pub async fn enrich(&self, key: &str) -> EnrichmentResult {
        match self.try_enrich(key).await {
            Ok(report) => report.result,
            Err(e) => {
                warn!(key, error = %e, "enrichment unavailable, treating as not found");
                EnrichmentResult::NotFound
            }
        }
    }

    /// The fallible lookup behind [`Enricher::enrich`].
    pub async fn try_enrich(&self, key: &str) -> Result<ScanReport, EnrichmentError> {
        debug!(state = ScanState::Idle.as_str(), dataset = %self.settings.dataset_id);
        debug!(state = ScanState::ResolvingLocation.as_str());
        let url = match self.resolver.resolve(&self.settings.dataset_id).await {
            Ok(url) => url,
            Err(e) => {
                debug!(state = ScanState::ResolutionFailed.as_str(), error = %e);
                return Err(EnrichmentError::Resolution(e.to_string()));
            }
        };

        debug!(state = ScanState::Scanning.as_str(), %url);
        let limit = self.settings.timeout;
        let deadline = limit.map(|limit| Instant::now() + limit);
        let scan = self.scan_remote(url, key.to_string(), deadline);
        let report = match (deadline, limit) {
            (Some(at), Some(limit)) => tokio::time::timeout_at(at, scan)
                .await
                .map_err(|_| EnrichmentError::Timeout(limit))??,
            _ => scan.await?,
        };
        debug!(
            state = report.state.as_str(),
            batches = report.batches,
            rows = report.rows
        );
        Ok(report)
    }

    /// The blocking reader shares `deadline` with the caller's timeout, so the
    /// scan thread gives up on a stalled body when the caller does.
    async fn scan_remote(
        &self,
        url: url::Url,
        key: String,
        deadline: Option<Instant>,
    ) -> Result<ScanReport, EnrichmentError> {
        let body = open_stream(self.transfer.as_ref(), &url).await?;
        let handle = Handle::current();
        let columns = self.settings.columns.clone();
        let delimiter = self.settings.delimiter;
        let batch_size = self.settings.batch_size;
        let timeout = self.settings.timeout;

        tokio::task::spawn_blocking(move || {
            let body = BlockingBody::new(body, handle).with_deadline(deadline);
            let reader = BufReader::with_capacity(READ_BUFFER_BYTES, body);
            scan_for_key(reader, &key, &columns, delimiter, batch_size, timeout)
        })
        .await
        .map_err(|e| EnrichmentError::Transport(format!("scan task failed: {}", e)))?
    }

    /// Enrich every key with at most `concurrency` lookups in flight. The
    /// output is in the same order as `keys`.
    pub async fn enrich_all<I>(&self, keys: I, concurrency: usize) -> Vec<EnrichmentResult>
    where
        I: IntoIterator<Item = String>,
    {
        stream::iter(keys)
            .map(|key| async move { self.enrich(&key).await })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}
