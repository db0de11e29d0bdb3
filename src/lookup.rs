// src/lookup.rs
use std::sync::Arc;
use tracing::{info, instrument};

use crate::enrich::{Enricher, EnrichmentResult};
use crate::search::{search, Query};
use crate::table::{Corpus, Record};

/// One local match, with what the remote register says about it when
/// enrichment ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedHit {
    pub record: Record,
    /// `None` when enrichment is switched off.
    pub enrichment: Option<EnrichmentResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The query was empty after trimming.
    NoQuery,
    NoMatch,
    Matches(Vec<EnrichedHit>),
}

/// Search the corpus, then enrich every hit.
pub struct Lookup {
    corpus: Arc<Corpus>,
    enricher: Option<Arc<Enricher>>,
    concurrency: usize,
}

impl Lookup {
    pub fn new(corpus: Arc<Corpus>) -> Self {
        Self {
            corpus,
            enricher: None,
            concurrency: 1,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<Enricher>, concurrency: usize) -> Self {
        self.enricher = Some(enricher);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    #[instrument(level = "info", skip(self), fields(fragment = query.fragment()))]
    pub async fn run(&self, query: &Query) -> LookupOutcome {
        if query.fragment().is_empty() {
            return LookupOutcome::NoQuery;
        }
        let hits = search(&self.corpus, query);
        info!(hits = hits.len(), mode = ?query.mode(), "search done");
        if hits.is_empty() {
            return LookupOutcome::NoMatch;
        }

        let enrichments: Vec<Option<EnrichmentResult>> = match &self.enricher {
            Some(enricher) => {
                let keys: Vec<String> = hits
                    .iter()
                    .map(|r| self.corpus.key(r).unwrap_or_default().trim().to_string())
                    .collect();
                enricher
                    .enrich_all(keys, self.concurrency)
                    .await
                    .into_iter()
                    .map(Some)
                    .collect()
            }
            None => vec![None; hits.len()],
        };

        LookupOutcome::Matches(
            hits.into_iter()
                .zip(enrichments)
                .map(|(record, enrichment)| EnrichedHit {
                    record: record.clone(),
                    enrichment,
                })
                .collect(),
        )
    }
}
