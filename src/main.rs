use anyhow::{Context, Result};
use clap::Parser;
use cuilookup::{
    config::Config,
    enrich::Enricher,
    fetch::{BlobCache, CatalogResolver, HttpTransfer, TemplateResolver},
    lookup::{EnrichedHit, Lookup, LookupOutcome},
    search::{MatchMode, Query},
    table::{build_corpus, Corpus, LoadOptions},
};
use prettytable::{format, Cell, Row, Table};
use reqwest::Client;
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const PLACEHOLDER: &str = "-";

/// Look a company up by its fiscal code (CUI).
#[derive(Parser, Debug)]
#[command(name = "cuilookup", version)]
struct Args {
    /// YAML config file
    #[arg(long, env = "CUILOOKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Match the whole code instead of any code containing it
    #[arg(long)]
    exact: bool,

    /// Skip the remote register
    #[arg(long)]
    no_enrich: bool,

    cui: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,cuilookup=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("loading config")?;

    // ─── 1) make sure the large source is on disk ────────────────────
    let transfer = Arc::new(HttpTransfer::new()?);
    let cache = BlobCache::with_timeout(
        Arc::new(TemplateResolver::new(config.cache.download_url_template.clone())),
        transfer.clone(),
        config.cache.timeout(),
    );
    cache
        .ensure(&config.cache.dataset_id, &config.cache.path)
        .await
        .with_context(|| format!("fetching dataset into {}", config.cache.path.display()))?;

    // ─── 2) build the corpus off the runtime ─────────────────────────
    let options = LoadOptions {
        key_column: config.local.key_column.clone(),
        batch_size: config.local.batch_size,
    };
    let large = config.cache.path.clone();
    let small = config.local.small_path.clone();
    let corpus = tokio::task::spawn_blocking(move || build_corpus(&large, small.as_deref(), &options))
        .await
        .context("corpus task panicked")?
        .context("building corpus")?;
    let corpus = Arc::new(corpus);

    // ─── 3) optional remote enrichment ───────────────────────────────
    let mut lookup = Lookup::new(corpus.clone());
    match config.enrichment.settings()? {
        Some(settings) if !args.no_enrich => {
            let resolver = CatalogResolver::new(
                Client::new(),
                &config.enrichment.catalog_url,
                config.enrichment.resource_id.clone(),
            )?;
            let enricher = Enricher::new(Arc::new(resolver), transfer, settings);
            lookup = lookup.with_enricher(Arc::new(enricher), config.enrichment.concurrency);
        }
        Some(_) => info!("enrichment disabled on the command line"),
        None => info!("no register configured, enrichment off"),
    }

    // ─── 4) query & print ────────────────────────────────────────────
    let mode = if args.exact {
        MatchMode::Exact
    } else {
        MatchMode::Substring
    };
    match lookup.run(&Query::new(&args.cui, mode)).await {
        LookupOutcome::NoQuery => warn!("empty CUI, nothing searched"),
        LookupOutcome::NoMatch => println!("no company found with this CUI"),
        LookupOutcome::Matches(hits) => {
            result_table(&corpus, &hits).printstd();
        }
    }
    Ok(())
}

/// Corpus columns, plus NAME and LEGAL_FORM when any hit was enriched.
fn result_table(corpus: &Corpus, hits: &[EnrichedHit]) -> Table {
    let enriched = hits.iter().any(|h| h.enrichment.is_some());

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);

    let mut titles: Vec<Cell> = corpus
        .columns()
        .iter()
        .map(|c| Cell::new(c).style_spec("bFg"))
        .collect();
    if enriched {
        titles.push(Cell::new("NAME").style_spec("bFg"));
        titles.push(Cell::new("LEGAL_FORM").style_spec("bFg"));
    }
    table.set_titles(Row::new(titles));

    for hit in hits {
        let mut cells: Vec<Cell> = hit
            .record
            .values()
            .iter()
            .map(|v| Cell::new(v.as_deref().unwrap_or(PLACEHOLDER)))
            .collect();
        if enriched {
            let e = hit.enrichment.as_ref();
            cells.push(Cell::new(e.and_then(|e| e.name()).unwrap_or(PLACEHOLDER)));
            cells.push(Cell::new(e.and_then(|e| e.legal_form()).unwrap_or(PLACEHOLDER)));
        }
        table.add_row(Row::new(cells));
    }
    table
}
