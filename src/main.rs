mod address;
mod browser;
mod config;
mod error;
mod models;
mod normalize;
mod pipeline;
mod scheduler;
mod scrapers;
mod store;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use address::{AddressResolver, HeuristicAddressExtractor, NominatimGeocoder};
use browser::{BrowserPool, ChromeFactory, PageFetcher};
use config::{Config, LogFormat, LoggingConfig};
use models::Source;
use pipeline::{
    MatchTrigger, NoopMatchTrigger, OfferProcessor, UpsertEngine, WebhookMatchTrigger, WebhookSummarizer,
};
use scheduler::QueueScheduler;
use store::{JsonDirStore, MemoryStore, OfferStore};

#[derive(Parser)]
#[command(name = "offer-scout")]
#[command(about = "Scrape rental listings into deduplicated offer records")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Treat the URLs as newly discovered offers
    #[arg(long)]
    new: bool,

    /// Marketplace of the URLs (olx, otodom); detected per URL when omitted
    #[arg(short, long)]
    source: Option<Source>,

    /// Keep offers in memory instead of the store directory
    #[arg(long)]
    dry_run: bool,

    /// Listing URLs; read one per line from stdin when none are given
    urls: Vec<String>,
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    match config.format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

async fn read_urls(cli: &Cli) -> Result<Vec<String>> {
    if !cli.urls.is_empty() {
        return Ok(cli.urls.clone());
    }
    let mut urls = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read URLs from stdin")? {
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            urls.push(line.to_string());
        }
    }
    Ok(urls)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };
    init_logging(&config.logging);

    info!("Offer scout starting");

    let memory = cli.dry_run.then(|| Arc::new(MemoryStore::new()));
    let store: Arc<dyn OfferStore> = match &memory {
        Some(memory) => memory.clone(),
        None => Arc::new(
            JsonDirStore::open(&config.store.dir)
                .await
                .with_context(|| format!("Failed to open offer store '{}'", config.store.dir.display()))?,
        ),
    };
    let trigger: Arc<dyn MatchTrigger> = match &config.matching.webhook_url {
        Some(url) => Arc::new(WebhookMatchTrigger::new(url, &config.matching)?),
        None => Arc::new(NoopMatchTrigger),
    };
    let resolver = AddressResolver::new(
        Arc::new(HeuristicAddressExtractor),
        Arc::new(NominatimGeocoder::new(&config.geocoder)?),
    );

    let factory = ChromeFactory::new(config.browser.clone(), config.fetch.navigation_timeout());
    let pool = Arc::new(BrowserPool::new(factory, config.browser.capacity));
    let mut processor = OfferProcessor::new(
        Arc::clone(&pool),
        PageFetcher::new(config.fetch.clone()),
        resolver,
        UpsertEngine::new(store, trigger),
    );
    if let Some(endpoint) = &config.summary.endpoint {
        processor = processor.with_summarizer(Arc::new(WebhookSummarizer::new(endpoint, &config.summary)?));
    }
    let scheduler = QueueScheduler::new(Arc::new(processor), &config.queues);

    let mut enqueued = 0usize;
    for url in read_urls(&cli).await? {
        let Some(source) = cli.source.or_else(|| Source::from_url(&url)) else {
            warn!(%url, "Skipping URL from an unsupported marketplace");
            continue;
        };
        scheduler.enqueue(source, url, cli.new)?;
        enqueued += 1;
    }
    info!(jobs = enqueued, capacity = pool.capacity(), "Jobs enqueued");

    tokio::select! {
        _ = scheduler.run() => {}
        _ = scheduler.wait_idle() => info!("All queues drained"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    scheduler.shutdown().await;

    let failed = scheduler.failed_jobs();
    for record in &failed {
        warn!(
            job_id = record.job.id,
            url = %record.job.url,
            attempts = record.job.attempts_made,
            error = record.error.as_deref().unwrap_or_default(),
            "Job failed"
        );
    }

    let mut report = json!({
        "queues": scheduler.stats(),
        "pool": pool.status(),
        "completed": scheduler.completed_jobs(),
        "failed": failed,
    });
    if let Some(memory) = &memory {
        report["offers"] = json!(memory.all());
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
