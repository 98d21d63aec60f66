use anyhow::Result;
use clap::Parser;
use spread_finder::cache::MemoryCache;
use spread_finder::client::MarketDataHttpClient;
use spread_finder::config::{AppConfig, Cli, OutputFormat};
use spread_finder::engine::SpreadEngine;
use spread_finder::render;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = AppConfig::from_cli(cli)?;

    if config.api_key.is_none() {
        warn!(target: "config", "MARKET_DATA_API_KEY is not set; upstream calls will fail");
    }
    let http_client = MarketDataHttpClient::new(
        config.market_data_url.clone(),
        config.api_key.clone(),
        config.fetch_timeout,
    );
    let cache = MemoryCache::new();
    let engine = SpreadEngine::new(
        Arc::new(http_client),
        Arc::new(cache.clone()),
        config.engine_config(),
    );

    let mut analyses = Vec::with_capacity(config.tickers.len());
    for ticker in &config.tickers {
        let analysis = engine.discover(ticker).await;
        if config.output == OutputFormat::Table {
            render::print_analysis(&analysis);
        }
        analyses.push(analysis);

        let stats = cache.stats();
        info!(
            target: "cache.stats",
            entries = stats.entries,
            live = stats.live_entries,
            hits = stats.hits,
            misses = stats.misses
        );
        let purged = cache.purge_expired() + engine.sessions().purge_expired();
        if purged > 0 {
            info!(target: "cache.stats", purged, "expired entries dropped");
        }
        // Light pacing between tickers to respect upstream rate limits
        sleep(Duration::from_millis(25)).await;
    }

    if config.output == OutputFormat::Json {
        println!("{}", render::to_json(&analyses)?);
    }
    if let Some(path) = &config.csv {
        render::export_csv(&analyses, path)?;
    }

    let found: usize = analyses.iter().map(|a| a.found_count()).sum();
    info!(
        target: "discover",
        tickers = analyses.len(),
        found,
        sessions = engine.sessions().len(),
        "run complete"
    );
    Ok(())
}
