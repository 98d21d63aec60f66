use crate::engine::EngineConfig;
use crate::model::{StrategyConfig, StrategyKind};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "spread_finder", author, version, about = "Debit call spread finder", long_about = None)]
pub struct Cli {
    /// Tickers to analyse
    #[arg(required = true, env = "TICKERS", value_delimiter = ',')]
    pub tickers: Vec<String>,

    #[arg(long, env = "MARKET_DATA_URL", default_value = "https://api.polygon.io")]
    pub market_data_url: String,

    #[arg(long, env = "FETCH_TIMEOUT", default_value = "5s")]
    pub fetch_timeout: String,

    #[arg(long, env = "QUOTE_CACHE_TTL", default_value = "30s")]
    pub quote_cache_ttl: String,

    #[arg(long, env = "SESSION_TTL", default_value = "30m")]
    pub session_ttl: String,

    #[arg(long, env = "PRICING_CONCURRENCY", default_value_t = 5usize)]
    pub pricing_concurrency: usize,

    #[arg(long, env = "STRATEGY_CONCURRENCY", default_value_t = 3usize)]
    pub strategy_concurrency: usize,

    #[arg(
        long,
        env = "WIDTHS",
        default_value = "0.5,1,2.5,5,10",
        value_delimiter = ','
    )]
    pub widths: Vec<String>,

    #[arg(
        long,
        env = "ONLY",
        default_value = "aggressive,balanced,conservative",
        value_delimiter = ','
    )]
    pub only: Vec<String>,

    #[arg(long, env = "OUTPUT", value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    #[arg(long, env = "CSV")]
    pub csv: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub tickers: Vec<String>,
    pub market_data_url: Url,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub fetch_timeout: Duration,
    pub quote_cache_ttl: Duration,
    pub session_ttl: Duration,
    pub pricing_concurrency: usize,
    pub strategy_concurrency: usize,
    pub widths: Vec<Decimal>,
    pub strategies: Vec<StrategyKind>,
    pub output: OutputFormat,
    pub csv: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let tickers: Vec<String> = cli
            .tickers
            .iter()
            .map(|t| t.trim().to_ascii_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        if tickers.is_empty() {
            return Err(anyhow!("at least one ticker is required"));
        }

        let market_data_url = Url::parse(&cli.market_data_url)
            .with_context(|| format!("invalid market data url: {}", cli.market_data_url))?;
        let api_key = env::var("MARKET_DATA_API_KEY").ok();

        let fetch_timeout = parse_duration("fetch timeout", &cli.fetch_timeout)?;
        let quote_cache_ttl = parse_duration("quote cache ttl", &cli.quote_cache_ttl)?;
        let session_ttl = parse_duration("session ttl", &cli.session_ttl)?;
        if fetch_timeout.is_zero() {
            return Err(anyhow!("fetch timeout must be positive"));
        }

        if cli.pricing_concurrency == 0 || cli.strategy_concurrency == 0 {
            return Err(anyhow!("concurrency limits must be >= 1"));
        }

        let mut widths = cli
            .widths
            .iter()
            .map(|w| {
                Decimal::from_str(w.trim()).map_err(|_| anyhow!("invalid width: {w}"))
            })
            .collect::<Result<Vec<_>>>()?;
        if widths.is_empty() {
            return Err(anyhow!("must allow at least one spread width"));
        }
        if widths.iter().any(|w| *w <= Decimal::ZERO) {
            return Err(anyhow!("spread widths must be positive"));
        }
        widths.sort();
        widths.dedup();

        let mut strategies = cli
            .only
            .iter()
            .map(|s| StrategyKind::from_str(s).map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>>>()?;
        strategies.sort();
        strategies.dedup();
        if strategies.is_empty() {
            return Err(anyhow!("must enable at least one strategy"));
        }

        let config = AppConfig {
            tickers,
            market_data_url,
            api_key,
            fetch_timeout,
            quote_cache_ttl,
            session_ttl,
            pricing_concurrency: cli.pricing_concurrency,
            strategy_concurrency: cli.strategy_concurrency,
            widths,
            strategies,
            output: cli.output,
            csv: cli.csv,
        };

        info!(
            "config" = serde_json::to_string(&config).unwrap_or_default(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            strategies: self
                .strategies
                .iter()
                .map(|kind| StrategyConfig::for_kind(*kind))
                .collect(),
            widths: self.widths.clone(),
            pricing_concurrency: self.pricing_concurrency,
            strategy_concurrency: self.strategy_concurrency,
            fetch_timeout: self.fetch_timeout,
            quote_cache_ttl: self.quote_cache_ttl,
            session_ttl: self.session_ttl,
        }
    }
}

fn parse_duration(name: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim()).with_context(|| format!("invalid {name}: {raw}"))
}
