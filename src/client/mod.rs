use crate::model::{Contract, OptionKind, ParsedOptionSymbol, Quote};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use reqwest::Client as HttpClient;
use rust_decimal::prelude::*;
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const MAX_CATALOG_PAGES: usize = 10;
const CATALOG_PAGE_LIMIT: &str = "1000";

/// Upstream market data the engine depends on.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_current_price(&self, ticker: &str) -> Result<Decimal>;
    async fn list_call_contracts(&self, ticker: &str) -> Result<Vec<Contract>>;
    async fn get_quote(&self, contract_id: &str) -> Result<Quote>;
}

#[derive(Debug)]
pub struct MarketDataHttpClient {
    http: HttpClient,
    base_url: Url,
    api_key: Option<String>,
}

impl MarketDataHttpClient {
    pub fn new(base_url: Url, api_key: Option<String>, timeout: Duration) -> Self {
        let http = HttpClient::builder()
            .user_agent("spread_finder/0.1")
            .timeout(timeout)
            .build()
            .expect("failed to build http client");
        Self {
            http,
            base_url,
            api_key,
        }
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path {path}"))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn call<R: DeserializeOwned>(&self, url: Url) -> Result<R> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("MARKET_DATA_API_KEY required for upstream calls"))?;
        let path = url.path().to_string();

        // The key never enters the url, and error text never carries one.
        let res = self
            .http
            .get(url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("failed to call {path}"))?;
        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("failed to read response for {path}"))?;
        if !status.is_success() {
            return Err(anyhow!("HTTP {status} for {path}: {text}"));
        }
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse response for {path}: {text}"))
    }

    async fn previous_close(&self, ticker: &str) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct AggregateDto {
            c: f64,
        }
        #[derive(Deserialize)]
        struct AggregatesResponse {
            results: Option<Vec<AggregateDto>>,
        }

        let url = self.endpoint(&format!("/v2/aggs/ticker/{ticker}/prev"), &[])?;
        let response: AggregatesResponse = self.call(url).await?;
        response
            .results
            .and_then(|rows| rows.into_iter().next())
            .and_then(|row| Decimal::from_f64(row.c))
            .filter(|price| *price > Decimal::ZERO)
            .ok_or_else(|| anyhow!("no previous close for {ticker}"))
    }
}

#[async_trait]
impl MarketData for MarketDataHttpClient {
    async fn get_current_price(&self, ticker: &str) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct LastTradeDto {
            p: f64,
        }
        #[derive(Deserialize)]
        struct LastTradeResponse {
            results: Option<LastTradeDto>,
        }

        let url = self.endpoint(&format!("/v2/last/trade/{ticker}"), &[])?;
        let last_trade = match self.call::<LastTradeResponse>(url).await {
            Ok(response) => response
                .results
                .and_then(|trade| Decimal::from_f64(trade.p))
                .filter(|price| *price > Decimal::ZERO),
            Err(err) => {
                debug!(target: "price", ticker = %ticker, error = %err, "last trade unavailable");
                None
            }
        };
        match last_trade {
            Some(price) => Ok(price.round_dp(4)),
            None => self.previous_close(ticker).await.map(|p| p.round_dp(4)),
        }
    }

    async fn list_call_contracts(&self, ticker: &str) -> Result<Vec<Contract>> {
        #[derive(Deserialize)]
        struct ContractsResponse {
            results: Option<Vec<ContractDto>>,
            next_url: Option<String>,
        }

        let mut url = self.endpoint(
            "/v3/reference/options/contracts",
            &[
                ("underlying_ticker", ticker),
                ("contract_type", "call"),
                ("expired", "false"),
                ("limit", CATALOG_PAGE_LIMIT),
            ],
        )?;
        let mut contracts = Vec::new();
        for page in 0..MAX_CATALOG_PAGES {
            let response: ContractsResponse = self.call(url.clone()).await?;
            let rows = response.results.unwrap_or_default();
            debug!(target: "catalog", ticker = %ticker, page, rows = rows.len(), "fetched contract page");
            contracts.extend(rows.into_iter().filter_map(|dto| dto.into_contract(ticker)));
            match response.next_url {
                Some(next) => {
                    url = Url::parse(&next).with_context(|| format!("invalid next_url {next}"))?
                }
                None => break,
            }
        }
        Ok(contracts)
    }

    async fn get_quote(&self, contract_id: &str) -> Result<Quote> {
        #[derive(Deserialize)]
        struct QuoteDto {
            bid_price: Option<f64>,
            ask_price: Option<f64>,
            sip_timestamp: Option<i64>,
        }
        #[derive(Deserialize)]
        struct QuotesResponse {
            results: Option<Vec<QuoteDto>>,
        }

        let url = self.endpoint(
            &format!("/v3/quotes/{contract_id}"),
            &[("limit", "1"), ("order", "desc"), ("sort", "timestamp")],
        )?;
        let response: QuotesResponse = self.call(url).await?;
        let dto = response
            .results
            .and_then(|rows| rows.into_iter().next())
            .ok_or_else(|| anyhow!("no quote for {contract_id}"))?;
        let fetched_at = dto
            .sip_timestamp
            .and_then(|ns| {
                DateTime::<Utc>::from_timestamp(
                    ns.div_euclid(1_000_000_000),
                    ns.rem_euclid(1_000_000_000) as u32,
                )
            })
            .unwrap_or_else(Utc::now);
        Ok(Quote {
            bid: price_from_f64(dto.bid_price),
            ask: price_from_f64(dto.ask_price),
            fetched_at,
        })
    }
}

#[derive(Deserialize)]
struct ContractDto {
    ticker: String,
    underlying_ticker: Option<String>,
    strike_price: Option<f64>,
    expiration_date: Option<String>,
    contract_type: Option<String>,
}

impl ContractDto {
    fn into_contract(self, requested: &str) -> Option<Contract> {
        let parsed = ParsedOptionSymbol::from_str(&self.ticker).ok();
        let strike = self
            .strike_price
            .and_then(Decimal::from_f64)
            .map(|s| s.round_dp(3).normalize())
            .or_else(|| parsed.as_ref().map(|p| p.strike));
        let expiration_date = self
            .expiration_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .or_else(|| parsed.as_ref().map(|p| p.expiration_date));
        let option_kind = self
            .contract_type
            .as_deref()
            .and_then(|t| OptionKind::from_str(t).ok())
            .or_else(|| parsed.as_ref().map(|p| p.option_kind));
        let underlying_symbol = self
            .underlying_ticker
            .or_else(|| parsed.as_ref().map(|p| p.underlying.clone()))
            .unwrap_or_else(|| requested.to_ascii_uppercase());

        match (strike, expiration_date, option_kind) {
            (Some(strike), Some(expiration_date), Some(option_kind)) => Some(Contract {
                ticker_symbol: self.ticker,
                underlying_symbol,
                strike,
                expiration_date,
                option_kind,
            }),
            _ => {
                warn!(target: "catalog", symbol = %self.ticker, "skipping contract with unparseable fields");
                None
            }
        }
    }
}

fn price_from_f64(value: Option<f64>) -> Decimal {
    value
        .and_then(Decimal::from_f64)
        .map(|v| v.round_dp(4))
        .unwrap_or_default()
}

/// In-memory `MarketData` with scripted prices, catalogs, quotes and latency.
#[derive(Default)]
pub struct StaticMarketData {
    prices: HashMap<String, Decimal>,
    contracts: HashMap<String, Vec<Contract>>,
    quotes: HashMap<String, Quote>,
    latency: HashMap<String, Duration>,
    quote_calls: Mutex<Vec<String>>,
    price_calls: Mutex<Vec<String>>,
    catalog_calls: Mutex<Vec<String>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, ticker: &str, price: Decimal) -> Self {
        self.prices.insert(ticker.to_string(), price);
        self
    }

    pub fn with_contracts(mut self, ticker: &str, contracts: Vec<Contract>) -> Self {
        self.contracts
            .entry(ticker.to_string())
            .or_default()
            .extend(contracts);
        self
    }

    pub fn with_quote(mut self, contract_id: &str, bid: Decimal, ask: Decimal) -> Self {
        self.quotes.insert(
            contract_id.to_string(),
            Quote {
                bid,
                ask,
                fetched_at: Utc::now(),
            },
        );
        self
    }

    /// Delays every call keyed by `key` (a ticker or contract id).
    pub fn with_latency(mut self, key: &str, latency: Duration) -> Self {
        self.latency.insert(key.to_string(), latency);
        self
    }

    pub fn quote_calls(&self) -> Vec<String> {
        self.quote_calls.lock().clone()
    }

    pub fn price_calls(&self) -> Vec<String> {
        self.price_calls.lock().clone()
    }

    pub fn catalog_calls(&self) -> Vec<String> {
        self.catalog_calls.lock().clone()
    }

    async fn simulate_latency(&self, key: &str) {
        if let Some(latency) = self.latency.get(key) {
            tokio::time::sleep(*latency).await;
        }
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn get_current_price(&self, ticker: &str) -> Result<Decimal> {
        self.price_calls.lock().push(ticker.to_string());
        self.simulate_latency(ticker).await;
        self.prices
            .get(ticker)
            .copied()
            .ok_or_else(|| anyhow!("no price for {ticker}"))
    }

    async fn list_call_contracts(&self, ticker: &str) -> Result<Vec<Contract>> {
        self.catalog_calls.lock().push(ticker.to_string());
        self.simulate_latency(ticker).await;
        self.contracts
            .get(ticker)
            .cloned()
            .ok_or_else(|| anyhow!("no contracts for {ticker}"))
    }

    async fn get_quote(&self, contract_id: &str) -> Result<Quote> {
        self.quote_calls.lock().push(contract_id.to_string());
        self.simulate_latency(contract_id).await;
        self.quotes
            .get(contract_id)
            .cloned()
            .ok_or_else(|| anyhow!("no quote for {contract_id}"))
    }
}
