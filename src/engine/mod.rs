use crate::cache::{KeyValueCache, QuoteCache};
use crate::chain::{filter_for_strategy, ContractCatalog};
use crate::client::MarketData;
use crate::detect::{generate_pairs, WidthEscalationSelector};
use crate::model::{
    Contract, SessionEntry, SpreadResult, StrategyConfig, StrategyKind, TickerAnalysis,
    DEFAULT_WIDTHS, REASON_DISABLED, REASON_NO_CONTRACTS, REASON_NO_PAIRS, REASON_UNAVAILABLE,
};
use crate::session::{SpreadSessionStore, DEFAULT_SESSION_TTL};
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategies: Vec<StrategyConfig>,
    pub widths: Vec<Decimal>,
    pub pricing_concurrency: usize,
    pub strategy_concurrency: usize,
    pub fetch_timeout: Duration,
    pub quote_cache_ttl: Duration,
    pub session_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategies: StrategyConfig::defaults().to_vec(),
            widths: DEFAULT_WIDTHS.to_vec(),
            pricing_concurrency: 5,
            strategy_concurrency: 3,
            fetch_timeout: Duration::from_secs(5),
            quote_cache_ttl: Duration::from_secs(30),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

/// Runs the three strategy pipelines for a ticker and records the winners.
pub struct SpreadEngine {
    quotes: QuoteCache,
    catalog: ContractCatalog,
    sessions: Arc<SpreadSessionStore>,
    config: EngineConfig,
}

impl SpreadEngine {
    pub fn new(
        market: Arc<dyn MarketData>,
        cache: Arc<dyn KeyValueCache>,
        config: EngineConfig,
    ) -> Self {
        let sessions = Arc::new(SpreadSessionStore::new(config.session_ttl));
        Self::with_sessions(market, cache, sessions, config)
    }

    pub fn with_sessions(
        market: Arc<dyn MarketData>,
        cache: Arc<dyn KeyValueCache>,
        sessions: Arc<SpreadSessionStore>,
        config: EngineConfig,
    ) -> Self {
        let quotes = QuoteCache::new(
            market.clone(),
            cache,
            config.quote_cache_ttl,
            config.fetch_timeout,
        );
        let catalog = ContractCatalog::new(market, config.fetch_timeout);
        Self {
            quotes,
            catalog,
            sessions,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SpreadSessionStore> {
        &self.sessions
    }

    pub async fn discover(&self, ticker: &str) -> TickerAnalysis {
        self.discover_as_of(ticker, Utc::now().date_naive()).await
    }

    pub async fn discover_as_of(&self, ticker: &str, today: NaiveDate) -> TickerAnalysis {
        let ticker = ticker.trim().to_ascii_uppercase();
        info!(target: "discover", ticker = %ticker, %today, "starting spread discovery");

        let (price, catalog) = futures::join!(
            self.quotes.current_price(&ticker),
            self.catalog.fetch_as_of(&ticker, today)
        );
        let (current_price, contracts) = match (price, catalog) {
            (Ok(price), Ok(contracts)) => (price, contracts),
            (price, catalog) => {
                let cause = price
                    .err()
                    .or(catalog.err())
                    .map(|err| err.to_string())
                    .unwrap_or_default();
                warn!(target: "discover", ticker = %ticker, error = %cause, "market data unavailable");
                let reason = format!("{REASON_UNAVAILABLE}: {cause}");
                let results = StrategyKind::ALL
                    .iter()
                    .map(|kind| (*kind, SpreadResult::not_found(reason.clone())))
                    .collect();
                return TickerAnalysis {
                    ticker,
                    current_price: None,
                    timestamp: Utc::now(),
                    results,
                };
            }
        };

        let evaluated: Vec<(StrategyKind, SpreadResult)> = stream::iter(self.config.strategies.iter())
            .map(|strategy| {
                let contracts = &contracts;
                async move {
                    let pipeline =
                        self.run_strategy(strategy, contracts, current_price, today);
                    let result = match AssertUnwindSafe(pipeline).catch_unwind().await {
                        Ok(result) => result,
                        Err(_) => {
                            error!(target: "discover", strategy = %strategy.kind, "strategy pipeline panicked");
                            SpreadResult::not_found("strategy evaluation failed")
                        }
                    };
                    (strategy.kind, result)
                }
            })
            .buffer_unordered(self.config.strategy_concurrency.max(1))
            .collect()
            .await;

        let mut results = BTreeMap::new();
        for (kind, result) in evaluated {
            let result = match result {
                SpreadResult::Found {
                    strategy,
                    candidate,
                    ..
                } => {
                    let session_id = self.sessions.store(&ticker, strategy, &candidate);
                    SpreadResult::Found {
                        strategy,
                        candidate,
                        session_id: Some(session_id),
                    }
                }
                not_found => not_found,
            };
            results.insert(kind, result);
        }
        for kind in StrategyKind::ALL {
            results
                .entry(kind)
                .or_insert_with(|| SpreadResult::not_found(REASON_DISABLED));
        }

        let analysis = TickerAnalysis {
            ticker,
            current_price: Some(current_price),
            timestamp: Utc::now(),
            results,
        };
        info!(
            target: "discover",
            ticker = %analysis.ticker,
            price = %current_price,
            found = analysis.found_count(),
            "spread discovery complete"
        );
        analysis
    }

    pub fn retrieve_session(&self, id: &str) -> Option<SessionEntry> {
        self.sessions.get(id)
    }

    async fn run_strategy(
        &self,
        strategy: &StrategyConfig,
        contracts: &[Contract],
        current_price: Decimal,
        today: NaiveDate,
    ) -> SpreadResult {
        let eligible = filter_for_strategy(contracts, strategy, current_price, today);
        if eligible.is_empty() {
            info!(target: "discover", strategy = %strategy.kind, "no eligible contracts");
            return SpreadResult::not_found(REASON_NO_CONTRACTS);
        }
        let pairs = generate_pairs(&eligible, current_price, &self.config.widths);
        if pairs.is_empty() {
            info!(target: "discover", strategy = %strategy.kind, contracts = eligible.len(), "no valid pairs");
            return SpreadResult::not_found(REASON_NO_PAIRS);
        }
        let selector = WidthEscalationSelector::new(
            &self.quotes,
            &self.config.widths,
            self.config.pricing_concurrency,
        );
        let result = selector.select(&pairs, strategy).await;
        if let SpreadResult::NotFound { reason } = &result {
            info!(target: "discover", strategy = %strategy.kind, pairs = pairs.len(), reason = %reason, "no spread selected");
        }
        result
    }
}
