use crate::cache::bounded;
use crate::client::MarketData;
use crate::model::{
    Contract, ContractKey, DatedContract, DiscoveryError, OptionKind, StrategyConfig,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Call-contract listing for an underlying, normalised and deduplicated.
#[derive(Clone)]
pub struct ContractCatalog {
    market: Arc<dyn MarketData>,
    fetch_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub upstream: usize,
    pub puts: usize,
    pub expired: usize,
    pub foreign: usize,
    pub duplicates: usize,
    pub kept: usize,
}

impl ContractCatalog {
    pub fn new(market: Arc<dyn MarketData>, fetch_timeout: Duration) -> Self {
        Self {
            market,
            fetch_timeout,
        }
    }

    pub async fn fetch(&self, ticker: &str) -> Result<Vec<Contract>, DiscoveryError> {
        self.fetch_as_of(ticker, Utc::now().date_naive()).await
    }

    pub async fn fetch_as_of(
        &self,
        ticker: &str,
        today: NaiveDate,
    ) -> Result<Vec<Contract>, DiscoveryError> {
        let raw = bounded(
            "catalog",
            ticker,
            self.fetch_timeout,
            self.market.list_call_contracts(ticker),
        )
        .await
        .map_err(|err| DiscoveryError::CatalogUnavailable {
            ticker: ticker.to_string(),
            message: err.to_string(),
        })?;

        let (contracts, stats) = normalize(raw, ticker, today);
        info!(
            target: "catalog",
            ticker = %ticker,
            upstream = stats.upstream,
            kept = stats.kept,
            puts = stats.puts,
            expired = stats.expired,
            duplicates = stats.duplicates,
            "contract catalog loaded"
        );
        if contracts.is_empty() {
            return Err(DiscoveryError::CatalogUnavailable {
                ticker: ticker.to_string(),
                message: "no call contracts returned".to_string(),
            });
        }
        Ok(contracts)
    }
}

/// Keeps live calls on `ticker`, first occurrence per identity, sorted by (expiry, strike).
pub fn normalize(
    contracts: Vec<Contract>,
    ticker: &str,
    today: NaiveDate,
) -> (Vec<Contract>, CatalogStats) {
    let mut stats = CatalogStats {
        upstream: contracts.len(),
        ..Default::default()
    };
    let mut seen: HashSet<ContractKey> = HashSet::new();
    let mut kept = Vec::with_capacity(contracts.len());
    for contract in contracts {
        if contract.option_kind != OptionKind::Call {
            stats.puts += 1;
            continue;
        }
        if !contract.underlying_symbol.eq_ignore_ascii_case(ticker) {
            stats.foreign += 1;
            continue;
        }
        if contract.expiration_date < today {
            stats.expired += 1;
            continue;
        }
        if !seen.insert(contract.key()) {
            stats.duplicates += 1;
            continue;
        }
        kept.push(contract);
    }
    if stats.foreign > 0 {
        warn!(target: "catalog", ticker = %ticker, foreign = stats.foreign, "dropped contracts for other underlyings");
    }
    kept.sort_by(|a, b| {
        a.expiration_date
            .cmp(&b.expiration_date)
            .then(a.strike.cmp(&b.strike))
    });
    stats.kept = kept.len();
    (kept, stats)
}

/// Contracts inside the strategy's DTE window and strike band, tagged with DTE.
pub fn filter_for_strategy(
    contracts: &[Contract],
    strategy: &StrategyConfig,
    current_price: Decimal,
    today: NaiveDate,
) -> Vec<DatedContract> {
    let filtered: Vec<DatedContract> = contracts
        .iter()
        .filter(|contract| contract.option_kind == OptionKind::Call)
        .filter_map(|contract| {
            let dte = contract.days_to_expiry(today);
            if !strategy.dte_in_range(dte) {
                return None;
            }
            if !strategy
                .strike_band
                .contains(contract.strike, current_price)
            {
                return None;
            }
            Some(DatedContract {
                contract: contract.clone(),
                dte,
            })
        })
        .collect();
    debug!(
        target: "filter",
        strategy = %strategy.kind,
        input = contracts.len(),
        kept = filtered.len(),
        "strategy filter applied"
    );
    filtered
}
