use crate::cache::QuoteCache;
use crate::model::{
    DatedContract, Quote, SpreadCandidate, SpreadPair, SpreadResult, StrategyConfig,
    REASON_NO_SPREADS,
};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Haircut applied to the ask-side debit when the unwind side prices negative.
const ILLIQUID_NET_BID_FACTOR: Decimal = dec!(0.95);

/// Every (long, short) pair sharing an expiry whose strike gap is an allowed
/// width and whose short leg sits below spot.
///
/// Output order is (expiration, long strike, short strike) ascending; the
/// selector relies on it for tie-breaks.
pub fn generate_pairs(
    contracts: &[DatedContract],
    current_price: Decimal,
    widths: &[Decimal],
) -> Vec<SpreadPair> {
    let max_width = match widths.iter().max() {
        Some(width) => *width,
        None => return Vec::new(),
    };
    let mut pairs = Vec::new();
    for (_, mut group) in group_by_expiry(contracts) {
        group.sort_by(|a, b| a.contract.strike.cmp(&b.contract.strike));
        for (i, long) in group.iter().enumerate() {
            for short in group.iter().skip(i + 1) {
                let width = short.contract.strike - long.contract.strike;
                if width <= Decimal::ZERO {
                    continue;
                }
                if width > max_width {
                    break;
                }
                if short.contract.strike >= current_price {
                    break;
                }
                if !widths.contains(&width) {
                    continue;
                }
                pairs.push(SpreadPair {
                    long: long.contract.clone(),
                    short: short.contract.clone(),
                    width: width.normalize(),
                    dte: long.dte,
                });
            }
        }
    }
    pairs
}

fn group_by_expiry(contracts: &[DatedContract]) -> BTreeMap<NaiveDate, Vec<&DatedContract>> {
    let mut map: BTreeMap<NaiveDate, Vec<&DatedContract>> = BTreeMap::new();
    for dated in contracts {
        map.entry(dated.contract.expiration_date)
            .or_default()
            .push(dated);
    }
    map
}

/// Mid-price economics of a debit call spread, or `None` when unpriceable.
pub fn evaluate(
    pair: &SpreadPair,
    long_quote: Quote,
    short_quote: Quote,
) -> Option<SpreadCandidate> {
    if !long_quote.is_priceable() || !short_quote.is_priceable() {
        return None;
    }
    let net_ask = long_quote.ask - short_quote.bid;
    let mut net_bid = short_quote.ask - long_quote.bid;
    if net_bid < Decimal::ZERO {
        net_bid = net_ask * ILLIQUID_NET_BID_FACTOR;
    }
    let cost = (net_ask + net_bid) / dec!(2);
    let max_profit = pair.width - cost;
    if cost <= Decimal::ZERO || max_profit <= Decimal::ZERO {
        return None;
    }
    let roi_percent = max_profit / cost * dec!(100);
    Some(SpreadCandidate {
        long: pair.long.clone(),
        short: pair.short.clone(),
        breakeven: pair.long.strike + cost,
        long_quote,
        short_quote,
        cost,
        width: pair.width,
        max_profit,
        roi_percent,
        dte: pair.dte,
    })
}

pub struct SpreadPricer<'a> {
    quotes: &'a QuoteCache,
    concurrency: usize,
}

impl<'a> SpreadPricer<'a> {
    pub fn new(quotes: &'a QuoteCache, concurrency: usize) -> Self {
        Self {
            quotes,
            concurrency: concurrency.max(1),
        }
    }

    /// Prices `pairs` in order. Each distinct leg is quoted once, however
    /// many pairs share it; unpriceable pairs are dropped.
    pub async fn price_all(&self, pairs: &[&SpreadPair]) -> Vec<SpreadCandidate> {
        let mut legs: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for pair in pairs {
            for leg in [&pair.long, &pair.short] {
                if seen.insert(leg.ticker_symbol.as_str()) {
                    legs.push(leg.ticker_symbol.as_str());
                }
            }
        }
        let quotes: HashMap<&str, Quote> = stream::iter(legs)
            .map(|symbol| async move { (symbol, self.quotes.quote(symbol).await) })
            .buffered(self.concurrency)
            .filter_map(|(symbol, quote)| async move { quote.map(|q| (symbol, q)) })
            .collect()
            .await;

        pairs
            .iter()
            .filter_map(|pair| {
                let long_quote = quotes.get(pair.long.ticker_symbol.as_str())?.clone();
                let short_quote = quotes.get(pair.short.ticker_symbol.as_str())?.clone();
                let candidate = evaluate(pair, long_quote, short_quote);
                if candidate.is_none() {
                    debug!(
                        target: "price",
                        long = %pair.long.ticker_symbol,
                        short = %pair.short.ticker_symbol,
                        "pair unpriceable"
                    );
                }
                candidate
            })
            .collect()
    }
}

/// Highest ROI inside the strategy band; the earliest candidate wins exact ties.
pub fn best_in_band<I>(candidates: I, strategy: &StrategyConfig) -> Option<SpreadCandidate>
where
    I: IntoIterator<Item = SpreadCandidate>,
{
    candidates
        .into_iter()
        .filter(|c| strategy.roi_in_range(c.roi_percent))
        .fold(None, |best: Option<SpreadCandidate>, candidate| match best {
            Some(current) if current.roi_percent >= candidate.roi_percent => Some(current),
            _ => Some(candidate),
        })
}

pub struct WidthEscalationSelector<'a> {
    pricer: SpreadPricer<'a>,
    widths: &'a [Decimal],
}

impl<'a> WidthEscalationSelector<'a> {
    pub fn new(quotes: &'a QuoteCache, widths: &'a [Decimal], concurrency: usize) -> Self {
        Self {
            pricer: SpreadPricer::new(quotes, concurrency),
            widths,
        }
    }

    /// Prices width buckets narrowest first and stops at the first bucket that
    /// yields a candidate inside the ROI band.
    pub async fn select(&self, pairs: &[SpreadPair], strategy: &StrategyConfig) -> SpreadResult {
        let mut widths = self.widths.to_vec();
        widths.sort();
        widths.dedup();

        for width in widths {
            let bucket: Vec<&SpreadPair> = pairs.iter().filter(|p| p.width == width).collect();
            if bucket.is_empty() {
                continue;
            }
            // candidates come back in pair order, whatever order quotes complete in
            let priced = self.pricer.price_all(&bucket).await;
            let priced_count = priced.len();
            let best = best_in_band(priced, strategy);
            debug!(
                target: "select",
                strategy = %strategy.kind,
                width = %width,
                pairs = bucket.len(),
                priced = priced_count,
                qualified = best.is_some(),
                "width bucket evaluated"
            );
            if let Some(candidate) = best {
                info!(
                    target: "select",
                    strategy = %strategy.kind,
                    width = %width,
                    long = %candidate.long.ticker_symbol,
                    short = %candidate.short.ticker_symbol,
                    roi = %candidate.roi_percent.round_dp(2),
                    "spread selected"
                );
                return SpreadResult::Found {
                    strategy: strategy.kind,
                    candidate,
                    session_id: None,
                };
            }
        }
        SpreadResult::not_found(REASON_NO_SPREADS)
    }
}
