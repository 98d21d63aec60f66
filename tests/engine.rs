use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spread_finder::cache::MemoryCache;
use spread_finder::client::{MarketData, MarketDataHttpClient, StaticMarketData};
use spread_finder::engine::{EngineConfig, SpreadEngine};
use spread_finder::model::{
    occ_symbol, Contract, OptionKind, SpreadResult, StrategyConfig, StrategyKind,
    REASON_DISABLED, REASON_NO_CONTRACTS, REASON_UNAVAILABLE,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 11, 5).expect("valid date")
}

fn expiry() -> NaiveDate {
    // 15 days out
    NaiveDate::from_ymd_opt(2026, 11, 20).expect("valid date")
}

fn symbol(ticker: &str, strike: Decimal) -> String {
    occ_symbol(ticker, expiry(), OptionKind::Call, strike)
}

fn call(ticker: &str, strike: Decimal) -> Contract {
    Contract {
        ticker_symbol: symbol(ticker, strike),
        underlying_symbol: ticker.into(),
        strike,
        expiration_date: expiry(),
        option_kind: OptionKind::Call,
    }
}

/// Spot 100 with four near-the-money calls 15 days out. The 98 strike has no bid.
fn xyz_market() -> StaticMarketData {
    StaticMarketData::new()
        .with_price("XYZ", dec!(100))
        .with_contracts(
            "XYZ",
            vec![
                call("XYZ", dec!(95)),
                call("XYZ", dec!(96)),
                call("XYZ", dec!(97)),
                call("XYZ", dec!(98)),
            ],
        )
        .with_quote(&symbol("XYZ", dec!(95)), dec!(5.0), dec!(5.4))
        .with_quote(&symbol("XYZ", dec!(96)), dec!(4.8), dec!(5.6))
        .with_quote(&symbol("XYZ", dec!(97)), dec!(4.8), dec!(5.6))
        .with_quote(&symbol("XYZ", dec!(98)), dec!(0), dec!(5.6))
}

fn engine(market: &Arc<StaticMarketData>, config: EngineConfig) -> SpreadEngine {
    let upstream: Arc<dyn MarketData> = market.clone();
    SpreadEngine::new(upstream, Arc::new(MemoryCache::new()), config)
}

#[tokio::test]
async fn aggressive_spread_found_for_reference_chain() {
    let market = Arc::new(xyz_market());
    let engine = engine(&market, EngineConfig::default());

    let analysis = engine.discover_as_of("xyz", today()).await;

    assert_eq!(analysis.ticker, "XYZ");
    assert_eq!(analysis.current_price, Some(dec!(100)));
    assert_eq!(analysis.results.len(), 3);

    let aggressive = analysis
        .result(StrategyKind::Aggressive)
        .expect("aggressive result");
    let candidate = aggressive.candidate().expect("aggressive spread");
    assert_eq!(candidate.long.strike, dec!(96));
    assert_eq!(candidate.short.strike, dec!(97));
    assert_eq!(candidate.cost, dec!(0.8));
    assert_eq!(candidate.max_profit, dec!(0.2));
    assert_eq!(candidate.roi_percent, dec!(25));
    assert_eq!(candidate.breakeven, dec!(96.8));
    assert_eq!(candidate.dte, 15);

    for kind in [StrategyKind::Balanced, StrategyKind::Conservative] {
        let result = analysis.result(kind).expect("result present");
        assert_eq!(result.reason(), Some(REASON_NO_CONTRACTS));
    }
    assert_eq!(analysis.found_count(), 1);
}

#[tokio::test]
async fn session_is_attached_and_retrievable() {
    let market = Arc::new(xyz_market());
    let engine = engine(&market, EngineConfig::default());

    let analysis = engine.discover_as_of("XYZ", today()).await;
    let found = analysis
        .result(StrategyKind::Aggressive)
        .expect("aggressive result");
    let id = found.session_id().expect("session id");
    assert!(id.starts_with("XYZ-aggressive-"));

    let entry = engine.retrieve_session(id).expect("live session");
    assert_eq!(entry.ticker, "XYZ");
    assert_eq!(entry.strategy, StrategyKind::Aggressive);
    assert_eq!(Some(&entry.candidate), found.candidate());

    assert!(engine.retrieve_session("XYZ-aggressive-999-0").is_none());
    assert!(engine.retrieve_session("").is_none());
}

#[tokio::test]
async fn wider_buckets_are_not_priced_once_narrow_bucket_qualifies() {
    let market = Arc::new(
        StaticMarketData::new()
            .with_price("ABC", dec!(100))
            .with_contracts(
                "ABC",
                vec![
                    call("ABC", dec!(90)),
                    call("ABC", dec!(91)),
                    call("ABC", dec!(93.5)),
                ],
            )
            .with_quote(&symbol("ABC", dec!(90)), dec!(4.8), dec!(5.6))
            .with_quote(&symbol("ABC", dec!(91)), dec!(4.8), dec!(5.6))
            .with_quote(&symbol("ABC", dec!(93.5)), dec!(1.0), dec!(1.1)),
    );
    let engine = engine(&market, EngineConfig::default());

    let analysis = engine.discover_as_of("ABC", today()).await;

    let candidate = analysis
        .result(StrategyKind::Aggressive)
        .and_then(SpreadResult::candidate)
        .expect("aggressive spread");
    assert_eq!(candidate.width, dec!(1));
    assert!(!market.quote_calls().contains(&symbol("ABC", dec!(93.5))));
}

#[tokio::test]
async fn missing_price_marks_every_strategy_unavailable() {
    let market = Arc::new(
        StaticMarketData::new().with_contracts("XYZ", vec![call("XYZ", dec!(96))]),
    );
    let engine = engine(&market, EngineConfig::default());

    let analysis = engine.discover_as_of("XYZ", today()).await;

    assert_eq!(analysis.current_price, None);
    assert_eq!(analysis.results.len(), 3);
    for result in analysis.results.values() {
        let reason = result.reason().expect("not found");
        assert!(reason.starts_with(REASON_UNAVAILABLE), "{reason}");
    }
    assert!(market.quote_calls().is_empty());
    assert!(engine.sessions().is_empty());
}

#[tokio::test]
async fn empty_catalog_marks_every_strategy_unavailable() {
    let market = Arc::new(
        StaticMarketData::new()
            .with_price("XYZ", dec!(100))
            .with_contracts("XYZ", Vec::new()),
    );
    let engine = engine(&market, EngineConfig::default());

    let analysis = engine.discover_as_of("XYZ", today()).await;

    assert!(analysis
        .results
        .values()
        .all(|r| r.reason().is_some_and(|reason| reason.starts_with(REASON_UNAVAILABLE))));
}

#[tokio::test]
async fn slow_price_feed_times_out() {
    let market = Arc::new(xyz_market().with_latency("XYZ", Duration::from_millis(300)));
    let config = EngineConfig {
        fetch_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = engine(&market, config);

    let analysis = engine.discover_as_of("XYZ", today()).await;

    assert_eq!(analysis.found_count(), 0);
    let reason = analysis
        .result(StrategyKind::Aggressive)
        .and_then(SpreadResult::reason)
        .expect("not found");
    assert!(reason.contains("timed out"), "{reason}");
}

#[tokio::test]
async fn disabled_strategies_report_disabled() {
    let market = Arc::new(xyz_market());
    let config = EngineConfig {
        strategies: vec![StrategyConfig::for_kind(StrategyKind::Aggressive)],
        ..EngineConfig::default()
    };
    let engine = engine(&market, config);

    let analysis = engine.discover_as_of("XYZ", today()).await;

    assert!(analysis
        .result(StrategyKind::Aggressive)
        .is_some_and(SpreadResult::is_found));
    assert_eq!(
        analysis
            .result(StrategyKind::Conservative)
            .and_then(SpreadResult::reason),
        Some(REASON_DISABLED)
    );
}

#[tokio::test]
async fn quotes_are_served_from_cache_on_repeat_discovery() {
    let market = Arc::new(xyz_market());
    let engine = engine(&market, EngineConfig::default());

    let first = engine.discover_as_of("XYZ", today()).await;
    let calls_after_first = market.quote_calls().len();
    let second = engine.discover_as_of("XYZ", today()).await;

    assert_eq!(market.quote_calls().len(), calls_after_first);
    assert_eq!(market.price_calls().len(), 1);
    assert_eq!(market.catalog_calls().len(), 2);
    let a = first.result(StrategyKind::Aggressive).and_then(SpreadResult::session_id);
    let b = second.result(StrategyKind::Aggressive).and_then(SpreadResult::session_id);
    assert_ne!(a, b);
    assert_eq!(engine.sessions().len(), 2);
}

#[tokio::test]
async fn analysis_serializes_with_found_flags() {
    let market = Arc::new(xyz_market());
    let engine = engine(&market, EngineConfig::default());

    let analysis = engine.discover_as_of("XYZ", today()).await;
    let json = serde_json::to_value(&analysis).expect("serializable");

    assert_eq!(json["ticker"], "XYZ");
    let aggressive = &json["results"]["aggressive"];
    assert_eq!(aggressive["found"], true);
    assert_eq!(aggressive["strategy"], "aggressive");
    assert!(aggressive["session_id"].is_string());
    assert!(aggressive.get("roi_percent").is_some());
    assert!(aggressive.get("breakeven").is_some());
    assert_eq!(aggressive["long"]["ticker_symbol"], symbol("XYZ", dec!(96)));

    let balanced = &json["results"]["balanced"];
    assert_eq!(balanced["found"], false);
    assert_eq!(balanced["reason"], REASON_NO_CONTRACTS);
    assert!(balanced.get("roi_percent").is_none());
}

#[tokio::test]
async fn strategies_resolve_independently() {
    let balanced_expiry = NaiveDate::from_ymd_opt(2026, 11, 25).expect("valid date");
    let balanced_leg = |strike: Decimal| Contract {
        ticker_symbol: occ_symbol("XYZ", balanced_expiry, OptionKind::Call, strike),
        underlying_symbol: "XYZ".into(),
        strike,
        expiration_date: balanced_expiry,
        option_kind: OptionKind::Call,
    };
    // aggressive only sees the 95/96 pair at ROI ~66.7; balanced gets 90/91 at ROI ~17.6
    let market = Arc::new(
        StaticMarketData::new()
            .with_price("XYZ", dec!(100))
            .with_contracts(
                "XYZ",
                vec![
                    call("XYZ", dec!(95)),
                    call("XYZ", dec!(96)),
                    balanced_leg(dec!(90)),
                    balanced_leg(dec!(91)),
                ],
            )
            .with_quote(&symbol("XYZ", dec!(95)), dec!(5.0), dec!(5.4))
            .with_quote(&symbol("XYZ", dec!(96)), dec!(4.8), dec!(5.6))
            .with_quote(&balanced_leg(dec!(90)).ticker_symbol, dec!(4.8), dec!(5.7))
            .with_quote(&balanced_leg(dec!(91)).ticker_symbol, dec!(4.8), dec!(5.6)),
    );
    let engine = engine(&market, EngineConfig::default());

    let analysis = engine.discover_as_of("XYZ", today()).await;

    assert_eq!(
        analysis
            .result(StrategyKind::Aggressive)
            .and_then(SpreadResult::reason),
        Some(spread_finder::model::REASON_NO_SPREADS)
    );
    let balanced = analysis
        .result(StrategyKind::Balanced)
        .and_then(SpreadResult::candidate)
        .expect("balanced spread");
    assert_eq!(balanced.cost, dec!(0.85));
    assert_eq!(balanced.dte, 20);

    let strategy = StrategyConfig::for_kind(StrategyKind::Balanced);
    assert!(spread_finder::model::DEFAULT_WIDTHS.contains(&(balanced.short.strike - balanced.long.strike)));
    assert!(balanced.short.strike < dec!(100));
    assert!(balanced.cost > Decimal::ZERO);
    assert!(strategy.roi_in_range(balanced.roi_percent));
}

#[tokio::test]
async fn shared_legs_are_quoted_once_per_discovery() {
    let strikes = [dec!(95), dec!(96), dec!(97)];
    let mut market = StaticMarketData::new()
        .with_price("XYZ", dec!(100))
        .with_contracts("XYZ", strikes.iter().map(|s| call("XYZ", *s)).collect());
    for strike in strikes {
        market = market
            .with_quote(&symbol("XYZ", strike), dec!(4.8), dec!(5.6))
            .with_latency(&symbol("XYZ", strike), Duration::from_millis(20));
    }
    let market = Arc::new(market);
    let engine = engine(&market, EngineConfig::default());

    engine.discover_as_of("XYZ", today()).await;

    let calls = market.quote_calls();
    for strike in strikes {
        let fetched = calls.iter().filter(|c| **c == symbol("XYZ", strike)).count();
        assert_eq!(fetched, 1, "{strike} quoted {fetched} times: {calls:?}");
    }
}

#[tokio::test]
async fn upstream_failures_do_not_leak_credentials() {
    let client = MarketDataHttpClient::new(
        Url::parse("http://127.0.0.1:9").expect("url"),
        Some("SECRETKEY123".into()),
        Duration::from_millis(200),
    );
    let engine = SpreadEngine::new(
        Arc::new(client),
        Arc::new(MemoryCache::new()),
        EngineConfig::default(),
    );

    let analysis = engine.discover_as_of("XYZ", today()).await;

    assert_eq!(analysis.found_count(), 0);
    let json = serde_json::to_string(&analysis).expect("serializable");
    assert!(json.contains(REASON_UNAVAILABLE));
    assert!(!json.contains("SECRETKEY123"), "{json}");
}
