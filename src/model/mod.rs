use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Strike widths a spread may have, ascending. Also the escalation buckets.
pub const DEFAULT_WIDTHS: [Decimal; 5] = [dec!(0.5), dec!(1), dec!(2.5), dec!(5), dec!(10)];

pub const REASON_NO_SPREADS: &str = "no spreads within ROI range";
pub const REASON_NO_CONTRACTS: &str = "no contracts match strategy DTE/strike filters";
pub const REASON_NO_PAIRS: &str = "no valid strike pairs for allowed widths";
pub const REASON_UNAVAILABLE: &str = "price/catalog unavailable";
pub const REASON_DISABLED: &str = "strategy disabled";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OptionKind {
    Call,
    Put,
}

impl Display for OptionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionKind::Call => write!(f, "C"),
            OptionKind::Put => write!(f, "P"),
        }
    }
}

impl FromStr for OptionKind {
    type Err = ParseSymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "C" | "CALL" => Ok(OptionKind::Call),
            "P" | "PUT" => Ok(OptionKind::Put),
            other => Err(ParseSymbolError::UnknownOptionKind(other.to_string())),
        }
    }
}

/// A listed option. Identity is (underlying, strike, expiration).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Contract {
    pub ticker_symbol: String,
    pub underlying_symbol: String,
    pub strike: Decimal,
    pub expiration_date: NaiveDate,
    pub option_kind: OptionKind,
}

pub type ContractKey = (String, Decimal, NaiveDate);

impl Contract {
    pub fn key(&self) -> ContractKey {
        (
            self.underlying_symbol.clone(),
            self.strike.normalize(),
            self.expiration_date,
        )
    }

    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiration_date - today).num_days()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl Quote {
    pub fn is_priceable(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO
    }

    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / dec!(2)
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Aggressive,
    Balanced,
    Conservative,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Aggressive,
        StrategyKind::Balanced,
        StrategyKind::Conservative,
    ];
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Aggressive => write!(f, "aggressive"),
            StrategyKind::Balanced => write!(f, "balanced"),
            StrategyKind::Conservative => write!(f, "conservative"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = ParseSymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggressive" | "agg" => Ok(StrategyKind::Aggressive),
            "balanced" | "bal" => Ok(StrategyKind::Balanced),
            "conservative" | "cons" => Ok(StrategyKind::Conservative),
            other => Err(ParseSymbolError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Inclusive window of `strike / spot` ratios a contract must fall in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StrikeBand {
    pub min_ratio: Decimal,
    pub max_ratio: Decimal,
}

impl StrikeBand {
    pub fn contains(&self, strike: Decimal, current_price: Decimal) -> bool {
        if current_price <= Decimal::ZERO {
            return false;
        }
        strike >= current_price * self.min_ratio && strike <= current_price * self.max_ratio
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub roi_min: Decimal,
    pub roi_max: Decimal,
    pub dte_min: i64,
    pub dte_max: i64,
    pub strike_band: StrikeBand,
}

impl StrategyConfig {
    pub fn defaults() -> [StrategyConfig; 3] {
        [
            Self::for_kind(StrategyKind::Aggressive),
            Self::for_kind(StrategyKind::Balanced),
            Self::for_kind(StrategyKind::Conservative),
        ]
    }

    pub fn for_kind(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Aggressive => StrategyConfig {
                kind,
                roi_min: dec!(25),
                roi_max: dec!(50),
                dte_min: 10,
                dte_max: 17,
                strike_band: StrikeBand {
                    min_ratio: dec!(0.90),
                    max_ratio: dec!(1.00),
                },
            },
            StrategyKind::Balanced => StrategyConfig {
                kind,
                roi_min: dec!(12),
                roi_max: dec!(25),
                dte_min: 17,
                dte_max: 28,
                strike_band: StrikeBand {
                    min_ratio: dec!(0.85),
                    max_ratio: dec!(0.98),
                },
            },
            StrategyKind::Conservative => StrategyConfig {
                kind,
                roi_min: dec!(8),
                roi_max: dec!(15),
                dte_min: 28,
                dte_max: 42,
                strike_band: StrikeBand {
                    min_ratio: dec!(0.75),
                    max_ratio: dec!(0.95),
                },
            },
        }
    }

    pub fn dte_in_range(&self, dte: i64) -> bool {
        dte >= self.dte_min && dte <= self.dte_max
    }

    pub fn roi_in_range(&self, roi_percent: Decimal) -> bool {
        roi_percent >= self.roi_min && roi_percent <= self.roi_max
    }
}

/// A contract that passed a strategy filter, tagged with its DTE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatedContract {
    pub contract: Contract,
    pub dte: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpreadPair {
    pub long: Contract,
    pub short: Contract,
    pub width: Decimal,
    pub dte: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpreadCandidate {
    pub long: Contract,
    pub short: Contract,
    pub long_quote: Quote,
    pub short_quote: Quote,
    pub cost: Decimal,
    pub width: Decimal,
    pub max_profit: Decimal,
    pub roi_percent: Decimal,
    pub breakeven: Decimal,
    pub dte: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpreadResult {
    Found {
        strategy: StrategyKind,
        candidate: SpreadCandidate,
        session_id: Option<String>,
    },
    NotFound {
        reason: String,
    },
}

impl SpreadResult {
    pub fn not_found(reason: impl Into<String>) -> Self {
        SpreadResult::NotFound {
            reason: reason.into(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, SpreadResult::Found { .. })
    }

    pub fn candidate(&self) -> Option<&SpreadCandidate> {
        match self {
            SpreadResult::Found { candidate, .. } => Some(candidate),
            SpreadResult::NotFound { .. } => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            SpreadResult::Found { session_id, .. } => session_id.as_deref(),
            SpreadResult::NotFound { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SpreadResult::Found { .. } => None,
            SpreadResult::NotFound { reason } => Some(reason),
        }
    }
}

// Wire shape: `{found: true, ...spread fields}` or `{found: false, reason}`.
impl Serialize for SpreadResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct FoundView<'a> {
            found: bool,
            strategy: StrategyKind,
            #[serde(skip_serializing_if = "Option::is_none")]
            session_id: Option<&'a str>,
            #[serde(flatten)]
            candidate: &'a SpreadCandidate,
        }

        #[derive(Serialize)]
        struct NotFoundView<'a> {
            found: bool,
            reason: &'a str,
        }

        match self {
            SpreadResult::Found {
                strategy,
                candidate,
                session_id,
            } => FoundView {
                found: true,
                strategy: *strategy,
                session_id: session_id.as_deref(),
                candidate,
            }
            .serialize(serializer),
            SpreadResult::NotFound { reason } => NotFoundView {
                found: false,
                reason,
            }
            .serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TickerAnalysis {
    pub ticker: String,
    pub current_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub results: BTreeMap<StrategyKind, SpreadResult>,
}

impl TickerAnalysis {
    pub fn result(&self, strategy: StrategyKind) -> Option<&SpreadResult> {
        self.results.get(&strategy)
    }

    pub fn found_count(&self) -> usize {
        self.results.values().filter(|r| r.is_found()).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEntry {
    pub id: String,
    pub ticker: String,
    pub strategy: StrategyKind,
    pub candidate: SpreadCandidate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("upstream unavailable for {subject}: {message}")]
    UpstreamUnavailable { subject: String, message: String },
    #[error("contract catalog unavailable for {ticker}: {message}")]
    CatalogUnavailable { ticker: String, message: String },
    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u128 },
}

#[derive(Debug, Error)]
pub enum ParseSymbolError {
    #[error("invalid option symbol format: {0}")]
    InvalidFormat(String),
    #[error("unknown option kind: {0}")]
    UnknownOptionKind(String),
    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),
    #[error("invalid strike: {0}")]
    InvalidStrike(String),
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
}

/// Fields decoded from an OCC-style option symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOptionSymbol {
    pub underlying: String,
    pub expiration_date: NaiveDate,
    pub option_kind: OptionKind,
    pub strike: Decimal,
}

impl FromStr for ParsedOptionSymbol {
    type Err = ParseSymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Format e.g. O:XYZ251121C00096500 (strike in thousandths)
        let body = s.strip_prefix("O:").unwrap_or(s);
        if body.len() < 16 || !body.is_ascii() {
            return Err(ParseSymbolError::InvalidFormat(s.to_string()));
        }
        let split = body.len() - 15;
        let underlying = body[..split].trim().to_ascii_uppercase();
        if underlying.is_empty() {
            return Err(ParseSymbolError::InvalidFormat(s.to_string()));
        }
        let date_part = &body[split..split + 6];
        let kind_part = &body[split + 6..split + 7];
        let strike_part = &body[split + 7..];

        let expiration_date = NaiveDate::parse_from_str(date_part, "%y%m%d")
            .map_err(|_| ParseSymbolError::InvalidExpiry(date_part.to_string()))?;
        let option_kind = kind_part.parse()?;
        let thousandths: i64 = strike_part
            .parse()
            .map_err(|_| ParseSymbolError::InvalidStrike(strike_part.to_string()))?;

        Ok(Self {
            underlying,
            expiration_date,
            option_kind,
            strike: Decimal::new(thousandths, 3).normalize(),
        })
    }
}

impl ParsedOptionSymbol {
    pub fn into_contract(self, ticker_symbol: &str) -> Contract {
        Contract {
            ticker_symbol: ticker_symbol.to_string(),
            underlying_symbol: self.underlying,
            strike: self.strike,
            expiration_date: self.expiration_date,
            option_kind: self.option_kind,
        }
    }
}

/// Renders the OCC symbol for a call/put, the inverse of `ParsedOptionSymbol`.
pub fn occ_symbol(
    underlying: &str,
    expiration_date: NaiveDate,
    option_kind: OptionKind,
    strike: Decimal,
) -> String {
    let thousandths = (strike * dec!(1000)).round().to_i64().unwrap_or_default();
    format!(
        "O:{}{}{}{:08}",
        underlying.to_ascii_uppercase(),
        expiration_date.format("%y%m%d"),
        option_kind,
        thousandths
    )
}
