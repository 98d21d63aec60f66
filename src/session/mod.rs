use crate::model::{SessionEntry, SpreadCandidate, StrategyKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Short-lived snapshots of selected spreads, looked up by id.
pub struct SpreadSessionStore {
    entries: Mutex<HashMap<String, SessionEntry>>,
    counter: AtomicU64,
    ttl: chrono::Duration,
}

impl Default for SpreadSessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SpreadSessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52)),
        }
    }

    pub fn store(&self, ticker: &str, strategy: StrategyKind, candidate: &SpreadCandidate) -> String {
        self.store_at(ticker, strategy, candidate, Utc::now())
    }

    pub fn store_at(
        &self,
        ticker: &str,
        strategy: StrategyKind,
        candidate: &SpreadCandidate,
        now: DateTime<Utc>,
    ) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let ticker = ticker.to_ascii_uppercase();
        let id = format!(
            "{}-{}-{}-{}",
            ticker,
            strategy,
            sequence,
            now.timestamp_millis()
        );
        let entry = SessionEntry {
            id: id.clone(),
            ticker,
            strategy,
            candidate: candidate.clone(),
            created_at: now,
        };
        let mut guard = self.entries.lock();
        let before = guard.len();
        guard.retain(|_, existing| !self.is_expired(existing, now));
        let evicted = before - guard.len();
        guard.insert(id.clone(), entry);
        info!(
            target: "session",
            id = %id,
            live = guard.len(),
            evicted,
            "spread session stored"
        );
        id
    }

    /// `None` for unknown or expired ids; callers re-run discovery.
    pub fn get(&self, id: &str) -> Option<SessionEntry> {
        self.get_at(id, Utc::now())
    }

    pub fn get_at(&self, id: &str, now: DateTime<Utc>) -> Option<SessionEntry> {
        let mut guard = self.entries.lock();
        let expired = self.is_expired(guard.get(id)?, now);
        if expired {
            debug!(target: "session", id = %id, "session expired");
            guard.remove(id);
            return None;
        }
        guard.get(id).cloned()
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.entries.lock();
        let before = guard.len();
        guard.retain(|_, entry| !self.is_expired(entry, now));
        before - guard.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &SessionEntry, now: DateTime<Utc>) -> bool {
        now - entry.created_at >= self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contract, OptionKind, Quote};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn candidate() -> SpreadCandidate {
        let expiry = NaiveDate::from_ymd_opt(2026, 11, 20).expect("date");
        let leg = |strike: i64| Contract {
            ticker_symbol: format!("O:XYZ261120C{:08}", strike * 1000),
            underlying_symbol: "XYZ".into(),
            strike: strike.into(),
            expiration_date: expiry,
            option_kind: OptionKind::Call,
        };
        let quote = Quote {
            bid: dec!(1),
            ask: dec!(1.1),
            fetched_at: Utc::now(),
        };
        SpreadCandidate {
            long: leg(96),
            short: leg(97),
            long_quote: quote.clone(),
            short_quote: quote,
            cost: dec!(0.8),
            width: dec!(1),
            max_profit: dec!(0.2),
            roi_percent: dec!(25),
            breakeven: dec!(96.8),
            dte: 15,
        }
    }

    #[test]
    fn ids_are_unique_for_identical_inputs() {
        let store = SpreadSessionStore::default();
        let now = Utc::now();
        let a = store.store_at("xyz", StrategyKind::Aggressive, &candidate(), now);
        let b = store.store_at("xyz", StrategyKind::Aggressive, &candidate(), now);
        assert_ne!(a, b);
        assert!(a.starts_with("XYZ-aggressive-"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn entries_expire_at_ttl() {
        let store = SpreadSessionStore::new(Duration::from_secs(60));
        let created = Utc::now();
        let spread = candidate();
        let id = store.store_at("XYZ", StrategyKind::Balanced, &spread, created);

        let fresh = store
            .get_at(&id, created + chrono::Duration::seconds(59))
            .expect("live entry");
        assert_eq!(fresh.candidate, spread);
        assert_eq!(fresh.strategy, StrategyKind::Balanced);
        assert!(store
            .get_at(&id, created + chrono::Duration::seconds(60))
            .is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn storing_evicts_stale_entries() {
        let store = SpreadSessionStore::new(Duration::from_secs(60));
        let start = Utc::now();
        store.store_at("XYZ", StrategyKind::Aggressive, &candidate(), start);
        store.store_at(
            "XYZ",
            StrategyKind::Conservative,
            &candidate(),
            start + chrono::Duration::minutes(5),
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired_at(start + chrono::Duration::hours(1)), 1);
    }
}
