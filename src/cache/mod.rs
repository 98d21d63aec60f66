use crate::client::MarketData;
use crate::model::{DiscoveryError, Quote};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// Key/value store with per-key expiry. A miss is not an error.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub live_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.inner.write();
        let before = guard.len();
        guard.retain(|_, entry| entry.expires_at > now);
        before - guard.len()
    }

    pub fn stats(&self) -> CacheStats {
        let guard = self.inner.read();
        let now = Instant::now();
        CacheStats {
            entries: guard.len(),
            live_entries: guard.values().filter(|e| e.expires_at > now).count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let value = {
            let guard = self.inner.read();
            guard
                .get(key)
                .filter(|entry| entry.expires_at > now)
                .map(|entry| entry.value.clone())
        };
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        // stale keys are dropped on write, value and expiry replaced under one lock
        let mut guard = self.inner.write();
        guard.retain(|_, entry| entry.expires_at > now);
        guard.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }
}

/// Runs an upstream call under `timeout`, folding failures into `DiscoveryError`.
pub async fn bounded<T, F>(
    operation: &str,
    subject: &str,
    timeout: Duration,
    call: F,
) -> Result<T, DiscoveryError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(DiscoveryError::UpstreamUnavailable {
            subject: subject.to_string(),
            message: format!("{operation}: {err:#}"),
        }),
        Err(_) => Err(DiscoveryError::Timeout {
            operation: format!("{operation} {subject}"),
            millis: timeout.as_millis(),
        }),
    }
}

/// Price and quote lookups served from a short-lived cache.
pub struct QuoteCache {
    market: Arc<dyn MarketData>,
    store: Arc<dyn KeyValueCache>,
    ttl: Duration,
    fetch_timeout: Duration,
    // one gate per key with a fetch in flight
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl QuoteCache {
    pub fn new(
        market: Arc<dyn MarketData>,
        store: Arc<dyn KeyValueCache>,
        ttl: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            market,
            store,
            ttl,
            fetch_timeout,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn current_price(&self, ticker: &str) -> Result<Decimal, DiscoveryError> {
        let key = format!("price:{ticker}");
        if let Some(price) = self.cached::<Decimal>(&key).await {
            return Ok(price);
        }
        let price = bounded(
            "price",
            ticker,
            self.fetch_timeout,
            self.market.get_current_price(ticker),
        )
        .await?;
        if price <= Decimal::ZERO {
            return Err(DiscoveryError::UpstreamUnavailable {
                subject: ticker.to_string(),
                message: format!("non-positive price {price}"),
            });
        }
        self.remember(&key, &price).await;
        Ok(price)
    }

    /// `None` when the quote could not be fetched in time; never fatal.
    pub async fn quote(&self, contract_id: &str) -> Option<Quote> {
        let key = format!("quote:{contract_id}");
        if let Some(quote) = self.cached::<Quote>(&key).await {
            return Some(quote);
        }
        // Concurrent misses on one key queue behind a single upstream fetch.
        let gate = self.inflight.lock().entry(key.clone()).or_default().clone();
        let _turn = gate.lock().await;
        let fetched = match self.cached::<Quote>(&key).await {
            Some(quote) => Some(quote),
            None => self.fetch_quote(&key, contract_id).await,
        };
        self.inflight.lock().remove(&key);
        fetched
    }

    async fn fetch_quote(&self, key: &str, contract_id: &str) -> Option<Quote> {
        match bounded(
            "quote",
            contract_id,
            self.fetch_timeout,
            self.market.get_quote(contract_id),
        )
        .await
        {
            Ok(quote) => {
                self.remember(key, &quote).await;
                Some(quote)
            }
            Err(err) => {
                debug!(target: "quote", contract = %contract_id, error = %err, "quote unavailable");
                None
            }
        }
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(target: "cache", key = %key, error = %err, "discarding corrupt cache entry");
                None
            }
        }
    }

    async fn remember<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.store.set(key, raw, self.ttl).await,
            Err(err) => warn!(target: "cache", key = %key, error = %err, "failed to encode cache entry"),
        }
    }
}
