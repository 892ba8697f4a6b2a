//! Per-asset top-of-book cache.
//!
//! WebSocket `book` events keep the cache warm; the resolver used by the
//! trade processor serves fresh entries, optionally refreshing stale or
//! missing ones over HTTP. A missing side stays `None` and the consumer
//! rejects the corresponding trade instead of erroring.

use dashmap::DashMap;
use mirror_common::now_ms;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Polymarket CLOB REST base URL.
pub const CLOB_BASE: &str = "https://clob.polymarket.com";

/// Cached best bid/ask for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopOfBook {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub updated_at_ms: i64,
}

impl TopOfBook {
    /// Ask minus bid; `None` when either side is absent.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    pub fn is_fresh(&self, now_ms: i64, ttl_ms: i64) -> bool {
        self.updated_at_ms > 0 && now_ms.saturating_sub(self.updated_at_ms) <= ttl_ms
    }
}

#[derive(Debug, Error)]
enum BookError {
    #[error("book request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Configuration for the book cache.
#[derive(Debug, Clone)]
pub struct BookCacheConfig {
    /// Freshness horizon for cached entries.
    pub ttl_ms: i64,
    /// Whether a stale/missing entry may be refreshed over HTTP.
    pub http_fallback: bool,
    /// CLOB REST base URL.
    pub base: String,
}

impl Default for BookCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 1_500,
            http_fallback: true,
            base: CLOB_BASE.to_string(),
        }
    }
}

/// Book cache keyed by asset (token id).
pub struct BookCache {
    config: BookCacheConfig,
    client: Client,
    books: DashMap<String, TopOfBook>,
}

#[derive(Debug, Deserialize)]
struct RestLevel {
    price: String,
}

#[derive(Debug, Deserialize)]
struct RestBook {
    #[serde(default)]
    bids: Vec<RestLevel>,
    #[serde(default)]
    asks: Vec<RestLevel>,
}

impl BookCache {
    pub fn new(client: Client, config: BookCacheConfig) -> Self {
        Self {
            config,
            client,
            books: DashMap::new(),
        }
    }

    /// Store the top of book derived from full bid/ask price lists.
    ///
    /// `updated_at_ms` never moves backwards for an asset, so a delayed
    /// event cannot mark a newer snapshot stale.
    pub fn apply_levels(&self, asset: &str, bids: &[Decimal], asks: &[Decimal], at_ms: i64) {
        let best_bid = bids.iter().copied().max();
        let best_ask = asks.iter().copied().min();
        let mut entry = self.books.entry(asset.to_string()).or_default();
        entry.best_bid = best_bid;
        entry.best_ask = best_ask;
        entry.updated_at_ms = entry.updated_at_ms.max(at_ms);
    }

    /// Cached entry without any freshness check or refresh.
    pub fn peek(&self, asset: &str) -> Option<TopOfBook> {
        self.books.get(asset).map(|e| *e.value())
    }

    /// Resolve the top of book for the trade processor.
    ///
    /// Fresh cache hit wins; otherwise an HTTP probe when the fallback is
    /// enabled; otherwise whatever is cached, possibly stale, or a
    /// null-filled snapshot.
    pub async fn top_of_book(&self, asset: &str) -> TopOfBook {
        let now = now_ms();
        let cached = self.peek(asset);
        if let Some(entry) = cached {
            if entry.is_fresh(now, self.config.ttl_ms) {
                return entry;
            }
        }

        if self.config.http_fallback {
            match self.fetch_book(asset).await {
                Ok(top) => {
                    let mut entry = self.books.entry(asset.to_string()).or_default();
                    entry.best_bid = top.best_bid;
                    entry.best_ask = top.best_ask;
                    entry.updated_at_ms = entry.updated_at_ms.max(top.updated_at_ms);
                    return *entry;
                }
                Err(e) => {
                    warn!(asset = %short(asset), error = %e, "book probe failed");
                }
            }
        }

        cached.unwrap_or_default()
    }

    async fn fetch_book(&self, asset: &str) -> Result<TopOfBook, BookError> {
        let url = format!("{}/book", self.config.base);
        let resp = self
            .client
            .get(&url)
            .query(&[("token_id", asset)])
            .send()
            .await?
            .error_for_status()?;
        let book: RestBook = resp.json().await?;

        // Best level sits at index 0 on the REST book; parse defensively
        // and fall back to scanning in case ordering ever changes.
        let bids: Vec<Decimal> = book
            .bids
            .iter()
            .filter_map(|l| l.price.trim().parse().ok())
            .collect();
        let asks: Vec<Decimal> = book
            .asks
            .iter()
            .filter_map(|l| l.price.trim().parse().ok())
            .collect();

        let top = TopOfBook {
            best_bid: bids.iter().copied().max(),
            best_ask: asks.iter().copied().min(),
            updated_at_ms: now_ms(),
        };
        debug!(
            asset = %short(asset),
            bid = ?top.best_bid,
            ask = ?top.best_ask,
            "book probe"
        );
        Ok(top)
    }
}

fn short(asset: &str) -> &str {
    &asset[..asset.len().min(14)]
}
