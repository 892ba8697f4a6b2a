//! Data-API activity feed for the source trader's recent trades.
//!
//! Non-2xx responses surface as typed errors so callers can log and retry
//! on their next cycle rather than crash.

use async_trait::async_trait;
use mirror_common::TradeItem;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Polymarket Data API base URL.
pub const DATA_BASE: &str = "https://data-api.polymarket.com";

/// Errors from the activity feed.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("activity request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("activity response was not valid JSON: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Source of the trader's recent activity, newest first.
///
/// The engine and its tests consume this seam; production uses
/// [`ActivityClient`], tests inject scripted feeds.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    /// Fetch up to `limit` recent trades, sorted by timestamp descending.
    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeItem>, ActivityError>;
}

/// HTTP activity feed for one wallet.
#[derive(Debug, Clone)]
pub struct ActivityClient {
    client: Client,
    base: String,
    user: String,
}

impl ActivityClient {
    pub fn new(client: Client, base: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
impl ActivityFeed for ActivityClient {
    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeItem>, ActivityError> {
        let url = format!("{}/activity", self.base);
        let limit_str = limit.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("user", self.user.as_str()),
                ("type", "TRADE"),
                ("limit", limit_str.as_str()),
                ("offset", "0"),
                ("sortBy", "TIMESTAMP"),
                ("sortDirection", "DESC"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let items: Vec<TradeItem> = resp.json().await.map_err(ActivityError::Decode)?;
        debug!(count = items.len(), limit, "fetched activity page");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_page_parses_mixed_rows() {
        let json = r#"[
            {"transactionHash": "0x1", "asset": "a", "side": "BUY",
             "timestamp": 1704067200, "price": "0.51", "size": 100,
             "usdcSize": 51},
            {"transactionHash": "0x2", "asset": "b", "side": "SELL",
             "timestamp": 1704067201000, "price": 0.3, "size": "10"}
        ]"#;
        let items: Vec<TradeItem> = serde_json::from_str(json).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].timestamp, 1_704_067_200_000);
        assert_eq!(items[1].timestamp, 1_704_067_201_000);
        assert_eq!(items[1].usdc_size, rust_decimal::Decimal::ZERO);
    }
}
