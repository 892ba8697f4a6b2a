//! Core domain types shared by the market clients and the engine.
//!
//! The activity feed is loosely typed on the wire: numbers arrive as JSON
//! numbers or strings, timestamps in seconds or milliseconds, and optional
//! fields may be null or absent. Everything here deserializes defensively
//! so a malformed item degrades to a filter rejection downstream, never a
//! parse error.

use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Order side for trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse the feed's side string. Anything but BUY/SELL is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// One entry from the source trader's activity feed.
///
/// `timestamp` is normalized to milliseconds since epoch on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TradeItem {
    /// Transaction hash (opaque, may be empty on malformed rows).
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: String,

    /// Token id the trade was on.
    #[serde(default)]
    pub asset: String,

    /// Raw side string from the feed; validated by the processor.
    #[serde(default)]
    pub side: String,

    /// Trade time in milliseconds since epoch (feed sends sec or ms).
    #[serde(default, deserialize_with = "de_ts_ms")]
    pub timestamp: i64,

    /// Probability price in [0, 1].
    #[serde(default, deserialize_with = "de_decimal")]
    pub price: Decimal,

    /// Size in shares.
    #[serde(default, deserialize_with = "de_decimal")]
    pub size: Decimal,

    /// Notional in USDC; zero when absent.
    #[serde(rename = "usdcSize", default, deserialize_with = "de_decimal")]
    pub usdc_size: Decimal,
}

impl TradeItem {
    /// Identity key for at-most-once dispatch.
    pub fn dedup_key(&self) -> String {
        dedup_key(
            &self.transaction_hash,
            &self.asset,
            &self.side,
            self.timestamp,
            self.price,
            self.size,
        )
    }
}

/// Join the trade identity tuple into an opaque key.
pub fn dedup_key(
    tx_hash: &str,
    asset: &str,
    side: &str,
    timestamp: i64,
    price: Decimal,
    size: Decimal,
) -> String {
    format!("{tx_hash}|{asset}|{side}|{timestamp}|{price}|{size}")
}

/// Current wall clock in milliseconds since epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Normalize an epoch timestamp to milliseconds.
///
/// Values below 10^12 are treated as seconds (10^12 ms is Sep 2001, far
/// before any feed data; 10^12 s is ~33,000 AD).
pub fn normalize_ts_ms(raw: i64) -> i64 {
    if raw != 0 && raw.abs() < 1_000_000_000_000 {
        raw.saturating_mul(1000)
    } else {
        raw
    }
}

/// Pull a `Decimal` out of a JSON number or numeric string.
pub fn lenient_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(Decimal::from_f64)
            }
        }
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Pull a millisecond epoch timestamp out of a JSON number or string,
/// accepting second-resolution values.
pub fn lenient_ts_ms(value: &Value) -> Option<i64> {
    let raw = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            // Some surfaces send fractional-second strings.
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))?
        }
        _ => return None,
    };
    if raw == 0 {
        return None;
    }
    Some(normalize_ts_ms(raw))
}

fn de_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(lenient_decimal)
        .unwrap_or(Decimal::ZERO))
}

fn de_ts_ms<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(lenient_ts_ms).unwrap_or(0))
}
