//! Shared types for the Polymarket copy-trading engine.
//!
//! All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod types;

pub use types::{
    dedup_key, lenient_decimal, lenient_ts_ms, normalize_ts_ms, now_ms, Side, TradeItem,
};
