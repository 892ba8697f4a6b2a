//! Configuration for the copy trader.
//!
//! The configuration record is assembled from CLI flags: mode and profile
//! are picked first, the profile preset fills the latency knobs, and any
//! explicitly-given tuning flag overrides the preset.

use std::path::PathBuf;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Trading mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TradeMode {
    /// Log intents only, place nothing.
    #[default]
    Paper,
    /// Place real orders through the execution adapter.
    Live,
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeMode::Paper => write!(f, "paper"),
            TradeMode::Live => write!(f, "live"),
        }
    }
}

/// Sizing rule for mirror orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeMode {
    /// Scale the source notional by `my_balance / source_balance`.
    #[default]
    Percent,
    /// Constant notional per copied order.
    Fixed,
}

impl SizeMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "percent" => Some(SizeMode::Percent),
            "fixed" => Some(SizeMode::Fixed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SizeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeMode::Percent => write!(f, "percent"),
            SizeMode::Fixed => write!(f, "fixed"),
        }
    }
}

/// Latency profile: a preset bundle for the tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyProfile {
    /// Moderate debounce/cooldowns, HTTP book fallback on.
    #[default]
    Fast,
    /// Tighter debounce/cooldowns, more parallelism, WS-only books.
    Turbo,
}

impl LatencyProfile {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fast" => Some(LatencyProfile::Fast),
            "turbo" => Some(LatencyProfile::Turbo),
            _ => None,
        }
    }
}

impl std::fmt::Display for LatencyProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LatencyProfile::Fast => write!(f, "fast"),
            LatencyProfile::Turbo => write!(f, "turbo"),
        }
    }
}

/// Full configuration record for a run.
#[derive(Debug, Clone)]
pub struct CopyConfig {
    /// `@pseudonym` or 0x wallet of the source trader. Required.
    pub source: String,
    pub mode: TradeMode,
    pub profile: LatencyProfile,
    pub size_mode: SizeMode,

    /// Percent-mode ratio inputs.
    pub my_balance_usdc: Decimal,
    pub source_balance_usdc: Decimal,
    /// Fixed-mode notional.
    pub fixed_order_usdc: Decimal,
    /// Hard cap per copied order; zero disables.
    pub max_order_usdc: Decimal,

    /// Accept-window for the source price and clamp for the order price.
    pub min_price: Decimal,
    pub max_price: Decimal,
    /// Reject when `recv_ts - event_ts` exceeds this.
    pub max_lag_ms: i64,
    /// Reject when the top-of-book spread exceeds this.
    pub max_spread: Decimal,
    /// Increment past the opposite touch when crossing.
    pub cross_tick: Decimal,

    /// Window of historical trades replayed at startup.
    pub bootstrap_seconds: u64,
    /// Period of the reconcile pull loop (floored at 2s).
    pub reconcile_seconds: u64,
    /// Items per activity pull on a debounced refresh.
    pub trade_fetch_limit: usize,
    /// Ceiling on concurrent trade-processing tasks.
    pub max_parallel: usize,
    /// Per-asset cooldown between WS-driven refresh triggers.
    pub min_asset_refresh_ms: i64,
    /// Debounce horizon coalescing refresh triggers across assets.
    pub refresh_debounce_ms: i64,
    /// Reuse the last activity payload if younger than this.
    pub activity_cache_ms: i64,
    /// Allow refreshing a stale/missing book over HTTP.
    pub book_http_fallback: bool,
    /// Book snapshot freshness horizon.
    pub book_ttl_ms: i64,

    /// Self-stop after this many seconds; zero disables.
    pub benchmark_seconds: u64,
    /// Emit a percentile summary every N samples; zero disables.
    pub stats_every: u64,

    /// Live execution backend name.
    pub live_exec: String,
    /// Order-placement bridge script (python-bridge backend).
    pub bridge_script: PathBuf,
    /// Interpreter used to run the bridge script.
    pub bridge_python: String,

    pub log_level: String,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            mode: TradeMode::Paper,
            profile: LatencyProfile::Fast,
            size_mode: SizeMode::Percent,
            my_balance_usdc: dec!(100),
            source_balance_usdc: dec!(20000),
            fixed_order_usdc: dec!(1),
            max_order_usdc: Decimal::ZERO,
            min_price: dec!(0.01),
            max_price: dec!(0.99),
            max_lag_ms: 1_200,
            max_spread: dec!(0.03),
            cross_tick: dec!(0.01),
            bootstrap_seconds: 120,
            reconcile_seconds: 8,
            trade_fetch_limit: 30,
            max_parallel: 4,
            min_asset_refresh_ms: 400,
            refresh_debounce_ms: 250,
            activity_cache_ms: 300,
            book_http_fallback: true,
            book_ttl_ms: 1_500,
            benchmark_seconds: 0,
            stats_every: 20,
            live_exec: "python-bridge".to_string(),
            bridge_script: PathBuf::from("scripts/place_order_once.py"),
            bridge_python: "python3".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Explicitly-given tuning flags; `None` means "use the profile preset".
#[derive(Debug, Clone, Default)]
pub struct TuningOverrides {
    pub size_mode: Option<SizeMode>,
    pub my_balance_usdc: Option<Decimal>,
    pub source_balance_usdc: Option<Decimal>,
    pub fixed_order_usdc: Option<Decimal>,
    pub max_order_usdc: Option<Decimal>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub max_lag_ms: Option<i64>,
    pub max_spread: Option<Decimal>,
    pub cross_tick: Option<Decimal>,
    pub bootstrap_seconds: Option<u64>,
    pub reconcile_seconds: Option<u64>,
    pub trade_fetch_limit: Option<usize>,
    pub max_parallel: Option<usize>,
    pub min_asset_refresh_ms: Option<i64>,
    pub refresh_debounce_ms: Option<i64>,
    pub activity_cache_ms: Option<i64>,
    pub book_http_fallback: Option<bool>,
    pub book_ttl_ms: Option<i64>,
    pub benchmark_seconds: Option<u64>,
    pub stats_every: Option<u64>,
    pub live_exec: Option<String>,
    pub bridge_script: Option<PathBuf>,
    pub bridge_python: Option<String>,
    pub log_level: Option<String>,
}

impl CopyConfig {
    /// Assemble the config: profile preset first, explicit flags on top.
    pub fn build(
        source: Option<String>,
        mode: TradeMode,
        profile: LatencyProfile,
        overrides: &TuningOverrides,
    ) -> Self {
        let mut cfg = Self {
            source: source.unwrap_or_default(),
            mode,
            profile,
            ..Self::default()
        };
        cfg.apply_profile();
        cfg.apply_overrides(overrides);
        cfg
    }

    /// Set the latency knobs from the selected profile preset.
    pub fn apply_profile(&mut self) {
        match self.profile {
            LatencyProfile::Fast => {
                self.refresh_debounce_ms = 250;
                self.min_asset_refresh_ms = 400;
                self.activity_cache_ms = 300;
                self.max_parallel = 4;
                self.book_ttl_ms = 1_500;
                self.book_http_fallback = true;
            }
            LatencyProfile::Turbo => {
                self.refresh_debounce_ms = 120;
                self.min_asset_refresh_ms = 150;
                self.activity_cache_ms = 150;
                self.max_parallel = 8;
                self.book_ttl_ms = 800;
                self.book_http_fallback = false;
            }
        }
    }

    /// Apply explicitly-given flags on top of the profile preset.
    pub fn apply_overrides(&mut self, o: &TuningOverrides) {
        macro_rules! set {
            ($field:ident) => {
                if let Some(v) = o.$field.clone() {
                    self.$field = v;
                }
            };
        }
        set!(size_mode);
        set!(my_balance_usdc);
        set!(source_balance_usdc);
        set!(fixed_order_usdc);
        set!(max_order_usdc);
        set!(min_price);
        set!(max_price);
        set!(max_lag_ms);
        set!(max_spread);
        set!(cross_tick);
        set!(bootstrap_seconds);
        set!(reconcile_seconds);
        set!(trade_fetch_limit);
        set!(max_parallel);
        set!(min_asset_refresh_ms);
        set!(refresh_debounce_ms);
        set!(activity_cache_ms);
        set!(book_http_fallback);
        set!(book_ttl_ms);
        set!(benchmark_seconds);
        set!(stats_every);
        set!(live_exec);
        set!(bridge_script);
        set!(bridge_python);
        set!(log_level);
    }

    /// Validate the assembled record. Failures are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            bail!("--source is required (@pseudonym or 0x wallet)");
        }
        match self.size_mode {
            SizeMode::Percent => {
                if self.my_balance_usdc <= Decimal::ZERO
                    || self.source_balance_usdc <= Decimal::ZERO
                {
                    bail!("--my-balance-usdc and --source-balance-usdc must be > 0 in percent mode");
                }
            }
            SizeMode::Fixed => {
                if self.fixed_order_usdc <= Decimal::ZERO {
                    bail!("--fixed-order-usdc must be > 0 in fixed mode");
                }
            }
        }
        if self.max_order_usdc < Decimal::ZERO {
            bail!("--max-order-usdc must be >= 0");
        }
        if self.min_price >= self.max_price {
            bail!("--min-price must be below --max-price");
        }
        if self.max_parallel == 0 {
            bail!("--max-parallel must be at least 1");
        }
        if self.trade_fetch_limit == 0 {
            bail!("--trade-fetch-limit must be at least 1");
        }
        Ok(())
    }

    /// Percent-mode scale factor.
    pub fn percent_scale(&self) -> Decimal {
        self.my_balance_usdc / self.source_balance_usdc
    }

    /// Reconcile period with the 2 second floor applied.
    pub fn reconcile_period_secs(&self) -> u64 {
        self.reconcile_seconds.max(2)
    }
}
