//! mirror-bot: event-driven Polymarket copy trader.
//!
//! Follows a source profile/address and mirrors its BUY/SELL trades,
//! scaled by a sizing rule and filtered by market-risk guards.
//!
//! Examples:
//!   mirror-bot --source @k9Q2mX4L8A7ZP3R --paper \
//!       --size-mode percent --my-balance-usdc 100 --source-balance-usdc 20000
//!   mirror-bot --source 0xabc... --live --size-mode fixed --fixed-order-usdc 1.0 --profile turbo

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mirror_bot::config::{CopyConfig, LatencyProfile, SizeMode, TradeMode, TuningOverrides};
use mirror_bot::engine::CopyEngine;
use mirror_bot::executor::build_executor;
use mirror_market::activity::{ActivityClient, DATA_BASE};
use mirror_market::book::{BookCache, BookCacheConfig, CLOB_BASE};
use mirror_market::gamma::{resolve_source_wallet, GAMMA_BASE};
use mirror_market::ws::{MarketWsClient, MarketWsConfig};

/// CLI arguments. Mode and profile are picked first; the profile preset
/// fills the latency knobs and any explicitly-given flag overrides it.
#[derive(Parser, Debug)]
#[command(name = "mirror-bot")]
#[command(about = "Polymarket copy trader")]
#[command(version)]
struct Args {
    /// @pseudonym or 0x wallet to follow
    #[arg(long)]
    source: Option<String>,

    /// Simulate only, no live orders (default)
    #[arg(long)]
    paper: bool,

    /// Place real orders through the execution adapter
    #[arg(long, conflicts_with = "paper")]
    live: bool,

    /// Latency profile: fast or turbo
    #[arg(long, default_value = "fast")]
    profile: String,

    /// Sizing mode: percent or fixed
    #[arg(long)]
    size_mode: Option<String>,

    /// Your account balance reference (percent mode)
    #[arg(long)]
    my_balance_usdc: Option<f64>,

    /// Source account balance reference (percent mode)
    #[arg(long)]
    source_balance_usdc: Option<f64>,

    /// Fixed order notional in USDC (fixed mode)
    #[arg(long)]
    fixed_order_usdc: Option<f64>,

    /// Hard cap USDC per copied order (0 = disabled)
    #[arg(long)]
    max_order_usdc: Option<f64>,

    /// Minimum valid price
    #[arg(long)]
    min_price: Option<f64>,

    /// Maximum valid price
    #[arg(long)]
    max_price: Option<f64>,

    /// Reject trades older than this at receipt (milliseconds)
    #[arg(long)]
    max_lag_ms: Option<i64>,

    /// Reject when the top-of-book spread exceeds this
    #[arg(long)]
    max_spread: Option<f64>,

    /// Price increment past the opposite touch when crossing
    #[arg(long)]
    cross_tick: Option<f64>,

    /// Replay window for historical trades at startup (seconds)
    #[arg(long)]
    bootstrap_seconds: Option<u64>,

    /// Reconcile pull period (seconds, floored at 2)
    #[arg(long)]
    reconcile_seconds: Option<u64>,

    /// Items per activity pull on refresh
    #[arg(long)]
    trade_fetch_limit: Option<usize>,

    /// Ceiling on concurrent trade-processing tasks
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Per-asset cooldown between WS refresh triggers (milliseconds)
    #[arg(long)]
    min_asset_refresh_ms: Option<i64>,

    /// Debounce horizon for refresh triggers (milliseconds)
    #[arg(long)]
    refresh_debounce_ms: Option<i64>,

    /// Reuse the last activity payload within this window (milliseconds)
    #[arg(long)]
    activity_cache_ms: Option<i64>,

    /// Allow HTTP refresh of stale/missing books (true/false)
    #[arg(long)]
    book_http_fallback: Option<bool>,

    /// Book snapshot freshness horizon (milliseconds)
    #[arg(long)]
    book_ttl_ms: Option<i64>,

    /// Self-stop after this many seconds (0 = run until signalled)
    #[arg(long)]
    benchmark_seconds: Option<u64>,

    /// Emit a latency summary every N samples
    #[arg(long)]
    stats_every: Option<u64>,

    /// Live execution backend (python-bridge)
    #[arg(long)]
    live_exec: Option<String>,

    /// Order-placement bridge script path
    #[arg(long)]
    bridge_script: Option<PathBuf>,

    /// Interpreter for the bridge script
    #[arg(long)]
    bridge_python: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,
}

fn to_decimal(name: &str, value: f64) -> Result<Decimal> {
    Decimal::try_from(value).with_context(|| format!("--{name} is not a representable number"))
}

fn opt_decimal(name: &str, value: Option<f64>) -> Result<Option<Decimal>> {
    value.map(|v| to_decimal(name, v)).transpose()
}

fn build_config(args: &Args) -> Result<CopyConfig> {
    let mode = if args.live {
        TradeMode::Live
    } else {
        TradeMode::Paper
    };
    let Some(profile) = LatencyProfile::from_str(&args.profile) else {
        bail!("unknown profile '{}' (expected fast or turbo)", args.profile);
    };
    let size_mode = match &args.size_mode {
        Some(s) => match SizeMode::from_str(s) {
            Some(m) => Some(m),
            None => bail!("unknown size mode '{s}' (expected percent or fixed)"),
        },
        None => None,
    };

    let overrides = TuningOverrides {
        size_mode,
        my_balance_usdc: opt_decimal("my-balance-usdc", args.my_balance_usdc)?,
        source_balance_usdc: opt_decimal("source-balance-usdc", args.source_balance_usdc)?,
        fixed_order_usdc: opt_decimal("fixed-order-usdc", args.fixed_order_usdc)?,
        max_order_usdc: opt_decimal("max-order-usdc", args.max_order_usdc)?,
        min_price: opt_decimal("min-price", args.min_price)?,
        max_price: opt_decimal("max-price", args.max_price)?,
        max_lag_ms: args.max_lag_ms,
        max_spread: opt_decimal("max-spread", args.max_spread)?,
        cross_tick: opt_decimal("cross-tick", args.cross_tick)?,
        bootstrap_seconds: args.bootstrap_seconds,
        reconcile_seconds: args.reconcile_seconds,
        trade_fetch_limit: args.trade_fetch_limit,
        max_parallel: args.max_parallel,
        min_asset_refresh_ms: args.min_asset_refresh_ms,
        refresh_debounce_ms: args.refresh_debounce_ms,
        activity_cache_ms: args.activity_cache_ms,
        book_http_fallback: args.book_http_fallback,
        book_ttl_ms: args.book_ttl_ms,
        benchmark_seconds: args.benchmark_seconds,
        stats_every: args.stats_every,
        live_exec: args.live_exec.clone(),
        bridge_script: args.bridge_script.clone(),
        bridge_python: args.bridge_python.clone(),
        log_level: args.log_level.clone(),
    };

    let cfg = CopyConfig::build(args.source.clone(), mode, profile, &overrides);
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Adapter credentials may live in a .env; the core reads none of them.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let cfg = build_config(&args)?;

    let log_level = match cfg.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("failed to build HTTP client")?;

    let wallet = resolve_source_wallet(&http, GAMMA_BASE, &cfg.source)
        .await
        .context("identity resolution failed")?;
    info!(source = %cfg.source, wallet = %wallet, "source resolved");

    match cfg.size_mode {
        SizeMode::Percent => info!(
            mode = %cfg.mode,
            profile = %cfg.profile,
            sizing = %cfg.size_mode,
            scale = %cfg.percent_scale().round_dp(6),
            cap = %cfg.max_order_usdc,
            "configured"
        ),
        SizeMode::Fixed => info!(
            mode = %cfg.mode,
            profile = %cfg.profile,
            sizing = %cfg.size_mode,
            notional = %cfg.fixed_order_usdc,
            cap = %cfg.max_order_usdc,
            "configured"
        ),
    }

    let activity = Arc::new(ActivityClient::new(http.clone(), DATA_BASE, wallet.clone()));
    let books = Arc::new(BookCache::new(
        http.clone(),
        BookCacheConfig {
            ttl_ms: cfg.book_ttl_ms,
            http_fallback: cfg.book_http_fallback,
            base: CLOB_BASE.to_string(),
        },
    ));
    let executor = build_executor(&cfg);

    let engine = CopyEngine::new(cfg, wallet, activity, books, executor);
    engine.bootstrap().await?;

    // Market stream feeding the engine.
    let (ws_tx, ws_rx) = tokio::sync::mpsc::channel(10_000);
    let ws_client = MarketWsClient::new(MarketWsConfig::default(), ws_tx, engine.subscriptions());
    let ws_shutdown = engine.shutdown_signal();
    tokio::spawn(async move { ws_client.run(ws_shutdown).await });

    // Signal handler drives Running -> Stopping.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown().await {
                error!(error = %e, "shutdown signal handler error");
            }
            info!("shutdown requested");
            engine.request_stop();
        });
    }

    engine.run(ws_rx).await;
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = Args::try_parse_from(["mirror-bot", "--source", "@someone"]).unwrap();
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.mode, TradeMode::Paper);
        assert_eq!(cfg.profile, LatencyProfile::Fast);
        assert_eq!(cfg.size_mode, SizeMode::Percent);
        assert_eq!(cfg.refresh_debounce_ms, 250);
    }

    #[test]
    fn test_cli_live_switch() {
        let args = Args::try_parse_from(["mirror-bot", "--source", "0xabc", "--live"]).unwrap();
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.mode, TradeMode::Live);
    }

    #[test]
    fn test_cli_paper_and_live_conflict() {
        assert!(Args::try_parse_from(["mirror-bot", "--source", "0xabc", "--paper", "--live"])
            .is_err());
    }

    #[test]
    fn test_cli_turbo_profile_with_override() {
        let args = Args::try_parse_from([
            "mirror-bot",
            "--source",
            "@a",
            "--profile",
            "turbo",
            "--refresh-debounce-ms",
            "50",
        ])
        .unwrap();
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.refresh_debounce_ms, 50);
        assert_eq!(cfg.min_asset_refresh_ms, 150);
        assert!(!cfg.book_http_fallback);
    }

    #[test]
    fn test_cli_missing_source_fails_validation() {
        let args = Args::try_parse_from(["mirror-bot"]).unwrap();
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn test_cli_bad_profile() {
        let args =
            Args::try_parse_from(["mirror-bot", "--source", "@a", "--profile", "warp"]).unwrap();
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn test_cli_fixed_sizing() {
        let args = Args::try_parse_from([
            "mirror-bot",
            "--source",
            "@a",
            "--size-mode",
            "fixed",
            "--fixed-order-usdc",
            "2.5",
        ])
        .unwrap();
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.size_mode, SizeMode::Fixed);
        assert_eq!(cfg.fixed_order_usdc, Decimal::try_from(2.5).unwrap());
    }
}
