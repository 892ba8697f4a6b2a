//! End-to-end pipeline tests: scripted activity feed + pre-seeded book
//! cache + recording executor driving the real engine.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use mirror_bot::config::{CopyConfig, SizeMode, TradeMode};
use mirror_bot::engine::{CopyEngine, TriggerMeta};
use mirror_bot::executor::{Executor, OrderAck};
use mirror_common::{now_ms, Side, TradeItem};
use mirror_market::activity::{ActivityError, ActivityFeed};
use mirror_market::book::{BookCache, BookCacheConfig, CLOB_BASE};
use mirror_market::ws::{MarketWsEvent, TradePing, WsBook};

/// Activity feed returning a settable payload, newest first.
struct ScriptedFeed {
    items: Mutex<Vec<TradeItem>>,
    calls: AtomicU64,
}

impl ScriptedFeed {
    fn new(items: Vec<TradeItem>) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items),
            calls: AtomicU64::new(0),
        })
    }

    fn set(&self, items: Vec<TradeItem>) {
        *self.items.lock() = items;
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ActivityFeed for ScriptedFeed {
    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeItem>, ActivityError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        let mut items = self.items.lock().clone();
        items.truncate(limit);
        Ok(items)
    }
}

#[derive(Debug, Clone)]
struct RecordedOrder {
    token: String,
    side: Side,
    price: Decimal,
    shares: Decimal,
}

/// Executor that records every placement and acks success.
#[derive(Default)]
struct RecordingExecutor {
    orders: Mutex<Vec<RecordedOrder>>,
}

impl RecordingExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn orders(&self) -> Vec<RecordedOrder> {
        self.orders.lock().clone()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    fn name(&self) -> &str {
        "recording"
    }

    async fn place_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        shares: Decimal,
    ) -> OrderAck {
        self.orders.lock().push(RecordedOrder {
            token: token_id.to_string(),
            side,
            price,
            shares,
        });
        OrderAck {
            success: true,
            message: "ok".to_string(),
        }
    }
}

/// Executor tracking how many placements overlap in time.
struct GaugeExecutor {
    current: AtomicI64,
    max_seen: AtomicI64,
}

impl GaugeExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            current: AtomicI64::new(0),
            max_seen: AtomicI64::new(0),
        })
    }
}

#[async_trait]
impl Executor for GaugeExecutor {
    fn name(&self) -> &str {
        "gauge"
    }

    async fn place_order(
        &self,
        _token_id: &str,
        _side: Side,
        _price: Decimal,
        _shares: Decimal,
    ) -> OrderAck {
        let now = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_seen.fetch_max(now, Ordering::AcqRel);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::AcqRel);
        OrderAck {
            success: true,
            message: "ok".to_string(),
        }
    }
}

fn books() -> Arc<BookCache> {
    Arc::new(BookCache::new(
        reqwest::Client::new(),
        BookCacheConfig {
            ttl_ms: i64::MAX,
            http_fallback: false,
            base: CLOB_BASE.to_string(),
        },
    ))
}

fn live_cfg() -> CopyConfig {
    CopyConfig {
        source: "@source".into(),
        mode: TradeMode::Live,
        ..CopyConfig::default()
    }
}

fn trade(
    tx: &str,
    asset: &str,
    side: &str,
    ts_ms: i64,
    price: Decimal,
    size: Decimal,
    usdc: Decimal,
) -> TradeItem {
    TradeItem {
        transaction_hash: tx.into(),
        asset: asset.into(),
        side: side.into(),
        timestamp: ts_ms,
        price,
        size,
        usdc_size: usdc,
    }
}

fn engine_with(
    cfg: CopyConfig,
    feed: Arc<ScriptedFeed>,
    books: Arc<BookCache>,
    executor: Arc<dyn Executor>,
) -> CopyEngine {
    CopyEngine::new(cfg, "0xwallet".into(), feed, books, executor)
}

/// Wait until every dispatched trade has finished processing.
async fn quiesce(engine: &CopyEngine) {
    for _ in 0..400 {
        let counters = engine.counters();
        if counters.completed() == counters.dispatched() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("engine did not quiesce");
}

// ---------------------------------------------------------------------------
// S1: percent-sized BUY, fresh trade, tight book.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn percent_buy_fresh_is_mirrored() {
    let books = books();
    books.apply_levels("tok-a", &[dec!(0.50)], &[dec!(0.52)], now_ms());

    let feed = ScriptedFeed::new(vec![trade(
        "0x1",
        "tok-a",
        "BUY",
        now_ms() - 100,
        dec!(0.51),
        Decimal::ZERO,
        dec!(2000),
    )]);
    let exec = RecordingExecutor::new();
    let engine = engine_with(live_cfg(), feed, books, exec.clone());

    engine.bootstrap().await.unwrap();
    quiesce(&engine).await;

    let orders = exec.orders();
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.token, "tok-a");
    assert_eq!(order.side, Side::Buy);
    // px = min(0.99, bestAsk + crossTick) = 0.53
    assert_eq!(order.price, dec!(0.53));
    // copyUsdc = 2000 * (100 / 20000) = 10.00; shares = 10 / 0.53
    assert_eq!(order.shares.round_dp(4), dec!(18.8679));
    assert_eq!(engine.counters().copied(), 1);
}

// ---------------------------------------------------------------------------
// S2: wide spread is filtered out.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn wide_spread_is_rejected() {
    let books = books();
    books.apply_levels("tok-a", &[dec!(0.40)], &[dec!(0.60)], now_ms());

    let feed = ScriptedFeed::new(vec![trade(
        "0x1",
        "tok-a",
        "BUY",
        now_ms() - 100,
        dec!(0.51),
        Decimal::ZERO,
        dec!(2000),
    )]);
    let exec = RecordingExecutor::new();
    let engine = engine_with(live_cfg(), feed, books, exec.clone());

    engine.bootstrap().await.unwrap();
    quiesce(&engine).await;

    assert!(exec.orders().is_empty());
    assert_eq!(engine.counters().skipped(), 1);
}

// ---------------------------------------------------------------------------
// S3: stale event exceeds the lag bound.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn stale_trade_is_rejected() {
    let books = books();
    books.apply_levels("tok-a", &[dec!(0.50)], &[dec!(0.52)], now_ms());

    let feed = ScriptedFeed::new(vec![trade(
        "0x1",
        "tok-a",
        "BUY",
        now_ms() - 5_000,
        dec!(0.51),
        Decimal::ZERO,
        dec!(2000),
    )]);
    let exec = RecordingExecutor::new();
    let engine = engine_with(live_cfg(), feed, books, exec.clone());

    engine.bootstrap().await.unwrap();
    quiesce(&engine).await;

    assert!(exec.orders().is_empty());
    assert_eq!(engine.counters().skipped(), 1);
}

// ---------------------------------------------------------------------------
// S4: fixed-notional SELL crosses the bid; notional from size * px.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn fixed_sell_crosses_the_bid() {
    let books = books();
    books.apply_levels("tok-a", &[dec!(0.70)], &[dec!(0.72)], now_ms());

    let feed = ScriptedFeed::new(vec![trade(
        "0x1",
        "tok-a",
        "SELL",
        now_ms(),
        dec!(0.71),
        dec!(5),
        Decimal::ZERO,
    )]);
    let exec = RecordingExecutor::new();
    let cfg = CopyConfig {
        size_mode: SizeMode::Fixed,
        fixed_order_usdc: dec!(1.0),
        ..live_cfg()
    };
    let engine = engine_with(cfg, feed, books, exec.clone());

    engine.bootstrap().await.unwrap();
    quiesce(&engine).await;

    let orders = exec.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, Side::Sell);
    // px = max(0.01, bestBid - crossTick) = 0.69
    assert_eq!(orders[0].price, dec!(0.69));
    // shares = 1.0 / 0.69
    assert_eq!(orders[0].shares.round_dp(4), dec!(1.4493));
}

// ---------------------------------------------------------------------------
// Paper mode logs the intent and never touches the executor.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn paper_mode_skips_the_executor() {
    let books = books();
    books.apply_levels("tok-a", &[dec!(0.50)], &[dec!(0.52)], now_ms());

    let feed = ScriptedFeed::new(vec![trade(
        "0x1",
        "tok-a",
        "BUY",
        now_ms() - 100,
        dec!(0.51),
        Decimal::ZERO,
        dec!(2000),
    )]);
    let exec = RecordingExecutor::new();
    let cfg = CopyConfig {
        mode: TradeMode::Paper,
        ..live_cfg()
    };
    let engine = engine_with(cfg, feed, books, exec.clone());

    engine.bootstrap().await.unwrap();
    quiesce(&engine).await;

    assert!(exec.orders().is_empty());
    assert_eq!(engine.counters().copied(), 1);
    let summary = engine.latency_summary().unwrap();
    assert_eq!(summary.count, 1);
}

// ---------------------------------------------------------------------------
// S5: one identity across bootstrap, reconcile, and a WS-triggered
// refresh dispatches exactly once.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn dedup_across_sources() {
    let books = books();
    books.apply_levels("tok-a", &[dec!(0.50)], &[dec!(0.52)], now_ms());

    let item = trade(
        "0x1",
        "tok-a",
        "BUY",
        now_ms() - 50,
        dec!(0.51),
        Decimal::ZERO,
        dec!(2000),
    );
    let feed = ScriptedFeed::new(vec![item]);
    let exec = RecordingExecutor::new();
    let engine = engine_with(live_cfg(), feed.clone(), books, exec.clone());

    engine.bootstrap().await.unwrap();
    quiesce(&engine).await;
    assert_eq!(exec.orders().len(), 1);

    // Reconcile returns the same payload.
    engine.reconcile_once().await;
    quiesce(&engine).await;
    assert_eq!(exec.orders().len(), 1);

    // A WS trigger pulls the same payload again.
    engine.request_activity_refresh(
        "tok-a",
        TriggerMeta {
            event_ts_ms: Some(now_ms()),
            recv_ts_ms: now_ms(),
        },
    );
    engine.run_activity_refresh().await;
    quiesce(&engine).await;

    assert_eq!(exec.orders().len(), 1);
    assert_eq!(engine.counters().dispatched(), 1);
}

// ---------------------------------------------------------------------------
// S6: a new asset discovered by reconcile joins the tracked set and the
// published subscription snapshot.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn asset_expansion_resubscribes() {
    let books = books();
    books.apply_levels("tok-a", &[dec!(0.50)], &[dec!(0.52)], now_ms());
    books.apply_levels("tok-b", &[dec!(0.30)], &[dec!(0.32)], now_ms());

    let feed = ScriptedFeed::new(vec![trade(
        "0x1",
        "tok-a",
        "BUY",
        now_ms() - 50,
        dec!(0.51),
        Decimal::ZERO,
        dec!(100),
    )]);
    let exec = RecordingExecutor::new();
    let engine = engine_with(live_cfg(), feed.clone(), books, exec.clone());
    let subscriptions = engine.subscriptions();

    engine.bootstrap().await.unwrap();
    quiesce(&engine).await;
    assert_eq!(engine.tracked_assets(), vec!["tok-a".to_string()]);

    // The source trades a new asset.
    feed.set(vec![
        trade(
            "0x2",
            "tok-b",
            "BUY",
            now_ms() - 50,
            dec!(0.31),
            Decimal::ZERO,
            dec!(100),
        ),
        trade(
            "0x1",
            "tok-a",
            "BUY",
            now_ms() - 50,
            dec!(0.51),
            Decimal::ZERO,
            dec!(100),
        ),
    ]);
    engine.reconcile_once().await;
    quiesce(&engine).await;

    assert_eq!(
        engine.tracked_assets(),
        vec!["tok-a".to_string(), "tok-b".to_string()]
    );
    let published: Vec<String> = subscriptions.borrow().clone();
    assert_eq!(published, vec!["tok-a".to_string(), "tok-b".to_string()]);
    // The unseen tok-b trade was mirrored.
    assert_eq!(exec.orders().len(), 2);
}

// ---------------------------------------------------------------------------
// A storm of triggers across assets coalesces into one activity pull.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn trigger_storm_coalesces_into_one_pull() {
    let books = books();
    let feed = ScriptedFeed::new(Vec::new());
    let exec = RecordingExecutor::new();
    let cfg = CopyConfig {
        refresh_debounce_ms: 30,
        ..live_cfg()
    };
    let engine = engine_with(cfg, feed.clone(), books, exec);

    let meta = TriggerMeta {
        event_ts_ms: Some(now_ms()),
        recv_ts_ms: now_ms(),
    };
    for asset in ["a", "b", "c", "d"] {
        engine.request_activity_refresh(asset, meta);
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(feed.calls(), 1);
}

// ---------------------------------------------------------------------------
// Per-asset cooldown suppresses immediate re-triggers from the stream.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn ws_trigger_cooldown() {
    let books = books();
    books.apply_levels("tok-a", &[dec!(0.50)], &[dec!(0.52)], now_ms());

    let feed = ScriptedFeed::new(vec![trade(
        "0x1",
        "tok-a",
        "BUY",
        now_ms() - 50,
        dec!(0.51),
        Decimal::ZERO,
        dec!(100),
    )]);
    let exec = RecordingExecutor::new();
    let cfg = CopyConfig {
        refresh_debounce_ms: 20,
        min_asset_refresh_ms: 60_000,
        ..live_cfg()
    };
    let engine = engine_with(cfg, feed.clone(), books, exec);
    engine.bootstrap().await.unwrap();
    quiesce(&engine).await;
    let after_bootstrap = feed.calls();

    let ping = |ts: i64| {
        MarketWsEvent::LastTradePrice(TradePing {
            asset_id: "tok-a".to_string(),
            event_ts_ms: Some(ts),
            recv_ts_ms: ts,
        })
    };
    engine.handle_ws_event(ping(now_ms()));
    engine.handle_ws_event(ping(now_ms()));

    tokio::time::sleep(Duration::from_millis(150)).await;
    // Two pings inside the cooldown produced a single refresh pull.
    assert_eq!(feed.calls(), after_bootstrap + 1);
}

// ---------------------------------------------------------------------------
// Book events from the stream land in the cache unmodified.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn ws_book_event_updates_cache() {
    let books = books();
    let feed = ScriptedFeed::new(Vec::new());
    let exec = RecordingExecutor::new();
    let engine = engine_with(live_cfg(), feed, books.clone(), exec);

    let at = now_ms();
    engine.handle_ws_event(MarketWsEvent::Book(WsBook {
        asset_id: "tok-a".to_string(),
        bids: vec![dec!(0.48), dec!(0.50)],
        asks: vec![dec!(0.52), dec!(0.55)],
        recv_ts_ms: at,
    }));

    let top = books.top_of_book("tok-a").await;
    assert_eq!(top.best_bid, Some(dec!(0.50)));
    assert_eq!(top.best_ask, Some(dec!(0.52)));
    assert_eq!(top.updated_at_ms, at);
}

// ---------------------------------------------------------------------------
// In-flight processing never exceeds max_parallel.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn parallelism_is_bounded() {
    let books = books();
    let now = now_ms();
    let mut items = Vec::new();
    for i in 0..20 {
        let asset = format!("tok-{i}");
        books.apply_levels(&asset, &[dec!(0.50)], &[dec!(0.52)], now);
        items.push(trade(
            &format!("0x{i}"),
            &asset,
            "BUY",
            now - 50,
            dec!(0.51),
            Decimal::ZERO,
            dec!(2000),
        ));
    }

    let feed = ScriptedFeed::new(items);
    let exec = GaugeExecutor::new();
    let cfg = CopyConfig {
        max_parallel: 3,
        ..live_cfg()
    };
    let engine = engine_with(cfg, feed, books, exec.clone());

    engine.bootstrap().await.unwrap();
    quiesce(&engine).await;

    assert_eq!(engine.counters().copied(), 20);
    let max_seen = exec.max_seen.load(Ordering::Acquire);
    assert!(max_seen <= 3, "saw {max_seen} concurrent placements");
    assert!(max_seen >= 1);
}

// ---------------------------------------------------------------------------
// Bootstrap suppresses history older than the window but still marks it
// seen, so later pulls cannot replay it.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn bootstrap_window_suppresses_history() {
    let books = books();
    books.apply_levels("tok-a", &[dec!(0.50)], &[dec!(0.52)], now_ms());

    let old = trade(
        "0xold",
        "tok-a",
        "BUY",
        now_ms() - 600_000,
        dec!(0.51),
        Decimal::ZERO,
        dec!(2000),
    );
    let feed = ScriptedFeed::new(vec![old]);
    let exec = RecordingExecutor::new();
    let engine = engine_with(live_cfg(), feed.clone(), books, exec.clone());

    engine.bootstrap().await.unwrap();
    quiesce(&engine).await;
    // Suppressed: never handed to the processor at all.
    assert_eq!(engine.counters().dispatched(), 0);

    // The reconcile loop sees the same item again; it stays suppressed.
    engine.reconcile_once().await;
    quiesce(&engine).await;
    assert!(exec.orders().is_empty());
    // But the asset was still learned for subscriptions.
    assert_eq!(engine.tracked_assets(), vec!["tok-a".to_string()]);
}
