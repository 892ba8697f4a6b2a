//! The streaming replication pipeline.
//!
//! Two sources feed the engine: the market WebSocket (push) and the
//! activity HTTP feed (pull). `last_trade_price` pings request debounced
//! activity refreshes; a periodic reconcile loop backstops stream gaps
//! and discovers new assets; bootstrap suppresses history at startup.
//! Every unseen trade is dispatched through a counting semaphore into the
//! trade processor.

mod processor;
mod refresh;

pub use refresh::TriggerMeta;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;
use mirror_common::{now_ms, TradeItem};
use mirror_market::{ActivityFeed, BookCache, MarketWsEvent};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use crate::config::CopyConfig;
use crate::executor::Executor;
use crate::state::{EngineState, Phase};
use crate::telemetry::{EngineCounters, LatencyRecorder, LatencySample};
use refresh::RefreshState;

/// Items fetched for bootstrap and each reconcile pass.
const FULL_PAGE_LIMIT: usize = 100;

/// Everything shared between the engine's tasks.
pub(crate) struct EngineCore {
    pub cfg: CopyConfig,
    pub wallet: String,
    pub activity: Arc<dyn ActivityFeed>,
    pub books: Arc<BookCache>,
    pub executor: Arc<dyn Executor>,
    pub state: EngineState,
    pub counters: EngineCounters,
    pub telemetry: LatencyRecorder,
    refresh: Mutex<RefreshState>,
    permits: Arc<Semaphore>,
    /// Full tracked set, republished on growth; the WS client subscribes
    /// from it.
    assets_tx: watch::Sender<Vec<String>>,
    /// Per-asset clock of the last accepted WS trigger.
    last_ws_trigger: DashMap<String, i64>,
    shutdown_tx: broadcast::Sender<()>,
}

impl EngineCore {
    pub fn record_sample(&self, sample: LatencySample) {
        let count = self.telemetry.record(sample);
        if self.cfg.stats_every > 0 && count % self.cfg.stats_every == 0 {
            if let Some(summary) = self.telemetry.summary() {
                summary.log("rollup");
            }
        }
    }
}

/// Handle to the replication pipeline. Cheap to clone; every clone talks
/// to the same engine.
#[derive(Clone)]
pub struct CopyEngine {
    core: Arc<EngineCore>,
}

impl CopyEngine {
    pub fn new(
        cfg: CopyConfig,
        wallet: String,
        activity: Arc<dyn ActivityFeed>,
        books: Arc<BookCache>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let max_parallel = cfg.max_parallel;
        let (assets_tx, _) = watch::channel(Vec::new());
        let (shutdown_tx, _) = broadcast::channel(8);
        Self {
            core: Arc::new(EngineCore {
                cfg,
                wallet,
                activity,
                books,
                executor,
                state: EngineState::new(),
                counters: EngineCounters::default(),
                telemetry: LatencyRecorder::new(),
                refresh: Mutex::new(RefreshState::new()),
                permits: Arc::new(Semaphore::new(max_parallel)),
                assets_tx,
                last_ws_trigger: DashMap::new(),
                shutdown_tx,
            }),
        }
    }

    /// Watch of the full tracked asset set, for the WS client.
    pub fn subscriptions(&self) -> watch::Receiver<Vec<String>> {
        self.core.assets_tx.subscribe()
    }

    /// Shutdown signal receiver, for the WS client and auxiliary tasks.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.core.shutdown_tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.core.state.phase()
    }

    pub fn counters(&self) -> &EngineCounters {
        &self.core.counters
    }

    pub fn latency_summary(&self) -> Option<crate::telemetry::LatencySummary> {
        self.core.telemetry.summary()
    }

    pub fn tracked_assets(&self) -> Vec<String> {
        self.core.state.tracked_snapshot()
    }

    /// Request the `Running -> Stopping` transition (idempotent).
    pub fn request_stop(&self) {
        self.core.state.request_stop();
    }

    /// Seed the engine: mark recent history as seen, learn the asset set,
    /// and replay trades inside the bootstrap window exactly once.
    pub async fn bootstrap(&self) -> Result<()> {
        let items = self
            .core
            .activity
            .recent_trades(FULL_PAGE_LIMIT)
            .await
            .context("bootstrap activity fetch failed")?;

        let now = now_ms();
        let cutoff = now - (self.core.cfg.bootstrap_seconds as i64) * 1_000;
        let mut grew = false;
        let mut replayed = 0usize;

        // Feed is newest-first; replay oldest-first.
        for item in items.iter().rev() {
            if !item.asset.is_empty() {
                grew |= self.core.state.track(&item.asset);
            }
            if !self.core.state.mark_seen(item.dedup_key()) {
                continue;
            }
            // Suppress anything older than the bootstrap window; items
            // without a usable timestamp fall through to the processor's
            // own guards.
            if item.timestamp > 0 && item.timestamp < cutoff {
                continue;
            }
            self.spawn_process(
                item.clone(),
                "bootstrap",
                TriggerMeta::synthesized(item.timestamp, now),
            );
            replayed += 1;
        }

        if grew {
            self.publish_tracked();
        }

        info!(
            history = items.len(),
            replayed,
            tracked = self.core.state.tracked_len(),
            "bootstrap complete"
        );
        Ok(())
    }

    /// Run until stopped: consume WS events, drive the reconcile loop and
    /// the optional benchmark timer, then drain and report.
    pub async fn run(&self, mut ws_events: mpsc::Receiver<MarketWsEvent>) {
        self.core.state.set_phase(Phase::Running);
        info!(phase = %self.phase(), wallet = %self.core.wallet, "engine running");

        let reconcile = {
            let engine = self.clone();
            tokio::spawn(async move { engine.reconcile_loop().await })
        };

        if self.core.cfg.benchmark_seconds > 0 {
            let engine = self.clone();
            let secs = self.core.cfg.benchmark_seconds;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                info!(benchmark_seconds = secs, "benchmark window elapsed, stopping");
                engine.request_stop();
            });
        }

        loop {
            tokio::select! {
                event = ws_events.recv() => {
                    match event {
                        Some(event) => self.handle_ws_event(event),
                        // Stream task ended; nothing left to push.
                        None => break,
                    }
                }
                _ = self.core.state.wait_for_stop() => break,
            }
        }

        self.request_stop();
        let _ = self.core.shutdown_tx.send(());
        let _ = reconcile.await;

        self.drain().await;

        if let Some(summary) = self.core.telemetry.summary() {
            summary.log("final");
        }
        info!(
            dispatched = self.core.counters.dispatched(),
            copied = self.core.counters.copied(),
            skipped = self.core.counters.skipped(),
            "engine stopped"
        );
        self.core.state.set_phase(Phase::Stopped);
    }

    /// Wait (bounded) for in-flight trade tasks to finish.
    pub async fn drain(&self) {
        let all = self.core.cfg.max_parallel as u32;
        let _ = tokio::time::timeout(
            Duration::from_secs(10),
            self.core.permits.acquire_many(all),
        )
        .await;
        self.core.permits.close();
    }

    /// Route one WebSocket event.
    pub fn handle_ws_event(&self, event: MarketWsEvent) {
        match event {
            MarketWsEvent::Book(book) => {
                self.core
                    .books
                    .apply_levels(&book.asset_id, &book.bids, &book.asks, book.recv_ts_ms);
            }
            MarketWsEvent::LastTradePrice(ping) => {
                if !self.core.state.is_tracked(&ping.asset_id) {
                    debug!(asset = %ping.asset_id, "trade ping on untracked asset");
                    return;
                }
                let now = now_ms();
                let cooled = match self.core.last_ws_trigger.get(&ping.asset_id) {
                    Some(last) => now - *last >= self.core.cfg.min_asset_refresh_ms,
                    None => true,
                };
                if !cooled {
                    return;
                }
                self.core.last_ws_trigger.insert(ping.asset_id.clone(), now);
                self.request_activity_refresh(
                    &ping.asset_id,
                    TriggerMeta {
                        event_ts_ms: ping.event_ts_ms,
                        recv_ts_ms: ping.recv_ts_ms,
                    },
                );
            }
            MarketWsEvent::Connected => debug!("market stream connected"),
            MarketWsEvent::Disconnected(reason) => {
                debug!(reason, "market stream disconnected");
            }
        }
    }

    /// Enqueue a debounced activity refresh for `asset`.
    pub fn request_activity_refresh(&self, asset: &str, meta: TriggerMeta) {
        let delay = self.core.refresh.lock().on_trigger(
            asset,
            meta,
            now_ms(),
            self.core.cfg.refresh_debounce_ms,
        );
        if let Some(delay_ms) = delay {
            self.arm_refresh_timer(delay_ms);
        }
    }

    fn arm_refresh_timer(&self, delay_ms: i64) {
        let engine = self.clone();
        tokio::spawn(async move {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
            }
            if engine.core.state.is_stopping() {
                return;
            }
            engine.run_activity_refresh().await;
        });
    }

    /// One debounced refresh pass: at most one pull in flight; triggers
    /// landing mid-pull schedule exactly one follow-up.
    pub async fn run_activity_refresh(&self) {
        let focus = match self.core.refresh.lock().begin_pull() {
            Some(focus) => focus,
            // Another pull owns the feed; it will reschedule for us.
            None => return,
        };

        let items = self.fetch_activity_cached().await;
        self.consume_items(&items, "ws", &focus);

        let rearm = self
            .core
            .refresh
            .lock()
            .finish_pull(now_ms(), self.core.cfg.refresh_debounce_ms);
        if let Some(delay_ms) = rearm {
            self.arm_refresh_timer(delay_ms);
        }
    }

    /// Reuse the cached payload inside `activity_cache_ms`, else fetch.
    async fn fetch_activity_cached(&self) -> Vec<TradeItem> {
        let cached = self
            .core
            .refresh
            .lock()
            .cached_items(now_ms(), self.core.cfg.activity_cache_ms);
        if let Some(items) = cached {
            debug!(count = items.len(), "reusing cached activity payload");
            return items;
        }

        match self
            .core
            .activity
            .recent_trades(self.core.cfg.trade_fetch_limit)
            .await
        {
            Ok(items) => {
                self.core
                    .refresh
                    .lock()
                    .store_fetch(items.clone(), now_ms());
                items
            }
            Err(e) => {
                warn!(error = %e, "activity refresh fetch failed");
                Vec::new()
            }
        }
    }

    /// One reconcile pass: discover assets, dispatch unseen trades.
    pub async fn reconcile_once(&self) {
        let items = match self.core.activity.recent_trades(FULL_PAGE_LIMIT).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "reconcile activity fetch failed");
                return;
            }
        };

        let mut grew = false;
        for item in items.iter().rev() {
            if !item.asset.is_empty() {
                grew |= self.core.state.track(&item.asset);
            }
        }
        if grew {
            self.publish_tracked();
            info!(
                tracked = self.core.state.tracked_len(),
                "tracked set grew, resubscribing"
            );
        }

        self.consume_items(&items, "reconcile", &HashMap::new());
    }

    async fn reconcile_loop(&self) {
        let period = Duration::from_secs(self.core.cfg.reconcile_period_secs());
        let mut ticker = tokio::time::interval(period);
        // Bootstrap just pulled; skip the interval's immediate first tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.reconcile_once().await,
                _ = self.core.state.wait_for_stop() => {
                    debug!("reconcile loop stopping");
                    return;
                }
            }
        }
    }

    /// Dispatch every unseen item, oldest first, honoring the focus set.
    fn consume_items(
        &self,
        items: &[TradeItem],
        reason: &'static str,
        focus: &HashMap<String, TriggerMeta>,
    ) {
        for item in items.iter().rev() {
            if !focus.is_empty() && !focus.contains_key(&item.asset) {
                continue;
            }
            if !self.core.state.mark_seen(item.dedup_key()) {
                continue;
            }
            let meta = focus
                .get(&item.asset)
                .copied()
                .unwrap_or_else(|| TriggerMeta::synthesized(item.timestamp, now_ms()));
            self.spawn_process(item.clone(), reason, meta);
        }
    }

    /// Hand one trade to the processor behind the parallelism semaphore.
    fn spawn_process(&self, item: TradeItem, reason: &'static str, meta: TriggerMeta) {
        use std::sync::atomic::Ordering;
        self.core.counters.dispatched.fetch_add(1, Ordering::AcqRel);
        let engine = self.clone();
        tokio::spawn(async move {
            let permit = match engine.core.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                // Semaphore closed: shutting down, drop the trade.
                Err(_) => {
                    engine
                        .core
                        .counters
                        .completed
                        .fetch_add(1, Ordering::AcqRel);
                    return;
                }
            };
            processor::process_trade(&engine.core, &item, reason, meta).await;
            drop(permit);
        });
    }

    fn publish_tracked(&self) {
        let snapshot = self.core.state.tracked_snapshot();
        self.core.assets_tx.send_replace(snapshot);
    }
}
