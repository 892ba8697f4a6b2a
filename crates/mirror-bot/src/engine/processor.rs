//! Trade processor: filter, price, size, dispatch.
//!
//! Every failed step is a silent reject (debug log, skip counter), never
//! an error. A trade only reaches the executor after passing the full
//! chain: side/asset validation, price band, staleness, spread, crossing
//! price, and positive sizing.

use std::sync::atomic::Ordering;

use mirror_common::{now_ms, Side, TradeItem};
use mirror_market::TopOfBook;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};

use super::{EngineCore, TriggerMeta};
use crate::config::{CopyConfig, SizeMode, TradeMode};
use crate::telemetry::LatencySample;

/// Mirror-order price: cross the opposite touch by `cross_tick`, clamp to
/// the configured band, round to the 0.01 tick.
pub(crate) fn price_mirror_order(side: Side, top: &TopOfBook, cfg: &CopyConfig) -> Option<Decimal> {
    let crossed = match side {
        Side::Buy => (top.best_ask? + cfg.cross_tick).min(cfg.max_price),
        Side::Sell => (top.best_bid? - cfg.cross_tick).max(cfg.min_price),
    };
    let clamped = crossed.clamp(cfg.min_price, cfg.max_price);
    Some(clamped.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Source notional: the feed's USDC size when present, else shares times
/// the mirror price.
pub(crate) fn source_notional(item: &TradeItem, px: Decimal) -> Option<Decimal> {
    if item.usdc_size > Decimal::ZERO {
        return Some(item.usdc_size);
    }
    if item.size > Decimal::ZERO {
        return Some(item.size * px);
    }
    None
}

/// Copy notional under the configured sizing rule and hard cap.
pub(crate) fn copy_notional(cfg: &CopyConfig, src_usdc: Decimal) -> Option<Decimal> {
    let mut order_usdc = match cfg.size_mode {
        SizeMode::Percent => src_usdc * cfg.percent_scale(),
        SizeMode::Fixed => cfg.fixed_order_usdc,
    };
    if cfg.max_order_usdc > Decimal::ZERO {
        order_usdc = order_usdc.min(cfg.max_order_usdc);
    }
    (order_usdc > Decimal::ZERO).then_some(order_usdc)
}

fn short(token: &str) -> &str {
    &token[..token.len().min(14)]
}

/// Run one trade through the pipeline. Called with a parallelism permit
/// held; at most `max_parallel` of these run at once.
pub(crate) async fn process_trade(
    core: &EngineCore,
    item: &TradeItem,
    reason: &'static str,
    meta: TriggerMeta,
) {
    let outcome = process_inner(core, item, reason, meta).await;
    core.counters.completed.fetch_add(1, Ordering::AcqRel);
    match outcome {
        Outcome::Copied => {
            core.counters.copied.fetch_add(1, Ordering::AcqRel);
        }
        Outcome::Skipped(stage) => {
            core.counters.skipped.fetch_add(1, Ordering::AcqRel);
            debug!(reason, stage, token = short(&item.asset), "trade rejected");
        }
    }
}

enum Outcome {
    Copied,
    Skipped(&'static str),
}

async fn process_inner(
    core: &EngineCore,
    item: &TradeItem,
    reason: &'static str,
    meta: TriggerMeta,
) -> Outcome {
    let cfg = &core.cfg;

    let Some(side) = Side::parse(&item.side) else {
        return Outcome::Skipped("side");
    };
    if item.asset.is_empty() {
        return Outcome::Skipped("asset");
    }

    let src_px = item.price;
    if src_px < cfg.min_price || src_px > cfg.max_price {
        return Outcome::Skipped("price_band");
    }

    let lag_ms = meta
        .event_ts_ms
        .map(|event| meta.recv_ts_ms - event)
        .unwrap_or(0);
    if meta.event_ts_ms.is_some() && lag_ms > cfg.max_lag_ms {
        return Outcome::Skipped("lag");
    }

    let top = core.books.top_of_book(&item.asset).await;
    let spread = top.spread();
    if let Some(sp) = spread {
        if sp > cfg.max_spread {
            return Outcome::Skipped("spread");
        }
    }

    let Some(px) = price_mirror_order(side, &top, cfg) else {
        return Outcome::Skipped("top_of_book");
    };

    let Some(src_usdc) = source_notional(item, px) else {
        return Outcome::Skipped("src_notional");
    };

    let Some(copy_usdc) = copy_notional(cfg, src_usdc) else {
        return Outcome::Skipped("sizing");
    };

    let shares = copy_usdc / px;
    let decision_ts = now_ms();

    match cfg.mode {
        TradeMode::Paper => {
            let sample = LatencySample {
                event_ts_ms: meta.event_ts_ms,
                recv_ts_ms: meta.recv_ts_ms,
                decision_ts_ms: decision_ts,
                submit_ts_ms: decision_ts,
                ack_ts_ms: now_ms(),
            };
            info!(
                reason,
                side = %side,
                token = short(&item.asset),
                px = %px,
                src_px = %src_px,
                src_usdc = %src_usdc.round_dp(2),
                copy_usdc = %copy_usdc.round_dp(2),
                shares = %shares.round_dp(4),
                lag_ms,
                spread = ?spread,
                decision_ms = sample.decision_ms(),
                total_ms = sample.total_ms(),
                "[PAPER COPY]"
            );
            core.record_sample(sample);
        }
        TradeMode::Live => {
            let submit_ts = now_ms();
            let ack = core
                .executor
                .place_order(&item.asset, side, px, shares)
                .await;
            let ack_ts = now_ms();
            let sample = LatencySample {
                event_ts_ms: meta.event_ts_ms,
                recv_ts_ms: meta.recv_ts_ms,
                decision_ts_ms: decision_ts,
                submit_ts_ms: submit_ts,
                ack_ts_ms: ack_ts,
            };
            if ack.success {
                info!(
                    reason,
                    side = %side,
                    token = short(&item.asset),
                    px = %px,
                    src_px = %src_px,
                    src_usdc = %src_usdc.round_dp(2),
                    copy_usdc = %copy_usdc.round_dp(2),
                    shares = %shares.round_dp(4),
                    lag_ms,
                    spread = ?spread,
                    submit_ms = sample.submit_ms(),
                    ack_ms = sample.ack_ms(),
                    total_ms = sample.total_ms(),
                    "[LIVE OK]"
                );
            } else {
                warn!(
                    reason,
                    side = %side,
                    token = short(&item.asset),
                    px = %px,
                    shares = %shares.round_dp(4),
                    message = %ack.message,
                    "[LIVE FAIL]"
                );
            }
            core.record_sample(sample);
        }
    }

    Outcome::Copied
}
