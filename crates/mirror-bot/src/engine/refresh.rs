//! Debounced activity-refresh state machine.
//!
//! WS trade pings do not pull the activity feed directly; they land here
//! and coalesce into one debounced pull. The machine is the explicit form
//! of `{timer_armed, in_flight, pending, last_fetched_at}` with
//! transitions at trigger, timer-fire, pull-start and pull-end. All
//! methods run under the engine's refresh lock; none block.

use std::collections::HashMap;

use mirror_common::TradeItem;

/// Latency attribution carried by a refresh trigger.
#[derive(Debug, Clone, Copy)]
pub struct TriggerMeta {
    /// Exchange-side event time, when the trigger carried one.
    pub event_ts_ms: Option<i64>,
    /// Local clock at trigger receipt.
    pub recv_ts_ms: i64,
}

impl TriggerMeta {
    /// Meta for items that arrived without a live trigger (bootstrap,
    /// reconcile, unfocused refresh rows): the item's own timestamp as the
    /// event time, observed now.
    pub fn synthesized(item_ts_ms: i64, now_ms: i64) -> Self {
        Self {
            event_ts_ms: (item_ts_ms > 0).then_some(item_ts_ms),
            recv_ts_ms: now_ms,
        }
    }
}

/// Last activity payload, reusable within `activity_cache_ms`.
#[derive(Debug, Clone)]
pub(crate) struct CachedActivity {
    pub fetched_at_ms: i64,
    pub items: Vec<TradeItem>,
}

/// State behind the engine's refresh lock.
#[derive(Debug, Default)]
pub(crate) struct RefreshState {
    /// Assets awaiting a pull, with the meta of their first trigger.
    pending: HashMap<String, TriggerMeta>,
    timer_armed: bool,
    in_flight: bool,
    last_fetch_ms: i64,
    cache: Option<CachedActivity>,
}

impl RefreshState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger transition. Records the asset (first meta wins) and, when
    /// no timer is armed yet, arms one and returns the delay to sleep:
    /// `max(0, debounce - (now - last_fetch))`.
    pub fn on_trigger(
        &mut self,
        asset: &str,
        meta: TriggerMeta,
        now_ms: i64,
        debounce_ms: i64,
    ) -> Option<i64> {
        self.pending.entry(asset.to_string()).or_insert(meta);
        if self.timer_armed {
            return None;
        }
        self.timer_armed = true;
        Some((debounce_ms - (now_ms - self.last_fetch_ms)).max(0))
    }

    /// Timer-fire transition. Returns the focus snapshot (pending set and
    /// metas, cleared atomically) when this caller owns the pull, or
    /// `None` when another pull is already in flight; the still-pending
    /// triggers then reschedule at that pull's end.
    pub fn begin_pull(&mut self) -> Option<HashMap<String, TriggerMeta>> {
        self.timer_armed = false;
        if self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(std::mem::take(&mut self.pending))
    }

    /// Pull-end transition. When triggers arrived mid-pull, re-arms the
    /// timer and returns the follow-up delay.
    pub fn finish_pull(&mut self, now_ms: i64, debounce_ms: i64) -> Option<i64> {
        self.in_flight = false;
        if self.pending.is_empty() || self.timer_armed {
            return None;
        }
        self.timer_armed = true;
        Some((debounce_ms - (now_ms - self.last_fetch_ms)).max(0))
    }

    /// The cached payload, when younger than `cache_ms`.
    pub fn cached_items(&self, now_ms: i64, cache_ms: i64) -> Option<Vec<TradeItem>> {
        self.cache.as_ref().and_then(|c| {
            (now_ms - c.fetched_at_ms <= cache_ms).then(|| c.items.clone())
        })
    }

    /// Store a fresh payload and stamp the fetch clock.
    pub fn store_fetch(&mut self, items: Vec<TradeItem>, now_ms: i64) {
        self.last_fetch_ms = now_ms;
        self.cache = Some(CachedActivity {
            fetched_at_ms: now_ms,
            items,
        });
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
