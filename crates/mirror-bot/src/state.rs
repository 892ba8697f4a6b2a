//! Shared engine state: dedup set, tracked assets, lifecycle phase.
//!
//! All collections are safe for concurrent access; the hot-path checks
//! are a single `DashSet` probe or an atomic load.

use std::sync::atomic::{AtomicU8, Ordering};

use dashmap::DashSet;
use tokio::sync::Notify;

/// Lifecycle phase of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Starting,
            1 => Phase::Running,
            2 => Phase::Stopping,
            _ => Phase::Stopped,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Starting => write!(f, "starting"),
            Phase::Running => write!(f, "running"),
            Phase::Stopping => write!(f, "stopping"),
            Phase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Process-lifetime engine state.
#[derive(Debug, Default)]
pub struct EngineState {
    /// Trade identity keys already handled (at-most-once dispatch).
    seen: DashSet<String>,
    /// Token ids whose book and trades are of interest. Grows
    /// monotonically within a run.
    tracked: DashSet<String>,
    phase: AtomicU8,
    stop_notify: Notify,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a trade identity; `true` when it was not seen before.
    pub fn mark_seen(&self, key: String) -> bool {
        self.seen.insert(key)
    }

    pub fn is_seen(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    /// Add an asset to the tracked set; `true` when the set grew.
    pub fn track(&self, asset: &str) -> bool {
        self.tracked.insert(asset.to_string())
    }

    pub fn is_tracked(&self, asset: &str) -> bool {
        self.tracked.contains(asset)
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    /// Stable-ordered snapshot of the tracked set, for subscribe frames.
    pub fn tracked_snapshot(&self) -> Vec<String> {
        let mut assets: Vec<String> = self.tracked.iter().map(|a| a.key().clone()).collect();
        assets.sort();
        assets
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Move to `Stopping` (idempotent) and wake everything waiting on it.
    pub fn request_stop(&self) {
        let _ = self.phase.fetch_max(Phase::Stopping as u8, Ordering::AcqRel);
        self.stop_notify.notify_waiters();
    }

    pub fn is_stopping(&self) -> bool {
        self.phase() >= Phase::Stopping
    }

    /// Resolve once the phase reaches `Stopping`.
    pub async fn wait_for_stop(&self) {
        loop {
            if self.is_stopping() {
                return;
            }
            let notified = self.stop_notify.notified();
            if self.is_stopping() {
                return;
            }
            notified.await;
        }
    }
}
