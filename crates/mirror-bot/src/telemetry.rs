//! Per-trade latency telemetry.
//!
//! Each processed trade leaves a `LatencySample` with per-stage
//! timestamps; samples land in a fixed-capacity ring buffer and roll up
//! into percentile summaries every `stats_every` samples and once more at
//! shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::info;

/// Ring capacity for recent samples.
pub const RING_CAPACITY: usize = 5_000;

/// Per-stage timestamps for one processed trade, in epoch milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct LatencySample {
    /// Exchange-side event time, when known.
    pub event_ts_ms: Option<i64>,
    /// Local receipt of the trigger.
    pub recv_ts_ms: i64,
    /// Filters passed, order priced and sized.
    pub decision_ts_ms: i64,
    /// Handed to the execution adapter (equals decision in paper mode).
    pub submit_ts_ms: i64,
    /// Adapter acknowledged (or synthetic in paper mode).
    pub ack_ts_ms: i64,
}

impl LatencySample {
    /// Feed-to-receipt lag; zero when the event time is unknown.
    pub fn ingest_ms(&self) -> i64 {
        self.event_ts_ms
            .map(|e| self.recv_ts_ms - e)
            .unwrap_or(0)
    }

    pub fn decision_ms(&self) -> i64 {
        self.decision_ts_ms - self.recv_ts_ms
    }

    pub fn submit_ms(&self) -> i64 {
        self.submit_ts_ms - self.decision_ts_ms
    }

    pub fn ack_ms(&self) -> i64 {
        self.ack_ts_ms - self.submit_ts_ms
    }

    /// End-to-end: event (or receipt, when the event time is unknown) to ack.
    pub fn total_ms(&self) -> i64 {
        self.ack_ts_ms - self.event_ts_ms.unwrap_or(self.recv_ts_ms)
    }
}

/// Percentile rollup over the recorded samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    /// Samples recorded since startup (not just the ring contents).
    pub count: u64,
    pub total_p50_ms: i64,
    pub total_p90_ms: i64,
    pub total_p99_ms: i64,
    pub decision_p50_ms: i64,
    pub decision_p90_ms: i64,
    pub submit_p50_ms: i64,
    pub ack_p50_ms: i64,
}

impl LatencySummary {
    pub fn log(&self, label: &str) {
        info!(
            label,
            count = self.count,
            total_p50_ms = self.total_p50_ms,
            total_p90_ms = self.total_p90_ms,
            total_p99_ms = self.total_p99_ms,
            decision_p50_ms = self.decision_p50_ms,
            decision_p90_ms = self.decision_p90_ms,
            submit_p50_ms = self.submit_p50_ms,
            ack_p50_ms = self.ack_p50_ms,
            "latency summary"
        );
    }
}

/// Fixed-capacity circular buffer of samples.
struct Ring {
    buf: Vec<LatencySample>,
    next: usize,
}

impl Ring {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(RING_CAPACITY),
            next: 0,
        }
    }

    fn push(&mut self, sample: LatencySample) {
        if self.buf.len() < RING_CAPACITY {
            self.buf.push(sample);
        } else {
            self.buf[self.next] = sample;
        }
        self.next = (self.next + 1) % RING_CAPACITY;
    }
}

/// Pipeline counters, exposed for observability and drained-state checks.
#[derive(Debug, Default)]
pub struct EngineCounters {
    /// Trades handed to the processor.
    pub dispatched: AtomicU64,
    /// Processor runs finished (copied or rejected).
    pub completed: AtomicU64,
    /// Mirror orders emitted (paper intents or live submissions).
    pub copied: AtomicU64,
    /// Silent filter rejections.
    pub skipped: AtomicU64,
}

impl EngineCounters {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn copied(&self) -> u64 {
        self.copied.load(Ordering::Acquire)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Acquire)
    }
}

/// Collects latency samples and produces percentile rollups.
pub struct LatencyRecorder {
    ring: Mutex<Ring>,
    recorded: AtomicU64,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring::new()),
            recorded: AtomicU64::new(0),
        }
    }

    /// Record a sample; returns the running sample count.
    pub fn record(&self, sample: LatencySample) -> u64 {
        self.ring.lock().push(sample);
        self.recorded.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn count(&self) -> u64 {
        self.recorded.load(Ordering::Acquire)
    }

    /// Percentile rollup over the ring; `None` before the first sample.
    pub fn summary(&self) -> Option<LatencySummary> {
        let ring = self.ring.lock();
        if ring.buf.is_empty() {
            return None;
        }

        let mut total: Vec<i64> = ring.buf.iter().map(LatencySample::total_ms).collect();
        let mut decision: Vec<i64> = ring.buf.iter().map(LatencySample::decision_ms).collect();
        let mut submit: Vec<i64> = ring.buf.iter().map(LatencySample::submit_ms).collect();
        let mut ack: Vec<i64> = ring.buf.iter().map(LatencySample::ack_ms).collect();
        drop(ring);

        total.sort_unstable();
        decision.sort_unstable();
        submit.sort_unstable();
        ack.sort_unstable();

        Some(LatencySummary {
            count: self.count(),
            total_p50_ms: percentile(&total, 0.50),
            total_p90_ms: percentile(&total, 0.90),
            total_p99_ms: percentile(&total, 0.99),
            decision_p50_ms: percentile(&decision, 0.50),
            decision_p90_ms: percentile(&decision, 0.90),
            submit_p50_ms: percentile(&submit, 0.50),
            ack_p50_ms: percentile(&ack, 0.50),
        })
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[i64], q: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
