//! Event-driven copy-trading engine for the Polymarket CLOB.
//!
//! Observes a source trader's activity and mirrors each eligible trade
//! onto the operator's account, scaled by a sizing rule and filtered by
//! market-risk guards (price band, staleness, spread).
//!
//! ## Architecture
//!
//! - **Push + pull fusion**: the WebSocket market stream triggers
//!   debounced pulls of the HTTP activity feed; a periodic reconcile loop
//!   backstops stream gaps and discovers new assets.
//! - **At-most-once dispatch**: a process-lifetime seen-set keyed on the
//!   trade identity tuple.
//! - **Bounded concurrency**: a counting semaphore is the sole
//!   parallelism gate for trade processing.
//!
//! ## Modules
//!
//! - `config`: options, latency profiles, validation
//! - `state`: seen/tracked sets and the lifecycle phase machine
//! - `engine`: bootstrap, reconcile, debounced refresh, trade processing
//! - `executor`: pluggable order-placement backends
//! - `telemetry`: per-stage latency samples and percentile rollups

pub mod config;
pub mod engine;
pub mod executor;
pub mod state;
pub mod telemetry;

pub use config::{CopyConfig, LatencyProfile, SizeMode, TradeMode, TuningOverrides};
pub use engine::{CopyEngine, TriggerMeta};
pub use executor::{build_executor, Executor, OrderAck, PythonBridgeExecutor};
pub use state::{EngineState, Phase};
pub use telemetry::{EngineCounters, LatencyRecorder, LatencySample, LatencySummary};
