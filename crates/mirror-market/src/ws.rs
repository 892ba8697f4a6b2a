//! CLOB market-channel WebSocket client.
//!
//! Subscribes with the currently tracked asset set and forwards `book` and
//! `last_trade_price` events to the engine over an mpsc channel. The
//! tracked set arrives on a `watch` channel; every change re-sends a full
//! subscription frame, which also covers the connect-while-empty case
//! (connect, idle, subscribe once the first asset shows up).
//!
//! Reconnection is a fixed 3 second delay, no backoff. Malformed frames
//! are dropped silently.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mirror_common::{lenient_ts_ms, now_ms};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

/// Polymarket CLOB market WebSocket URL.
pub const CLOB_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Keepalive interval (the server drops quiet connections after ~10s).
const PING_INTERVAL: Duration = Duration::from_secs(9);

/// Candidate fields carrying the trade-ping timestamp; the first
/// non-empty one wins.
const TRADE_TS_FIELDS: &[&str] = &["timestamp", "ts", "created_at", "createdAt"];

#[derive(Debug, Error)]
pub enum MarketWsError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection timeout")]
    Timeout,

    #[error("stream ended unexpectedly")]
    StreamEnded,
}

/// Configuration for the market WebSocket client.
#[derive(Debug, Clone)]
pub struct MarketWsConfig {
    pub url: String,
    pub connect_timeout: Duration,
    /// Fixed delay before reconnecting after a drop.
    pub reconnect_delay: Duration,
}

impl Default for MarketWsConfig {
    fn default() -> Self {
        Self {
            url: CLOB_WS_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

/// Top-of-book update from a `book` frame.
#[derive(Debug, Clone)]
pub struct WsBook {
    pub asset_id: String,
    pub bids: Vec<Decimal>,
    pub asks: Vec<Decimal>,
    pub recv_ts_ms: i64,
}

/// A `last_trade_price` ping: something traded on this asset.
#[derive(Debug, Clone)]
pub struct TradePing {
    pub asset_id: String,
    /// Exchange-side event time, when the frame carried one.
    pub event_ts_ms: Option<i64>,
    /// Local clock at frame receipt.
    pub recv_ts_ms: i64,
}

/// Events emitted to the engine.
#[derive(Debug, Clone)]
pub enum MarketWsEvent {
    Book(WsBook),
    LastTradePrice(TradePing),
    Connected,
    Disconnected(String),
}

#[derive(Debug, Serialize)]
struct SubscribeFrame {
    assets_ids: Vec<String>,
    #[serde(rename = "type")]
    channel: &'static str,
}

#[derive(Debug, Deserialize)]
struct WsLevel {
    price: String,
}

#[derive(Debug, Deserialize)]
struct WsBookFrame {
    asset_id: String,
    #[serde(default)]
    bids: Vec<WsLevel>,
    #[serde(default)]
    asks: Vec<WsLevel>,
}

/// Market WebSocket client with automatic reconnection.
pub struct MarketWsClient {
    config: MarketWsConfig,
    event_tx: mpsc::Sender<MarketWsEvent>,
    assets: watch::Receiver<Vec<String>>,
}

impl MarketWsClient {
    pub fn new(
        config: MarketWsConfig,
        event_tx: mpsc::Sender<MarketWsEvent>,
        assets: watch::Receiver<Vec<String>>,
    ) -> Self {
        Self {
            config,
            event_tx,
            assets,
        }
    }

    /// Run until a shutdown signal arrives, reconnecting on every drop.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            if shutdown.try_recv().is_ok() {
                info!("market ws: shutdown signal received");
                return;
            }

            match self.run_session(&mut shutdown).await {
                Ok(()) => {
                    info!("market ws: clean shutdown");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, delay = ?self.config.reconnect_delay, "market ws dropped, reconnecting");
                    let _ = self
                        .event_tx
                        .send(MarketWsEvent::Disconnected(e.to_string()))
                        .await;

                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                        _ = shutdown.recv() => {
                            info!("market ws: shutdown during reconnect delay");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn run_session(
        &mut self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), MarketWsError> {
        info!(url = %self.config.url, "connecting to market websocket");

        let connect = timeout(self.config.connect_timeout, connect_async(&self.config.url)).await;
        let (ws_stream, _) = match connect {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => return Err(MarketWsError::Connection(e.to_string())),
            Err(_) => return Err(MarketWsError::Timeout),
        };

        info!("market websocket connected");
        let tx = self.event_tx.clone();
        let _ = tx.send(MarketWsEvent::Connected).await;

        let (mut write, mut read) = ws_stream.split();

        let tracked: Vec<String> = self.assets.borrow_and_update().clone();
        if tracked.is_empty() {
            debug!("no tracked assets yet, idling until the set grows");
        } else {
            send_subscribe(&mut write, tracked).await?;
        }

        let mut ping_timer = interval(PING_INTERVAL);
        let assets = &mut self.assets;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            for event in parse_market_frame(&text, now_ms()) {
                                if tx.send(event).await.is_err() {
                                    return Err(MarketWsError::StreamEnded);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "server closed the websocket");
                            return Err(MarketWsError::StreamEnded);
                        }
                        Some(Err(e)) => return Err(MarketWsError::WebSocket(e)),
                        None => return Err(MarketWsError::StreamEnded),
                        _ => {}
                    }
                }
                _ = ping_timer.tick() => {
                    write.send(Message::Text("PING".to_string())).await?;
                }
                changed = assets.changed() => {
                    if changed.is_err() {
                        // Engine went away; treat as shutdown.
                        return Ok(());
                    }
                    let tracked: Vec<String> = assets.borrow_and_update().clone();
                    if !tracked.is_empty() {
                        info!(assets = tracked.len(), "resubscribing with full tracked set");
                        send_subscribe(&mut write, tracked).await?;
                    }
                }
                _ = shutdown.recv() => {
                    info!("market ws: shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}

async fn send_subscribe<S>(write: &mut S, assets_ids: Vec<String>) -> Result<(), MarketWsError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let frame = SubscribeFrame {
        assets_ids,
        channel: "MARKET",
    };
    let text = serde_json::to_string(&frame)?;
    write.send(Message::Text(text)).await.map_err(Into::into)
}

/// Parse one text frame into zero or more events.
///
/// The server sends single objects or arrays of objects; anything that is
/// not JSON (e.g. `PONG`) or not a known event type is dropped.
fn parse_market_frame(text: &str, recv_ts_ms: i64) -> Vec<MarketWsEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            debug!("dropping non-JSON frame");
            return Vec::new();
        }
    };

    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| parse_market_event(v, recv_ts_ms))
            .collect(),
        v => parse_market_event(v, recv_ts_ms).into_iter().collect(),
    }
}

fn parse_market_event(value: Value, recv_ts_ms: i64) -> Option<MarketWsEvent> {
    let event_type = value.get("event_type").and_then(Value::as_str)?.to_string();
    match event_type.as_str() {
        "book" => {
            let frame: WsBookFrame = serde_json::from_value(value).ok()?;
            let bids = frame
                .bids
                .iter()
                .filter_map(|l| l.price.trim().parse().ok())
                .collect();
            let asks = frame
                .asks
                .iter()
                .filter_map(|l| l.price.trim().parse().ok())
                .collect();
            Some(MarketWsEvent::Book(WsBook {
                asset_id: frame.asset_id,
                bids,
                asks,
                recv_ts_ms,
            }))
        }
        "last_trade_price" => {
            let asset_id = value.get("asset_id").and_then(Value::as_str)?.to_string();
            let event_ts_ms = TRADE_TS_FIELDS
                .iter()
                .find_map(|field| value.get(*field).and_then(lenient_ts_ms));
            Some(MarketWsEvent::LastTradePrice(TradePing {
                asset_id,
                event_ts_ms,
                recv_ts_ms,
            }))
        }
        other => {
            debug!(event_type = other, "ignoring market event");
            None
        }
    }
}
