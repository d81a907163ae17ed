// =============================================================================
// Order Book Manager — Level-2 books behind the order-book snapshot capability
// =============================================================================
//
// Bybit pushes one `snapshot` frame followed by `delta` frames per symbol.
// A delta level with size 0 deletes that price.  Volume alerts may attach a
// summary of the current book; a symbol with no book yet answers `None`.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::market_data::kline_stream::{parse_string_f64, subscribe_frame, BYBIT_PUBLIC_LINEAR_WS};
use crate::providers::OrderBookSource;

/// Depth subscribed per symbol.
const DEPTH: usize = 50;

/// Levels of each side copied into a snapshot.
const SNAPSHOT_LEVELS: usize = 5;

/// Summary of one symbol's book at alert time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub spread_bps: f64,
    /// (bid_depth - ask_depth) / total, in [-1, 1].
    pub imbalance: f64,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub update_id: u64,
}

/// Price levels of one side, best first.
#[derive(Debug, Default, Clone)]
struct Book {
    bids: Vec<(f64, f64)>,
    asks: Vec<(f64, f64)>,
    update_id: u64,
}

impl Book {
    fn apply(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)], update_id: u64) {
        apply_side(&mut self.bids, bids, |a, b| b.total_cmp(&a));
        apply_side(&mut self.asks, asks, |a, b| a.total_cmp(&b));
        self.update_id = update_id;
    }

    fn snapshot(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        let (best_bid, _) = *self.bids.first()?;
        let (best_ask, _) = *self.asks.first()?;

        let mid = (best_bid + best_ask) / 2.0;
        let spread_bps = if mid > 0.0 {
            ((best_ask - best_bid) / mid) * 10_000.0
        } else {
            0.0
        };

        let bid_depth: f64 = self.bids.iter().map(|(_, q)| q).sum();
        let ask_depth: f64 = self.asks.iter().map(|(_, q)| q).sum();
        let total_depth = bid_depth + ask_depth;
        let imbalance = if total_depth > 0.0 {
            (bid_depth - ask_depth) / total_depth
        } else {
            0.0
        };

        Some(OrderBookSnapshot {
            symbol: symbol.to_string(),
            best_bid,
            best_ask,
            bid_depth,
            ask_depth,
            spread_bps,
            imbalance,
            bids: self.bids.iter().take(SNAPSHOT_LEVELS).copied().collect(),
            asks: self.asks.iter().take(SNAPSHOT_LEVELS).copied().collect(),
            update_id: self.update_id,
        })
    }
}

/// Upsert / delete levels and keep the side sorted best-first.
fn apply_side(side: &mut Vec<(f64, f64)>, changes: &[(f64, f64)], order: impl Fn(f64, f64) -> std::cmp::Ordering) {
    for &(price, qty) in changes {
        let existing = side.iter().position(|(p, _)| *p == price);
        match (existing, qty > 0.0) {
            (Some(idx), true) => side[idx].1 = qty,
            (Some(idx), false) => {
                side.remove(idx);
            }
            (None, true) => side.push((price, qty)),
            (None, false) => {}
        }
    }
    side.sort_by(|a, b| order(a.0, b.0));
    side.truncate(DEPTH);
}

/// Manages orderbook state for multiple symbols.
pub struct OrderBookManager {
    books: RwLock<HashMap<String, Book>>,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Replace a symbol's book entirely.
    pub fn apply_snapshot(&self, symbol: &str, bids: &[(f64, f64)], asks: &[(f64, f64)], update_id: u64) {
        let mut book = Book::default();
        book.apply(bids, asks, update_id);
        self.books.write().insert(symbol.to_string(), book);
    }

    /// Apply incremental changes. Deltas for an unknown symbol are dropped
    /// until its snapshot arrives.
    pub fn apply_delta(&self, symbol: &str, bids: &[(f64, f64)], asks: &[(f64, f64)], update_id: u64) {
        if let Some(book) = self.books.write().get_mut(symbol) {
            book.apply(bids, asks, update_id);
        }
    }

    /// Current summary for a symbol.
    pub fn get(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        self.books.read().get(symbol).and_then(|b| b.snapshot(symbol))
    }
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderBookSource for OrderBookManager {
    async fn snapshot(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        self.get(symbol)
    }
}

// ---------------------------------------------------------------------------
// Depth WebSocket stream
// ---------------------------------------------------------------------------

/// A parsed depth frame.
#[derive(Debug, PartialEq)]
pub struct DepthUpdate {
    pub symbol: String,
    pub is_snapshot: bool,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub update_id: u64,
}

fn parse_levels(val: &serde_json::Value, name: &str) -> Result<Vec<(f64, f64)>> {
    val.as_array()
        .with_context(|| format!("missing field {name}"))?
        .iter()
        .map(|lvl| Ok((parse_string_f64(&lvl[0], name)?, parse_string_f64(&lvl[1], name)?)))
        .collect()
}

/// Parse a Bybit `orderbook.N.SYMBOL` frame. Control frames yield `None`.
///
/// Expected shape:
/// ```json
/// { "topic": "orderbook.50.BTCUSDT", "type": "snapshot",
///   "data": { "s": "BTCUSDT", "b": [["37000.0", "1.5"]], "a": [["37001.0", "1.2"]], "u": 18521288 } }
/// ```
pub fn parse_depth_message(text: &str) -> Result<Option<DepthUpdate>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse depth JSON")?;

    match root.get("topic").and_then(|t| t.as_str()) {
        Some(topic) if topic.starts_with("orderbook.") => {}
        _ => return Ok(None),
    }

    let data = &root["data"];
    let symbol = data["s"].as_str().context("missing field data.s")?.to_uppercase();
    let is_snapshot = root["type"].as_str() == Some("snapshot");

    Ok(Some(DepthUpdate {
        symbol,
        is_snapshot,
        bids: parse_levels(&data["b"], "b")?,
        asks: parse_levels(&data["a"], "a")?,
        update_id: data["u"].as_u64().context("missing field data.u")?,
    }))
}

/// Connect to the Bybit depth stream for `symbols` and feed `manager`.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller (main.rs) can handle reconnection.
pub async fn run_depth_stream(symbols: &[String], manager: &Arc<OrderBookManager>) -> Result<()> {
    info!(url = BYBIT_PUBLIC_LINEAR_WS, symbols = ?symbols, "connecting to depth WebSocket");

    let (ws_stream, _response) = connect_async(BYBIT_PUBLIC_LINEAR_WS)
        .await
        .context("failed to connect to depth WebSocket")?;

    let (mut write, mut read) = ws_stream.split();
    write
        .send(Message::Text(subscribe_frame(symbols, &format!("orderbook.{DEPTH}"))))
        .await
        .context("failed to send depth subscription")?;
    info!("depth WebSocket connected and subscribed");

    let mut ping = interval(Duration::from_secs(20));

    loop {
        tokio::select! {
            _ = ping.tick() => {
                let frame = serde_json::json!({ "op": "ping" }).to_string();
                write.send(Message::Text(frame)).await.context("failed to send ping")?;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_depth_message(&text) {
                    Ok(Some(update)) if update.is_snapshot => manager.apply_snapshot(
                        &update.symbol, &update.bids, &update.asks, update.update_id,
                    ),
                    Ok(Some(update)) => manager.apply_delta(
                        &update.symbol, &update.bids, &update.asks, update.update_id,
                    ),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "failed to parse depth message"),
                },
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "depth WebSocket read error");
                    return Err(e.into());
                }
                None => {
                    warn!("depth WebSocket stream ended");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_then_delta() {
        let m = OrderBookManager::new();
        assert!(m.get("BTCUSDT").is_none());

        m.apply_snapshot(
            "BTCUSDT",
            &[(99.0, 2.0), (100.0, 1.0)],
            &[(101.0, 1.0), (102.0, 3.0)],
            1,
        );
        let s = m.get("BTCUSDT").unwrap();
        assert_eq!(s.best_bid, 100.0);
        assert_eq!(s.best_ask, 101.0);
        assert!((s.bid_depth - 3.0).abs() < 1e-9);
        assert!((s.ask_depth - 4.0).abs() < 1e-9);

        // Remove the best bid, add a better ask.
        m.apply_delta("BTCUSDT", &[(100.0, 0.0)], &[(100.5, 2.0)], 2);
        let s = m.get("BTCUSDT").unwrap();
        assert_eq!(s.best_bid, 99.0);
        assert_eq!(s.best_ask, 100.5);
        assert_eq!(s.update_id, 2);
    }

    #[test]
    fn delta_before_snapshot_is_dropped() {
        let m = OrderBookManager::new();
        m.apply_delta("ETHUSDT", &[(1.0, 1.0)], &[(2.0, 1.0)], 1);
        assert!(m.get("ETHUSDT").is_none());
    }

    #[test]
    fn parse_depth_snapshot() {
        let json = r#"{
            "topic": "orderbook.50.BTCUSDT",
            "type": "snapshot",
            "ts": 1700000000000,
            "data": { "s": "BTCUSDT", "b": [["37000.0", "1.5"]], "a": [["37001.0", "1.2"]], "u": 7 }
        }"#;
        let u = parse_depth_message(json).unwrap().unwrap();
        assert!(u.is_snapshot);
        assert_eq!(u.bids, vec![(37000.0, 1.5)]);
        assert_eq!(u.update_id, 7);

        assert!(parse_depth_message(r#"{"op":"ping","success":true}"#).unwrap().is_none());
    }
}
