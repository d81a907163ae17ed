use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::clock::Clock;
use crate::providers::HistoricalDataProvider;
use crate::types::{Candle, DirectionMode};

// ---------------------------------------------------------------------------
// CandleStore -- bounded per-symbol history of confirmed candles
// ---------------------------------------------------------------------------

/// Thread-safe store of the most recent confirmed candles per symbol, ordered
/// by bucket start.  Writes are upserts keyed by `start_time`, so a replayed
/// or backfilled candle replaces the stored one instead of duplicating it.
///
/// Serves as the in-process [`HistoricalDataProvider`].
pub struct CandleStore {
    series: RwLock<HashMap<String, VecDeque<Candle>>>,
    max_candles: usize,
    clock: Arc<dyn Clock>,
}

impl CandleStore {
    /// Create a store that retains at most `max_candles` confirmed candles per
    /// symbol.
    pub fn new(max_candles: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            max_candles: max_candles.max(1),
            clock,
        }
    }

    /// Record a candle. Unconfirmed candles are ignored.
    pub fn record(&self, candle: &Candle) {
        if !candle.confirmed {
            return;
        }
        let mut map = self.series.write();
        let ring = map
            .entry(candle.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));
        upsert(ring, candle.clone());
        while ring.len() > self.max_candles {
            ring.pop_front();
        }
    }

    /// Record a batch of historical candles (any order).
    pub fn record_all(&self, candles: &[Candle]) {
        for candle in candles {
            self.record(candle);
        }
    }

    /// Return the most recent `count` candles for `symbol` (oldest-first).
    pub fn latest(&self, symbol: &str, count: usize) -> Vec<Candle> {
        let map = self.series.read();
        match map.get(symbol) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Quote volumes of candles whose bucket starts in `[from_ms, to_ms)`.
    pub fn quote_volumes_between(
        &self,
        symbol: &str,
        from_ms: i64,
        to_ms: i64,
        mode: DirectionMode,
    ) -> Vec<f64> {
        let map = self.series.read();
        map.get(symbol)
            .map(|ring| {
                ring.iter()
                    .filter(|c| c.start_time >= from_ms && c.start_time < to_ms)
                    .filter(|c| mode.matches(c))
                    .map(Candle::quote_volume)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of stored candles for a symbol.
    pub fn count(&self, symbol: &str) -> usize {
        self.series.read().get(symbol).map_or(0, VecDeque::len)
    }
}

/// Insert keeping `ring` sorted by `start_time`; same start replaces.
fn upsert(ring: &mut VecDeque<Candle>, candle: Candle) {
    match ring.back() {
        Some(last) if last.start_time < candle.start_time => ring.push_back(candle),
        None => ring.push_back(candle),
        _ => match ring.binary_search_by_key(&candle.start_time, |c| c.start_time) {
            Ok(idx) => ring[idx] = candle,
            Err(idx) => ring.insert(idx, candle),
        },
    }
}

#[async_trait]
impl HistoricalDataProvider for CandleStore {
    async fn historical_volumes(
        &self,
        symbol: &str,
        hours: u32,
        offset_minutes: u32,
        mode: DirectionMode,
    ) -> Result<Vec<f64>> {
        let now = self.clock.now_ms();
        let to_ms = now - i64::from(offset_minutes) * 60_000;
        let from_ms = to_ms - i64::from(hours) * 3_600_000;
        let volumes = self.quote_volumes_between(symbol, from_ms, to_ms, mode);
        debug!(
            symbol = %symbol,
            from_ms,
            to_ms,
            mode = %mode,
            samples = volumes.len(),
            "historical volumes"
        );
        Ok(volumes)
    }

    async fn recent_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        Ok(self.latest(symbol, limit))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn sample_candle(sym: &str, minute: i64, open: f64, close: f64, confirmed: bool) -> Candle {
        Candle {
            symbol: sym.into(),
            start_time: minute * 60_000,
            end_time: minute * 60_000 + 59_999,
            open,
            high: open.max(close) + 1.0,
            low: open.min(close) - 1.0,
            close,
            volume: 10.0,
            confirmed,
        }
    }

    fn store(max: usize, now_ms: i64) -> CandleStore {
        CandleStore::new(max, Arc::new(ManualClock::new(now_ms)))
    }

    #[test]
    fn ring_trimming_keeps_newest() {
        let s = store(3, 0);
        for i in 0..5 {
            s.record(&sample_candle("BTCUSDT", i, 100.0, 100.0 + i as f64, true));
        }
        assert_eq!(s.count("BTCUSDT"), 3);
        let closes: Vec<f64> = s.latest("BTCUSDT", 10).iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn unconfirmed_candles_are_not_stored() {
        let s = store(10, 0);
        s.record(&sample_candle("ETHUSDT", 0, 1.0, 2.0, false));
        assert_eq!(s.count("ETHUSDT"), 0);
    }

    #[test]
    fn upsert_replaces_and_orders_out_of_order_inserts() {
        let s = store(10, 0);
        s.record(&sample_candle("BTCUSDT", 2, 100.0, 101.0, true));
        s.record(&sample_candle("BTCUSDT", 0, 100.0, 99.0, true));
        s.record(&sample_candle("BTCUSDT", 1, 100.0, 98.0, true));
        s.record(&sample_candle("BTCUSDT", 1, 100.0, 105.0, true));

        let latest = s.latest("BTCUSDT", 10);
        let starts: Vec<i64> = latest.iter().map(|c| c.start_time).collect();
        assert_eq!(starts, vec![0, 60_000, 120_000]);
        assert_eq!(latest[1].close, 105.0);
    }

    #[tokio::test]
    async fn historical_volumes_respects_window_offset_and_mode() {
        // now = minute 120; 1 hour window with 10 minute offset covers
        // minutes [50, 110).
        let s = store(500, 120 * 60_000);
        for m in 0..120 {
            let close = if m % 2 == 0 { 101.0 } else { 99.0 };
            s.record(&sample_candle("BTCUSDT", m, 100.0, close, true));
        }

        let all = s
            .historical_volumes("BTCUSDT", 1, 10, DirectionMode::All)
            .await
            .unwrap();
        assert_eq!(all.len(), 60);

        let long = s
            .historical_volumes("BTCUSDT", 1, 10, DirectionMode::Long)
            .await
            .unwrap();
        assert_eq!(long.len(), 30);
        assert!((long[0] - 1010.0).abs() < 1e-9);

        let short = s
            .historical_volumes("BTCUSDT", 1, 10, DirectionMode::Short)
            .await
            .unwrap();
        assert_eq!(short.len(), 30);
    }

    #[tokio::test]
    async fn recent_candles_unknown_symbol_is_empty() {
        let s = store(10, 0);
        assert!(s.recent_candles("NOPE", 5).await.unwrap().is_empty());
    }
}
