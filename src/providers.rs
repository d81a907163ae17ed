// =============================================================================
// Capability interfaces injected into the signal detector
// =============================================================================
//
// The detector owns no I/O. Historical data, imbalance analysis, order-book
// snapshots and candle-closure decisions arrive through these traits so that
// tests can substitute fakes and production can swap backends.
// =============================================================================

use anyhow::Result;
use async_trait::async_trait;

use crate::imbalance::ImbalanceResult;
use crate::market_data::OrderBookSnapshot;
use crate::types::{Candle, DirectionMode};

/// Answers volume-history and recent-candle queries.
#[async_trait]
pub trait HistoricalDataProvider: Send + Sync {
    /// Quote volumes of confirmed candles whose bucket starts inside
    /// `[now - offset - hours, now - offset)`, filtered by `mode`,
    /// chronological, possibly empty.
    async fn historical_volumes(
        &self,
        symbol: &str,
        hours: u32,
        offset_minutes: u32,
        mode: DirectionMode,
    ) -> Result<Vec<f64>>;

    /// Up to `limit` most recent confirmed candles, oldest first.
    async fn recent_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>>;
}

/// Chart-pattern analysis over a short window of confirmed candles.
#[async_trait]
pub trait ImbalanceAnalyzer: Send + Sync {
    async fn analyze_all(&self, candles: &[Candle]) -> Option<ImbalanceResult>;
}

/// Optional order-book snapshot capability. `None` is a legitimate answer.
#[async_trait]
pub trait OrderBookSource: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Option<OrderBookSnapshot>;
}

/// External decision on whether a candle's bucket has closed.
pub trait CandleClosure: Send + Sync {
    fn is_closed(&self, candle: &Candle) -> bool;
}
