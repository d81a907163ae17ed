// =============================================================================
// Imbalance Analyzer — Fair-value gaps, order blocks, breaker blocks
// =============================================================================
//
// Scans a short window of confirmed candles (the detector passes at most 20,
// never fewer than 15) for three price-action patterns:
//
//   1. Fair value gap:  a three-candle gap where candle[i].low sits above
//      candle[i-2].high (bullish) or candle[i].high below candle[i-2].low
//      (bearish), by at least `min_gap_percentage`.
//   2. Order block:     the last opposite-colour candle before an impulsive
//      move whose body is > 2x the window's average body and which closes
//      beyond that candle's range.
//   3. Breaker block:   an order block that a later candle closed through;
//      its direction flips.
//
// The strongest enabled pattern wins. Each pattern can be toggled from the
// runtime config.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::ImbalanceAnalyzer;
use crate::runtime_config::SharedConfig;
use crate::types::Candle;

/// Impulse body must exceed this multiple of the average body.
const IMPULSE_BODY_MULT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImbalanceKind {
    FairValueGap,
    OrderBlock,
    BreakerBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImbalanceDirection {
    Bullish,
    Bearish,
}

impl ImbalanceDirection {
    fn flipped(self) -> Self {
        match self {
            Self::Bullish => Self::Bearish,
            Self::Bearish => Self::Bullish,
        }
    }
}

/// Strongest pattern found in the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImbalanceResult {
    pub kind: ImbalanceKind,
    pub direction: ImbalanceDirection,
    /// Zone bounds in price units.
    pub top: f64,
    pub bottom: f64,
    /// Relative strength in [0, 1].
    pub strength: f64,
    /// Bucket start of the candle that completed the pattern.
    pub timestamp: i64,
    pub reason: String,
}

/// Pattern toggles and thresholds, taken from the runtime config.
#[derive(Debug, Clone, PartialEq)]
pub struct ImbalanceSettings {
    pub fair_value_gap: bool,
    pub order_block: bool,
    pub breaker_block: bool,
    pub min_gap_percentage: f64,
}

impl Default for ImbalanceSettings {
    fn default() -> Self {
        Self {
            fair_value_gap: true,
            order_block: true,
            breaker_block: true,
            min_gap_percentage: 0.1,
        }
    }
}

/// Run every enabled pattern over `candles` and keep the strongest hit.
pub fn analyze(candles: &[Candle], settings: &ImbalanceSettings) -> Option<ImbalanceResult> {
    let mut found: Vec<ImbalanceResult> = Vec::new();

    if settings.fair_value_gap {
        found.extend(fair_value_gap(candles, settings.min_gap_percentage));
    }
    if settings.order_block || settings.breaker_block {
        for (block, broken_at) in order_blocks(candles) {
            match broken_at {
                Some(idx) if settings.breaker_block => {
                    found.push(ImbalanceResult {
                        kind: ImbalanceKind::BreakerBlock,
                        direction: block.direction.flipped(),
                        timestamp: candles[idx].start_time,
                        reason: format!(
                            "Breaker block {:?}: order block [{:.6}, {:.6}] closed through",
                            block.direction.flipped(),
                            block.bottom,
                            block.top
                        ),
                        ..block
                    });
                }
                None if settings.order_block => found.push(block),
                _ => {}
            }
        }
    }

    let best = found
        .into_iter()
        .max_by(|a, b| a.strength.total_cmp(&b.strength));

    debug!(
        candles = candles.len(),
        found = best.is_some(),
        kind = ?best.as_ref().map(|r| r.kind),
        "imbalance analysis complete"
    );

    best
}

/// Most recent fair value gap in the window, if any.
fn fair_value_gap(candles: &[Candle], min_gap_pct: f64) -> Option<ImbalanceResult> {
    let min_gap_pct = min_gap_pct.max(f64::EPSILON);

    for i in (2..candles.len()).rev() {
        let first = &candles[i - 2];
        let third = &candles[i];

        let (direction, top, bottom) = if third.low > first.high {
            (ImbalanceDirection::Bullish, third.low, first.high)
        } else if third.high < first.low {
            (ImbalanceDirection::Bearish, first.low, third.high)
        } else {
            continue;
        };

        if bottom <= 0.0 {
            continue;
        }
        let gap_pct = (top - bottom) / bottom * 100.0;
        if gap_pct < min_gap_pct {
            continue;
        }

        return Some(ImbalanceResult {
            kind: ImbalanceKind::FairValueGap,
            direction,
            top,
            bottom,
            strength: (gap_pct / (min_gap_pct * 5.0)).min(1.0),
            timestamp: third.start_time,
            reason: format!("Fair value gap {direction:?}: {gap_pct:.3}%"),
        });
    }
    None
}

/// Order blocks with the index of the candle that later broke them, if any.
fn order_blocks(candles: &[Candle]) -> Vec<(ImbalanceResult, Option<usize>)> {
    let n = candles.len();
    if n < 2 {
        return Vec::new();
    }

    let avg_body = candles.iter().map(|c| (c.close - c.open).abs()).sum::<f64>() / n as f64;
    if avg_body < f64::EPSILON {
        return Vec::new();
    }

    let mut blocks = Vec::new();
    for i in 0..n - 1 {
        let base = &candles[i];
        let impulse = &candles[i + 1];
        let body = (impulse.close - impulse.open).abs();
        if body < avg_body * IMPULSE_BODY_MULT {
            continue;
        }

        let direction = if !base.is_long() && impulse.is_long() && impulse.close > base.high {
            ImbalanceDirection::Bullish
        } else if base.is_long() && !impulse.is_long() && impulse.close < base.low {
            ImbalanceDirection::Bearish
        } else {
            continue;
        };

        let broken_at = candles[i + 2..]
            .iter()
            .position(|c| match direction {
                ImbalanceDirection::Bullish => c.close < base.low,
                ImbalanceDirection::Bearish => c.close > base.high,
            })
            .map(|offset| i + 2 + offset);

        let ratio = body / avg_body;
        blocks.push((
            ImbalanceResult {
                kind: ImbalanceKind::OrderBlock,
                direction,
                top: base.high,
                bottom: base.low,
                strength: (ratio / (IMPULSE_BODY_MULT * 2.0)).min(1.0),
                timestamp: impulse.start_time,
                reason: format!("Order block {direction:?}: impulse body {ratio:.2}x average"),
            },
            broken_at,
        ));
    }
    blocks
}

// =============================================================================
// PatternAnalyzer — config-driven ImbalanceAnalyzer
// =============================================================================

/// Reads the pattern toggles from the shared runtime config on every call so
/// that hot reloads apply to the next analysis.
pub struct PatternAnalyzer {
    config: SharedConfig,
}

impl PatternAnalyzer {
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ImbalanceAnalyzer for PatternAnalyzer {
    async fn analyze_all(&self, candles: &[Candle]) -> Option<ImbalanceResult> {
        let settings = self.config.read().imbalance_settings();
        analyze(candles, &settings)
    }
}
