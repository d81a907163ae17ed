// =============================================================================
// Alert Record — immutable output of one detector step
// =============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::imbalance::ImbalanceResult;
use crate::market_data::OrderBookSnapshot;
use crate::types::{AlertKind, CandleSnapshot};

/// Volume comparison carried by every volume-family alert.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeFigures {
    /// current / average, rounded to two decimals.
    pub volume_ratio: f64,
    pub current_volume_usdt: f64,
    pub average_volume_usdt: f64,
}

impl VolumeFigures {
    /// Compare `current_usdt` against the mean of `history`.
    ///
    /// Returns the figures plus the unrounded ratio used for threshold checks.
    /// An empty or all-zero history yields a ratio of 0.
    pub fn compute(current_usdt: f64, history: &[f64]) -> (Self, f64) {
        let average = if history.is_empty() {
            0.0
        } else {
            history.iter().sum::<f64>() / history.len() as f64
        };
        let ratio = if average > 0.0 { current_usdt / average } else { 0.0 };
        (
            Self {
                volume_ratio: (ratio * 100.0).round() / 100.0,
                current_volume_usdt: current_usdt.trunc(),
                average_volume_usdt: average.trunc(),
            },
            ratio,
        )
    }
}

/// Kind-specific payload. The variant is the alert's kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "alert_type", rename_all = "snake_case")]
pub enum AlertPayload {
    VolumeSpike(VolumeFigures),
    PreliminaryVolumeSpike(VolumeFigures),
    FinalVolumeSpike {
        #[serde(flatten)]
        figures: VolumeFigures,
        is_true_signal: bool,
        preliminary_timestamp: i64,
    },
    ConsecutiveLong {
        consecutive_count: u32,
    },
    Priority {
        consecutive_count: u32,
        #[serde(flatten, skip_serializing_if = "Option::is_none")]
        volume: Option<VolumeFigures>,
    },
}

impl AlertPayload {
    pub fn kind(&self) -> AlertKind {
        match self {
            Self::VolumeSpike(_) => AlertKind::VolumeSpike,
            Self::PreliminaryVolumeSpike(_) => AlertKind::PreliminaryVolumeSpike,
            Self::FinalVolumeSpike { .. } => AlertKind::FinalVolumeSpike,
            Self::ConsecutiveLong { .. } => AlertKind::ConsecutiveLong,
            Self::Priority { .. } => AlertKind::Priority,
        }
    }

    /// Volume figures, for the kinds that carry them.
    pub fn volume_figures(&self) -> Option<&VolumeFigures> {
        match self {
            Self::VolumeSpike(f) | Self::PreliminaryVolumeSpike(f) => Some(f),
            Self::FinalVolumeSpike { figures, .. } => Some(figures),
            Self::Priority { volume, .. } => volume.as_ref(),
            Self::ConsecutiveLong { .. } => None,
        }
    }

    /// Run length, for the kinds that carry one.
    pub fn consecutive_count(&self) -> Option<u32> {
        match self {
            Self::ConsecutiveLong { consecutive_count } | Self::Priority { consecutive_count, .. } => {
                Some(*consecutive_count)
            }
            _ => None,
        }
    }

    fn describe(&self, has_imbalance: bool) -> String {
        match self {
            Self::VolumeSpike(f) => format!("Volume {}x above average (true signal)", f.volume_ratio),
            Self::PreliminaryVolumeSpike(f) => {
                format!("Preliminary signal: volume {}x above average", f.volume_ratio)
            }
            Self::FinalVolumeSpike { figures, is_true_signal, .. } => format!(
                "Final signal: {} LONG (volume {}x)",
                if *is_true_signal { "true" } else { "false" },
                figures.volume_ratio
            ),
            Self::ConsecutiveLong { consecutive_count } => {
                format!("{consecutive_count} consecutive LONG candles (closed)")
            }
            Self::Priority { consecutive_count, .. } => format!(
                "Priority signal: {consecutive_count} LONG candles + volume spike{}",
                if has_imbalance { " + imbalance" } else { "" }
            ),
        }
    }
}

/// A produced alert. Immutable once built; ownership passes to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub symbol: String,
    /// Creation time, UTC epoch milliseconds.
    pub timestamp: i64,
    pub price: f64,
    #[serde(flatten)]
    pub payload: AlertPayload,
    pub has_imbalance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imbalance_data: Option<ImbalanceResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_book_snapshot: Option<OrderBookSnapshot>,
    pub candle_data: CandleSnapshot,
    pub message: String,
}

impl AlertRecord {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: i64,
        price: f64,
        payload: AlertPayload,
        candle_data: CandleSnapshot,
        imbalance_data: Option<ImbalanceResult>,
    ) -> Self {
        let has_imbalance = imbalance_data.is_some();
        let message = payload.describe(has_imbalance);
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            timestamp,
            price,
            payload,
            has_imbalance,
            imbalance_data,
            order_book_snapshot: None,
            candle_data,
            message,
        }
    }

    pub fn with_order_book(mut self, snapshot: Option<OrderBookSnapshot>) -> Self {
        self.order_book_snapshot = snapshot;
        self
    }

    pub fn kind(&self) -> AlertKind {
        self.payload.kind()
    }
}
