// =============================================================================
// Shared types used across the Aurora signal detector
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::DetectorError;

// =============================================================================
// Candle
// =============================================================================

/// A single OHLCV candle as delivered by the kline feed.
///
/// Immutable once received. `confirmed` is the exchange's own "bucket closed"
/// flag; an installed closure predicate may override it (see
/// [`crate::providers::CandleClosure`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    /// Bucket start, UTC epoch milliseconds.
    pub start_time: i64,
    /// Bucket end, UTC epoch milliseconds.
    pub end_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Base-asset volume.
    pub volume: f64,
    pub confirmed: bool,
}

impl Candle {
    /// Traded volume expressed in the quote currency (USDT).
    pub fn quote_volume(&self) -> f64 {
        self.volume * self.close
    }

    /// A candle is "long" when it closed strictly above its open.
    pub fn is_long(&self) -> bool {
        self.close > self.open
    }

    /// Reject candles that cannot have come from a sane feed.
    ///
    /// Called before any per-symbol state is touched so that a malformed
    /// event leaves the state exactly as it was.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.symbol.trim().is_empty() {
            return Err(DetectorError::Invariant("empty symbol".into()));
        }
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(DetectorError::Invariant(format!(
                    "{name} is not a finite non-negative number: {value}"
                )));
            }
        }
        if self.high < self.low {
            return Err(DetectorError::Invariant(format!(
                "high {} below low {}",
                self.high, self.low
            )));
        }
        if self.end_time < self.start_time {
            return Err(DetectorError::Invariant(format!(
                "end_time {} before start_time {}",
                self.end_time, self.start_time
            )));
        }
        Ok(())
    }

    /// Snapshot of the OHLCV fields carried on an alert.
    pub fn snapshot(&self, alert_level: Option<f64>) -> CandleSnapshot {
        CandleSnapshot {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            alert_level,
        }
    }
}

// =============================================================================
// CandleSnapshot
// =============================================================================

/// OHLCV fields copied onto an alert at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSnapshot {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_level: Option<f64>,
}

impl CandleSnapshot {
    /// Merge `other` on top of `self`: every field `other` carries wins.
    pub fn overlay(&self, other: &CandleSnapshot) -> CandleSnapshot {
        CandleSnapshot {
            open: other.open,
            high: other.high,
            low: other.low,
            close: other.close,
            volume: other.volume,
            alert_level: other.alert_level.or(self.alert_level),
        }
    }
}

// =============================================================================
// DirectionMode
// =============================================================================

/// Which historical candles feed the volume baseline, and which confirmed
/// candles may raise a volume spike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionMode {
    Long,
    Short,
    All,
}

impl DirectionMode {
    /// Whether a candle belongs to this mode. `Short` follows the storage
    /// convention of "not long", so flat candles count as short.
    pub fn matches(self, candle: &Candle) -> bool {
        match self {
            Self::Long => candle.is_long(),
            Self::Short => !candle.is_long(),
            Self::All => true,
        }
    }
}

impl Default for DirectionMode {
    fn default() -> Self {
        Self::Long
    }
}

impl std::fmt::Display for DirectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
            Self::All => write!(f, "all"),
        }
    }
}

// =============================================================================
// AlertKind
// =============================================================================

/// Closed set of alert kinds the detector can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    VolumeSpike,
    PreliminaryVolumeSpike,
    FinalVolumeSpike,
    ConsecutiveLong,
    Priority,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VolumeSpike => "volume_spike",
            Self::PreliminaryVolumeSpike => "preliminary_volume_spike",
            Self::FinalVolumeSpike => "final_volume_spike",
            Self::ConsecutiveLong => "consecutive_long",
            Self::Priority => "priority",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            start_time: 0,
            end_time: 59_999,
            open,
            high: open.max(close) + 1.0,
            low: open.min(close) - 1.0,
            close,
            volume: 10.0,
            confirmed: true,
        }
    }

    #[test]
    fn quote_volume_is_volume_times_close() {
        let c = Candle {
            volume: 50.0,
            ..candle(100.0, 110.0)
        };
        assert!((c.quote_volume() - 5500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn flat_candle_is_not_long() {
        assert!(!candle(100.0, 100.0).is_long());
        assert!(DirectionMode::Short.matches(&candle(100.0, 100.0)));
        assert!(!DirectionMode::Long.matches(&candle(100.0, 100.0)));
        assert!(DirectionMode::All.matches(&candle(100.0, 90.0)));
    }

    #[test]
    fn validate_rejects_malformed_candles() {
        assert!(candle(100.0, 110.0).validate().is_ok());

        let mut c = candle(100.0, 110.0);
        c.high = 50.0;
        assert!(c.validate().is_err());

        let mut c = candle(100.0, 110.0);
        c.volume = f64::NAN;
        assert!(c.validate().is_err());

        let mut c = candle(100.0, 110.0);
        c.symbol = " ".into();
        assert!(c.validate().is_err());

        let mut c = candle(100.0, 110.0);
        c.end_time = -1;
        assert!(c.validate().is_err());
    }

    #[test]
    fn overlay_prefers_other_and_keeps_alert_level() {
        let base = candle(100.0, 110.0).snapshot(None);
        let top = CandleSnapshot {
            close: 120.0,
            alert_level: Some(120.0),
            ..base.clone()
        };
        let merged = base.overlay(&top);
        assert_eq!(merged.close, 120.0);
        assert_eq!(merged.alert_level, Some(120.0));

        let merged = top.overlay(&base);
        assert_eq!(merged.close, 110.0);
        assert_eq!(merged.alert_level, Some(120.0));
    }

    #[test]
    fn alert_kind_serialises_snake_case() {
        let json = serde_json::to_string(&AlertKind::FinalVolumeSpike).unwrap();
        assert_eq!(json, "\"final_volume_spike\"");
        let mode: DirectionMode = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(mode, DirectionMode::All);
    }
}
