// =============================================================================
// Preliminary Signal Tracker + Final Confirmation
// =============================================================================
//
// A still-forming candle that already looks like a long volume spike raises a
// provisional alert and parks it in the symbol's single pending slot, tagged
// with the bucket it was raised on. Only the confirmed candle of that same
// bucket resolves it, exactly once: a FinalVolumeSpike states whether the
// spike held (true signal) or not. A pending alert whose bucket has been
// overtaken is discarded without a Final. Neither step is cooled down.
// =============================================================================

use crate::error::RejectReason;
use crate::runtime_config::RuntimeConfig;
use crate::signals::alert::{AlertPayload, AlertRecord, VolumeFigures};
use crate::types::Candle;

/// Samples required before a provisional ratio is trusted.
pub const PRELIMINARY_MIN_SAMPLES: usize = 10;

/// A provisional alert waiting for its own candle to confirm.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPreliminary {
    /// `start_time` of the candle the alert was raised on.
    pub bucket_start: i64,
    pub alert: AlertRecord,
}

impl PendingPreliminary {
    pub fn new(candle: &Candle, alert: AlertRecord) -> Self {
        Self {
            bucket_start: candle.start_time,
            alert,
        }
    }
}

/// Checks that need no history: provisional direction and the volume floor.
pub fn precheck(candle: &Candle, cfg: &RuntimeConfig) -> Result<(), RejectReason> {
    if !candle.is_long() {
        return Err(RejectReason::WrongDirection);
    }
    if candle.quote_volume() < cfg.min_volume_usdt {
        return Err(RejectReason::BelowVolumeFloor);
    }
    Ok(())
}

/// Build the provisional alert once history is known.
pub fn evaluate(
    candle: &Candle,
    history: &[f64],
    now_ms: i64,
    cfg: &RuntimeConfig,
) -> Result<AlertRecord, RejectReason> {
    if history.len() < PRELIMINARY_MIN_SAMPLES {
        return Err(RejectReason::InsufficientHistory);
    }
    let (figures, ratio) = VolumeFigures::compute(candle.quote_volume(), history);
    if ratio < cfg.volume_multiplier {
        return Err(RejectReason::BelowMultiplier);
    }

    Ok(AlertRecord::new(
        &candle.symbol,
        now_ms,
        candle.close,
        AlertPayload::PreliminaryVolumeSpike(figures),
        candle.snapshot(Some(candle.close)),
        None,
    ))
}

/// Resolve a pending preliminary against the confirmed candle.
pub fn resolve(pending: &AlertRecord, confirmed: &Candle, now_ms: i64) -> AlertRecord {
    let figures = pending.payload.volume_figures().cloned().unwrap_or_default();
    let snapshot = pending.candle_data.overlay(&confirmed.snapshot(None));

    AlertRecord::new(
        &confirmed.symbol,
        now_ms,
        confirmed.close,
        AlertPayload::FinalVolumeSpike {
            figures,
            is_true_signal: confirmed.is_long(),
            preliminary_timestamp: pending.timestamp,
        },
        snapshot,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertKind;

    fn candle(open: f64, close: f64, volume: f64, confirmed: bool) -> Candle {
        Candle {
            symbol: "SOLUSDT".into(),
            start_time: 0,
            end_time: 59_999,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume,
            confirmed,
        }
    }

    #[test]
    fn precheck_order() {
        let cfg = RuntimeConfig::default();
        assert_eq!(precheck(&candle(100.0, 99.0, 1000.0, false), &cfg), Err(RejectReason::WrongDirection));
        assert_eq!(precheck(&candle(100.0, 101.0, 1.0, false), &cfg), Err(RejectReason::BelowVolumeFloor));
        assert_eq!(precheck(&candle(100.0, 101.0, 100.0, false), &cfg), Ok(()));
    }

    #[test]
    fn evaluate_requires_ten_samples_and_ratio() {
        let cfg = RuntimeConfig::default();
        let c = candle(100.0, 110.0, 50.0, false); // 5500 USDT
        assert_eq!(
            evaluate(&c, &[1000.0; 9], 0, &cfg).unwrap_err(),
            RejectReason::InsufficientHistory
        );
        assert_eq!(
            evaluate(&c, &[4000.0; 10], 0, &cfg).unwrap_err(),
            RejectReason::BelowMultiplier
        );
        assert_eq!(
            evaluate(&c, &[0.0; 10], 0, &cfg).unwrap_err(),
            RejectReason::BelowMultiplier
        );

        let alert = evaluate(&c, &[1000.0; 10], 42, &cfg).unwrap();
        assert_eq!(alert.kind(), AlertKind::PreliminaryVolumeSpike);
        assert_eq!(alert.timestamp, 42);
        assert_eq!(alert.candle_data.alert_level, Some(110.0));
        assert_eq!(alert.payload.volume_figures().unwrap().volume_ratio, 5.5);
    }

    #[test]
    fn resolve_carries_preliminary_figures() {
        let cfg = RuntimeConfig::default();
        let pending = evaluate(&candle(100.0, 110.0, 50.0, false), &[1000.0; 10], 1_000, &cfg).unwrap();

        let held = resolve(&pending, &candle(100.0, 108.0, 60.0, true), 2_000);
        match &held.payload {
            AlertPayload::FinalVolumeSpike {
                figures,
                is_true_signal,
                preliminary_timestamp,
            } => {
                assert!(*is_true_signal);
                assert_eq!(*preliminary_timestamp, 1_000);
                assert_eq!(figures.volume_ratio, 5.5);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(held.price, 108.0);
        assert_eq!(held.candle_data.close, 108.0);
        assert_eq!(held.candle_data.alert_level, Some(110.0));

        let failed = resolve(&pending, &candle(100.0, 95.0, 60.0, true), 2_000);
        assert!(matches!(
            failed.payload,
            AlertPayload::FinalVolumeSpike { is_true_signal: false, .. }
        ));
    }
}
