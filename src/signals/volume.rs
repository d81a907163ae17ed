// =============================================================================
// Volume Spike Detector — confirmed candles only
// =============================================================================
//
// Validation order is fixed so rejection reasons are stable:
//   direction mode -> quote-volume floor -> sample count -> ratio -> cooldown
//
// Direction and floor need no history and run before the provider is asked.
// The caller attaches imbalance / order-book context and records the cooldown
// after `evaluate` accepts.
// =============================================================================

use crate::error::RejectReason;
use crate::imbalance::ImbalanceResult;
use crate::runtime_config::RuntimeConfig;
use crate::signals::alert::{AlertPayload, AlertRecord, VolumeFigures};
use crate::signals::cooldown::{CooldownKey, CooldownStore};
use crate::types::Candle;

pub fn precheck(candle: &Candle, cfg: &RuntimeConfig) -> Result<(), RejectReason> {
    if !cfg.direction_mode.matches(candle) {
        return Err(RejectReason::WrongDirection);
    }
    if candle.quote_volume() < cfg.min_volume_usdt {
        return Err(RejectReason::BelowVolumeFloor);
    }
    Ok(())
}

/// Figures for an accepted spike. The cooldown is read, never written.
pub fn evaluate(
    candle: &Candle,
    history: &[f64],
    cooldowns: &CooldownStore,
    now_ms: i64,
    cfg: &RuntimeConfig,
) -> Result<VolumeFigures, RejectReason> {
    if history.len() < cfg.min_history_samples {
        return Err(RejectReason::InsufficientHistory);
    }
    let (figures, ratio) = VolumeFigures::compute(candle.quote_volume(), history);
    if ratio < cfg.volume_multiplier {
        return Err(RejectReason::BelowMultiplier);
    }
    if cooldowns.is_active(CooldownKey::Volume, now_ms, cfg.cooldown_window_ms()) {
        return Err(RejectReason::CooldownActive);
    }
    Ok(figures)
}

pub fn build(
    candle: &Candle,
    figures: VolumeFigures,
    imbalance: Option<ImbalanceResult>,
    now_ms: i64,
) -> AlertRecord {
    AlertRecord::new(
        &candle.symbol,
        now_ms,
        candle.close,
        AlertPayload::VolumeSpike(figures),
        candle.snapshot(Some(candle.close)),
        imbalance,
    )
}
