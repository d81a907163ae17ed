// =============================================================================
// Priority Combiner
// =============================================================================
//
// A priority alert needs this cycle's run alert plus volume activity: either
// a volume-family alert in the same cycle, or a volume spike / preliminary
// signal within the last `count` minutes. Priority itself is never cooled
// down; it inherits the gating of the run alert it builds on.
// =============================================================================

use crate::error::RejectReason;
use crate::signals::alert::{AlertPayload, AlertRecord};
use crate::types::AlertKind;

/// Pick the cycle's volume alert. A VolumeSpike wins over a FinalVolumeSpike.
pub fn volume_alert(cycle: &[AlertRecord]) -> Option<&AlertRecord> {
    cycle
        .iter()
        .find(|a| a.kind() == AlertKind::VolumeSpike)
        .or_else(|| cycle.iter().find(|a| a.kind() == AlertKind::FinalVolumeSpike))
}

/// Volume activity within the last `count` minutes.
///
/// `last_volume_ms` is the symbol's last VolumeSpike; `preliminary_ms` the
/// timestamp of a pending or just-resolved preliminary signal.
pub fn recent_volume_activity(
    count: u32,
    last_volume_ms: Option<i64>,
    preliminary_ms: Option<i64>,
    now_ms: i64,
) -> bool {
    let window_ms = i64::from(count) * 60_000;
    [last_volume_ms, preliminary_ms]
        .into_iter()
        .flatten()
        .any(|ts| now_ms - ts <= window_ms)
}

/// Combine the cycle's alerts into a priority alert.
///
/// `recent_activity` is only consulted when the cycle has no volume alert.
pub fn combine(
    consecutive: Option<&AlertRecord>,
    volume: Option<&AlertRecord>,
    recent_activity: bool,
    now_ms: i64,
) -> Result<AlertRecord, RejectReason> {
    let Some(run) = consecutive else {
        return Err(RejectReason::NoRunAlert);
    };
    let count = run.payload.consecutive_count().ok_or(RejectReason::NoRunAlert)?;
    if volume.is_none() && !recent_activity {
        return Err(RejectReason::NoVolumeActivity);
    }

    let figures = volume.and_then(|v| v.payload.volume_figures().cloned());
    let imbalance = volume
        .and_then(|v| v.imbalance_data.clone())
        .or_else(|| run.imbalance_data.clone());
    let candle_data = match volume {
        Some(v) => run.candle_data.overlay(&v.candle_data),
        None => run.candle_data.clone(),
    };

    Ok(AlertRecord::new(
        &run.symbol,
        now_ms,
        run.price,
        AlertPayload::Priority {
            consecutive_count: count,
            volume: figures,
        },
        candle_data,
        imbalance,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imbalance::{ImbalanceDirection, ImbalanceKind, ImbalanceResult};
    use crate::signals::alert::VolumeFigures;
    use crate::types::CandleSnapshot;

    fn snap(close: f64) -> CandleSnapshot {
        CandleSnapshot {
            open: 100.0,
            high: close,
            low: 100.0,
            close,
            volume: 1.0,
            alert_level: Some(close),
        }
    }

    fn run_alert(count: u32) -> AlertRecord {
        AlertRecord::new(
            "BTCUSDT",
            0,
            105.0,
            AlertPayload::ConsecutiveLong { consecutive_count: count },
            snap(105.0),
            None,
        )
    }

    fn volume_alert_of(payload: AlertPayload) -> AlertRecord {
        AlertRecord::new("BTCUSDT", 0, 106.0, payload, snap(106.0), None)
    }

    fn figures(ratio: f64) -> VolumeFigures {
        VolumeFigures {
            volume_ratio: ratio,
            current_volume_usdt: 0.0,
            average_volume_usdt: 0.0,
        }
    }

    fn zone(kind: ImbalanceKind, bottom: f64) -> ImbalanceResult {
        ImbalanceResult {
            kind,
            direction: ImbalanceDirection::Bullish,
            top: bottom + 2.0,
            bottom,
            strength: 0.6,
            timestamp: 0,
            reason: format!("{kind:?} at {bottom}"),
        }
    }

    #[test]
    fn needs_a_run_alert() {
        assert_eq!(combine(None, None, true, 0).unwrap_err(), RejectReason::NoRunAlert);
    }

    #[test]
    fn needs_volume_activity() {
        let run = run_alert(5);
        assert_eq!(
            combine(Some(&run), None, false, 0).unwrap_err(),
            RejectReason::NoVolumeActivity
        );
        let p = combine(Some(&run), None, true, 7).unwrap();
        assert_eq!(p.kind(), AlertKind::Priority);
        assert_eq!(p.price, 105.0);
        assert_eq!(p.timestamp, 7);
        assert!(p.payload.volume_figures().is_none());
    }

    #[test]
    fn volume_spike_preferred_over_final() {
        let final_alert = volume_alert_of(AlertPayload::FinalVolumeSpike {
            figures: figures(2.5),
            is_true_signal: true,
            preliminary_timestamp: 0,
        });
        let spike = volume_alert_of(AlertPayload::VolumeSpike(figures(4.0)));
        let cycle = vec![final_alert, spike];
        let chosen = volume_alert(&cycle).unwrap();
        assert_eq!(chosen.kind(), AlertKind::VolumeSpike);

        let run = run_alert(6);
        let p = combine(Some(&run), Some(chosen), false, 0).unwrap();
        assert_eq!(p.payload.consecutive_count(), Some(6));
        assert_eq!(p.payload.volume_figures().unwrap().volume_ratio, 4.0);
        assert_eq!(p.candle_data.close, 106.0);
        assert_eq!(p.price, 105.0);
    }

    #[test]
    fn recent_window_is_count_minutes_inclusive() {
        let now = 10 * 60_000;
        assert!(recent_volume_activity(5, Some(now - 5 * 60_000), None, now));
        assert!(!recent_volume_activity(5, Some(now - 5 * 60_000 - 1), None, now));
        assert!(recent_volume_activity(5, None, Some(now - 1), now));
        assert!(!recent_volume_activity(5, None, None, now));
    }

    #[test]
    fn volume_imbalance_wins_over_run_imbalance() {
        let mut run = run_alert(5);
        run.imbalance_data = Some(zone(ImbalanceKind::OrderBlock, 98.0));
        let mut spike = volume_alert_of(AlertPayload::VolumeSpike(figures(3.0)));
        spike.imbalance_data = Some(zone(ImbalanceKind::FairValueGap, 103.0));

        let p = combine(Some(&run), Some(&spike), false, 0).unwrap();
        assert!(p.has_imbalance);
        assert_eq!(p.imbalance_data, spike.imbalance_data);
    }

    #[test]
    fn run_imbalance_used_when_volume_has_none() {
        let mut run = run_alert(5);
        run.imbalance_data = Some(zone(ImbalanceKind::BreakerBlock, 97.0));
        let spike = volume_alert_of(AlertPayload::VolumeSpike(figures(3.0)));

        let p = combine(Some(&run), Some(&spike), false, 0).unwrap();
        assert!(p.has_imbalance);
        assert_eq!(p.imbalance_data, run.imbalance_data);

        // Same when the cycle has no volume alert at all.
        let p = combine(Some(&run), None, true, 0).unwrap();
        assert_eq!(p.imbalance_data, run.imbalance_data);
    }
}
