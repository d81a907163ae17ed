use crate::error::RejectReason;
use crate::imbalance::ImbalanceResult;
use crate::runtime_config::RuntimeConfig;
use crate::signals::alert::{AlertPayload, AlertRecord};
use crate::signals::cooldown::{CooldownKey, CooldownStore};
use crate::types::Candle;

/// Whether a run of `count` long candles may alert now.
pub fn evaluate(
    count: u32,
    cooldowns: &CooldownStore,
    now_ms: i64,
    cfg: &RuntimeConfig,
) -> Result<u32, RejectReason> {
    if count < cfg.run_threshold {
        return Err(RejectReason::BelowRunThreshold);
    }
    if cooldowns.is_active(CooldownKey::Consecutive, now_ms, cfg.cooldown_window_ms()) {
        return Err(RejectReason::CooldownActive);
    }
    Ok(count)
}

pub fn build(
    candle: &Candle,
    count: u32,
    imbalance: Option<ImbalanceResult>,
    now_ms: i64,
) -> AlertRecord {
    AlertRecord::new(
        &candle.symbol,
        now_ms,
        candle.close,
        AlertPayload::ConsecutiveLong {
            consecutive_count: count,
        },
        candle.snapshot(Some(candle.close)),
        imbalance,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_then_cooldown() {
        let cfg = RuntimeConfig::default();
        let mut cooldowns = CooldownStore::new();
        assert_eq!(evaluate(4, &cooldowns, 0, &cfg), Err(RejectReason::BelowRunThreshold));
        assert_eq!(evaluate(5, &cooldowns, 0, &cfg), Ok(5));

        cooldowns.record(CooldownKey::Consecutive, 0);
        assert_eq!(evaluate(6, &cooldowns, 60_000, &cfg), Err(RejectReason::CooldownActive));
        assert_eq!(evaluate(10, &cooldowns, 300_000, &cfg), Ok(10));
    }

    #[test]
    fn volume_cooldown_does_not_block_runs() {
        let cfg = RuntimeConfig::default();
        let mut cooldowns = CooldownStore::new();
        cooldowns.record(CooldownKey::Volume, 0);
        assert_eq!(evaluate(5, &cooldowns, 1, &cfg), Ok(5));
    }
}
