// =============================================================================
// Cooldown Store — last-fired timestamps per alert family
// =============================================================================
//
// Volume spikes and consecutive runs dedupe independently. Preliminary,
// final and priority alerts are never cooled down and have no key.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;

use crate::types::AlertKind;

/// Alert family that carries a cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownKey {
    Volume,
    Consecutive,
}

impl CooldownKey {
    pub fn for_kind(kind: AlertKind) -> Option<Self> {
        match kind {
            AlertKind::VolumeSpike => Some(Self::Volume),
            AlertKind::ConsecutiveLong => Some(Self::Consecutive),
            AlertKind::PreliminaryVolumeSpike | AlertKind::FinalVolumeSpike | AlertKind::Priority => None,
        }
    }
}

/// Last-fired timestamps for one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CooldownStore {
    last_fired: HashMap<CooldownKey, i64>,
}

impl CooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_fired(&self, key: CooldownKey) -> Option<i64> {
        self.last_fired.get(&key).copied()
    }

    /// `true` while `now` is strictly inside the window after the last fire.
    pub fn is_active(&self, key: CooldownKey, now_ms: i64, window_ms: i64) -> bool {
        self.last_fired(key)
            .is_some_and(|last| now_ms - last < window_ms)
    }

    /// Record a fire. Timestamps never move backwards.
    pub fn record(&mut self, key: CooldownKey, now_ms: i64) {
        let entry = self.last_fired.entry(key).or_insert(now_ms);
        if now_ms > *entry {
            *entry = now_ms;
        }
    }

    /// Drop entries older than `horizon_ms`. Returns how many were removed.
    pub fn prune(&mut self, now_ms: i64, horizon_ms: i64) -> usize {
        let before = self.last_fired.len();
        self.last_fired.retain(|_, last| now_ms - *last <= horizon_ms);
        before - self.last_fired.len()
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}
