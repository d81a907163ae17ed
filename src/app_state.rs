// =============================================================================
// Central Application State — Aurora Signal Detector
// =============================================================================
//
// Ties the long-lived subsystems together for the HTTP API and WebSocket feed.
// The engine and dispatcher own their own interior mutability; AppState only
// holds Arc references plus the settings-update path.
//
// Settings updates merge a partial JSON object onto the live config, validate
// the result and swap it in under one write lock. The detector clones a
// snapshot per cycle, so the next candle sees either the old or the new
// settings in full.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::dispatch::history::AlertHistory;
use crate::dispatch::{DispatchStats, DispatchStatsSnapshot};
use crate::engine::{EngineStats, EngineStatsSnapshot, SymbolRouter};
use crate::market_data::CandleStore;
use crate::runtime_config::{RuntimeConfig, SharedConfig};

// =============================================================================
// Stats snapshot
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SymbolStats {
    pub symbol: String,
    pub stored_candles: usize,
}

/// Payload of `/api/v1/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub server_time: i64,
    pub utc_synced: bool,
    pub uptime_secs: u64,
    pub symbols: Vec<SymbolStats>,
    pub engine: EngineStatsSnapshot,
    pub alerts: DispatchStatsSnapshot,
    pub ws_subscribers: usize,
}

// =============================================================================
// AppState
// =============================================================================

pub struct AppState {
    // ── Configuration ────────────────────────────────────────────────────
    pub runtime_config: SharedConfig,
    /// Where settings updates are persisted.
    pub config_path: PathBuf,
    /// Bearer token guarding mutating endpoints. `None` disables them.
    pub admin_token: Option<String>,

    // ── Subsystems ───────────────────────────────────────────────────────
    pub clock: Arc<dyn Clock>,
    pub candle_store: Arc<CandleStore>,
    pub router: Arc<SymbolRouter>,
    pub engine_stats: Arc<EngineStats>,
    pub dispatch_stats: Arc<DispatchStats>,
    pub alert_history: Arc<AlertHistory>,

    // ── Realtime feed ────────────────────────────────────────────────────
    /// Serialised alert envelopes pushed to WebSocket clients.
    pub alert_feed: broadcast::Sender<String>,

    pub started_at: Instant,
}

impl AppState {
    /// Current UTC time from the injected clock.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let symbols = self
            .router
            .symbols()
            .into_iter()
            .map(|symbol| SymbolStats {
                stored_candles: self.candle_store.count(&symbol),
                symbol,
            })
            .collect();

        StatsSnapshot {
            server_time: self.clock.now_ms(),
            utc_synced: self.clock.is_synced(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            symbols,
            engine: self.engine_stats.snapshot(),
            alerts: self.dispatch_stats.snapshot(),
            ws_subscribers: self.alert_feed.receiver_count(),
        }
    }

    pub fn settings(&self) -> RuntimeConfig {
        self.runtime_config.read().clone()
    }

    /// Merge `patch` onto the live settings, validate, swap and persist.
    ///
    /// Unknown keys are rejected. A persistence failure is logged but the
    /// in-memory update stays applied.
    pub fn apply_settings(&self, patch: serde_json::Value) -> Result<RuntimeConfig> {
        let serde_json::Value::Object(changes) = patch else {
            bail!("settings update must be a JSON object");
        };

        let mut merged = serde_json::to_value(self.settings()).context("failed to serialise current settings")?;
        let Some(fields) = merged.as_object_mut() else {
            bail!("current settings did not serialise to an object");
        };
        for (key, value) in changes {
            if !fields.contains_key(&key) {
                bail!("unknown setting `{key}`");
            }
            fields.insert(key, value);
        }

        let updated: RuntimeConfig = serde_json::from_value(merged).context("invalid settings value")?;
        updated.validate()?;

        let previous = {
            let mut guard = self.runtime_config.write();
            std::mem::replace(&mut *guard, updated.clone())
        };
        if previous.symbols != updated.symbols {
            warn!(symbols = ?updated.symbols, "symbol list changed, takes effect after restart");
        }
        info!("runtime settings updated");

        if let Err(e) = updated.save(&self.config_path) {
            warn!(error = %e, path = %self.config_path.display(), "failed to persist settings");
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::imbalance::ImbalanceResult;
    use crate::providers::ImbalanceAnalyzer;
    use crate::runtime_config;
    use crate::signals::Capabilities;
    use crate::types::Candle;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct NoPatterns;

    #[async_trait]
    impl ImbalanceAnalyzer for NoPatterns {
        async fn analyze_all(&self, _candles: &[Candle]) -> Option<ImbalanceResult> {
            None
        }
    }

    fn state() -> (AppState, PathBuf) {
        let dir = std::env::temp_dir().join(format!("aurora-state-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("runtime_config.json");

        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(5_000));
        let config = runtime_config::shared(RuntimeConfig::default());
        let store = Arc::new(CandleStore::new(100, clock.clone()));
        let caps = Arc::new(Capabilities {
            history: store.clone(),
            imbalance: Arc::new(NoPatterns),
            order_book: None,
            closure: None,
            clock: clock.clone(),
        });
        let (batches, _rx) = mpsc::channel(1);
        let router = Arc::new(SymbolRouter::new(caps, config.clone(), batches));
        let (alert_feed, _) = broadcast::channel(8);

        let state = AppState {
            runtime_config: config,
            config_path,
            admin_token: Some("secret".into()),
            clock,
            candle_store: store,
            engine_stats: router.stats(),
            router,
            dispatch_stats: Arc::new(DispatchStats::default()),
            alert_history: Arc::new(AlertHistory::new()),
            alert_feed,
            started_at: Instant::now(),
        };
        (state, dir)
    }

    #[test]
    fn partial_update_is_merged_and_persisted() {
        let (state, dir) = state();
        let updated = state
            .apply_settings(serde_json::json!({ "volume_multiplier": 3.0, "run_threshold": 4 }))
            .unwrap();

        assert_eq!(updated.run_threshold, 4);
        assert_eq!(state.settings().volume_multiplier, 3.0);
        assert_eq!(state.settings().cooldown_window_minutes, 5);
        assert_eq!(RuntimeConfig::load(&state.config_path).unwrap(), updated);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn invalid_update_leaves_settings_untouched() {
        let (state, dir) = state();
        let before = state.settings();

        assert!(state.apply_settings(serde_json::json!({ "run_threshold": 0 })).is_err());
        assert!(state.apply_settings(serde_json::json!({ "no_such_field": 1 })).is_err());
        assert!(state.apply_settings(serde_json::json!({ "run_threshold": "five" })).is_err());
        assert!(state.apply_settings(serde_json::json!([1, 2])).is_err());

        assert_eq!(state.settings(), before);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn stats_reflect_clock_and_feed() {
        let (state, dir) = state();
        let _rx = state.alert_feed.subscribe();
        let stats = state.stats();

        assert_eq!(stats.server_time, 5_000);
        assert!(stats.utc_synced);
        assert_eq!(stats.ws_subscribers, 1);
        assert!(stats.symbols.is_empty());
        assert_eq!(stats.alerts.total_alerts, 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
