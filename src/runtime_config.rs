// =============================================================================
// Runtime Configuration — Hot-reloadable detector settings with atomic save
// =============================================================================
//
// Every tunable of the signal detector lives here so that thresholds, feature
// toggles and windows can be changed at runtime without a restart.
//
// Hot reload replaces the whole struct under a single write lock; the
// detector clones one snapshot per candle cycle, so a cycle never observes a
// half-applied update.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::imbalance::ImbalanceSettings;
use crate::types::DirectionMode;

/// Config handle shared by every subsystem.
pub type SharedConfig = Arc<RwLock<RuntimeConfig>>;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
        "XRPUSDT".to_string(),
        "DOGEUSDT".to_string(),
    ]
}

fn default_analysis_hours() -> u32 {
    1
}

fn default_volume_multiplier() -> f64 {
    2.0
}

fn default_min_volume_usdt() -> f64 {
    1000.0
}

fn default_min_history_samples() -> usize {
    10
}

fn default_run_threshold() -> u32 {
    5
}

fn default_cooldown_window_minutes() -> u32 {
    5
}

fn default_retention_horizon_hours() -> u32 {
    1
}

fn default_cleanup_interval_minutes() -> u32 {
    60
}

fn default_min_gap_percentage() -> f64 {
    0.1
}

fn default_provider_timeout_ms() -> u64 {
    5_000
}

fn default_backfill_candles() -> usize {
    200
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the signal detector.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Symbols ------------------------------------------------------------

    /// Symbols streamed from the exchange.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    // --- Detector families --------------------------------------------------

    #[serde(default = "default_true")]
    pub volume_alerts_enabled: bool,

    #[serde(default = "default_true")]
    pub consecutive_alerts_enabled: bool,

    #[serde(default = "default_true")]
    pub priority_alerts_enabled: bool,

    // --- Volume analysis ----------------------------------------------------

    /// Length of the historical volume window.
    #[serde(default = "default_analysis_hours")]
    pub analysis_hours: u32,

    /// How far before "now" the historical window ends.
    #[serde(default)]
    pub offset_minutes: u32,

    /// Current quote volume must be at least this multiple of the average.
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,

    /// Quote-volume floor (USDT) below which no volume alert fires.
    #[serde(default = "default_min_volume_usdt")]
    pub min_volume_usdt: f64,

    /// Minimum historical samples before a confirmed-candle ratio is trusted.
    #[serde(default = "default_min_history_samples")]
    pub min_history_samples: usize,

    /// Which candles feed the baseline and may raise a spike.
    #[serde(default)]
    pub direction_mode: DirectionMode,

    // --- Consecutive runs ---------------------------------------------------

    /// Consecutive long candles needed for a run alert.
    #[serde(default = "default_run_threshold")]
    pub run_threshold: u32,

    // --- Dedup / retention --------------------------------------------------

    /// Minimum spacing between same-kind alerts for one symbol.
    #[serde(default = "default_cooldown_window_minutes")]
    pub cooldown_window_minutes: u32,

    /// Cooldown entries older than this are pruned.
    #[serde(default = "default_retention_horizon_hours")]
    pub retention_horizon_hours: u32,

    /// How often the retention pruning runs.
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u32,

    // --- Imbalance ----------------------------------------------------------

    #[serde(default = "default_true")]
    pub imbalance_enabled: bool,

    #[serde(default = "default_true")]
    pub fair_value_gap_enabled: bool,

    #[serde(default = "default_true")]
    pub order_block_enabled: bool,

    #[serde(default = "default_true")]
    pub breaker_block_enabled: bool,

    /// Smallest fair value gap, as a percentage of price.
    #[serde(default = "default_min_gap_percentage")]
    pub min_gap_percentage: f64,

    // --- Order book ---------------------------------------------------------

    #[serde(default)]
    pub orderbook_enabled: bool,

    #[serde(default)]
    pub orderbook_snapshot_on_alert: bool,

    // --- Delivery / plumbing ------------------------------------------------

    #[serde(default = "default_true")]
    pub notification_enabled: bool,

    /// Double-check the exchange confirm flag against the bucket end time.
    #[serde(default)]
    pub verify_candle_close: bool,

    /// Upper bound on each provider / analyzer call.
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Confirmed candles fetched per symbol at startup.
    #[serde(default = "default_backfill_candles")]
    pub backfill_candles: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            volume_alerts_enabled: true,
            consecutive_alerts_enabled: true,
            priority_alerts_enabled: true,
            analysis_hours: default_analysis_hours(),
            offset_minutes: 0,
            volume_multiplier: default_volume_multiplier(),
            min_volume_usdt: default_min_volume_usdt(),
            min_history_samples: default_min_history_samples(),
            direction_mode: DirectionMode::Long,
            run_threshold: default_run_threshold(),
            cooldown_window_minutes: default_cooldown_window_minutes(),
            retention_horizon_hours: default_retention_horizon_hours(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
            imbalance_enabled: true,
            fair_value_gap_enabled: true,
            order_block_enabled: true,
            breaker_block_enabled: true,
            min_gap_percentage: default_min_gap_percentage(),
            orderbook_enabled: false,
            orderbook_snapshot_on_alert: false,
            notification_enabled: true,
            verify_candle_close: false,
            provider_timeout_ms: default_provider_timeout_ms(),
            backfill_candles: default_backfill_candles(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("invalid runtime config in {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            direction_mode = %config.direction_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Reject values the detector cannot work with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.analysis_hours > 0, "analysis_hours must be positive");
        ensure!(
            self.volume_multiplier.is_finite() && self.volume_multiplier > 0.0,
            "volume_multiplier must be a positive number"
        );
        ensure!(
            self.min_volume_usdt.is_finite() && self.min_volume_usdt >= 0.0,
            "min_volume_usdt must be non-negative"
        );
        ensure!(self.min_history_samples > 0, "min_history_samples must be positive");
        ensure!(self.run_threshold > 0, "run_threshold must be positive");
        ensure!(self.retention_horizon_hours > 0, "retention_horizon_hours must be positive");
        ensure!(self.cleanup_interval_minutes > 0, "cleanup_interval_minutes must be positive");
        ensure!(self.provider_timeout_ms > 0, "provider_timeout_ms must be positive");
        ensure!(
            self.min_gap_percentage.is_finite() && self.min_gap_percentage >= 0.0,
            "min_gap_percentage must be non-negative"
        );
        Ok(())
    }

    pub fn cooldown_window_ms(&self) -> i64 {
        i64::from(self.cooldown_window_minutes) * 60_000
    }

    pub fn retention_horizon_ms(&self) -> i64 {
        i64::from(self.retention_horizon_hours) * 3_600_000
    }

    pub fn imbalance_settings(&self) -> ImbalanceSettings {
        ImbalanceSettings {
            fair_value_gap: self.fair_value_gap_enabled,
            order_block: self.order_block_enabled,
            breaker_block: self.breaker_block_enabled,
            min_gap_percentage: self.min_gap_percentage,
        }
    }
}

/// Wrap a config for sharing across tasks.
pub fn shared(config: RuntimeConfig) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.symbols[0], "BTCUSDT");
        assert_eq!(cfg.analysis_hours, 1);
        assert_eq!(cfg.offset_minutes, 0);
        assert!((cfg.volume_multiplier - 2.0).abs() < f64::EPSILON);
        assert!((cfg.min_volume_usdt - 1000.0).abs() < f64::EPSILON);
        assert_eq!(cfg.run_threshold, 5);
        assert_eq!(cfg.cooldown_window_ms(), 300_000);
        assert_eq!(cfg.retention_horizon_ms(), 3_600_000);
        assert_eq!(cfg.direction_mode, DirectionMode::Long);
        assert!(cfg.imbalance_enabled);
        assert!(!cfg.orderbook_enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "direction_mode": "all", "symbols": ["ETHUSDT"], "run_threshold": 3 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.direction_mode, DirectionMode::All);
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.run_threshold, 3);
        assert!(cfg.volume_alerts_enabled);
        assert_eq!(cfg.cooldown_window_minutes, 5);
    }

    #[test]
    fn validate_rejects_nonsense() {
        let mut cfg = RuntimeConfig::default();
        cfg.volume_multiplier = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::default();
        cfg.run_threshold = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("aurora-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.volume_multiplier = 3.5;
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
        std::fs::remove_dir_all(&dir).ok();
    }
}
