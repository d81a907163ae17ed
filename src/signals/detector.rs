// =============================================================================
// Signal Detector — per-symbol candle pipeline
// =============================================================================
//
// One `SignalDetector` owns the state of exactly one symbol and is driven by
// exactly one task (see `engine.rs`), so a cycle always runs to completion
// before the next candle for that symbol starts.
//
// Unconfirmed candle:  preliminary tracker only.
// Confirmed candle:    run counter -> final confirmation -> volume spike ->
//                      consecutive run -> priority combiner.
//
// Provider and analyzer calls are the only suspension points. Every state
// write (run counter, pending slot, cooldowns) happens between those awaits,
// never across one. Each call is bounded by `provider_timeout_ms`; a timeout
// or provider error fails that one step and leaves its siblings running.
// =============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::error::{DetectorError, RejectReason};
use crate::imbalance::ImbalanceResult;
use crate::market_data::OrderBookSnapshot;
use crate::providers::{CandleClosure, HistoricalDataProvider, ImbalanceAnalyzer, OrderBookSource};
use crate::runtime_config::{RuntimeConfig, SharedConfig};
use crate::signals::alert::AlertRecord;
use crate::signals::cooldown::{CooldownKey, CooldownStore};
use crate::signals::outcome::{Admission, CycleReport, DetectorStep};
use crate::signals::preliminary::PendingPreliminary;
use crate::signals::run_counter::{RunCounter, RESYNC_MARGIN};
use crate::signals::{consecutive, preliminary, priority, volume};
use crate::types::{AlertKind, Candle};

/// Recent candles handed to the imbalance analyzer.
const IMBALANCE_WINDOW: usize = 20;

/// Fewer candles than this and no analysis is attempted.
const IMBALANCE_MIN_CANDLES: usize = 15;

// =============================================================================
// Capabilities & state
// =============================================================================

/// External collaborators, shared by every symbol's detector.
#[derive(Clone)]
pub struct Capabilities {
    pub history: Arc<dyn HistoricalDataProvider>,
    pub imbalance: Arc<dyn ImbalanceAnalyzer>,
    pub order_book: Option<Arc<dyn OrderBookSource>>,
    pub closure: Option<Arc<dyn CandleClosure>>,
    pub clock: Arc<dyn Clock>,
}

/// Everything the detector remembers about one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerSymbolState {
    pub cooldowns: CooldownStore,
    pub run: RunCounter,
    pub pending_preliminary: Option<PendingPreliminary>,
}

/// Why a step produced nothing.
enum Miss {
    Rejected(RejectReason),
    Failed(DetectorError),
}

impl From<RejectReason> for Miss {
    fn from(reason: RejectReason) -> Self {
        Self::Rejected(reason)
    }
}

impl From<DetectorError> for Miss {
    fn from(err: DetectorError) -> Self {
        Self::Failed(err)
    }
}

/// Run `fut` under a deadline, mapping both failure modes onto
/// [`DetectorError`].
async fn bounded<T>(
    call: &'static str,
    timeout_ms: u64,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, DetectorError> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DetectorError::Provider {
            call,
            message: format!("{e:#}"),
        }),
        Err(_) => Err(DetectorError::Timeout { call, timeout_ms }),
    }
}

// =============================================================================
// SignalDetector
// =============================================================================

pub struct SignalDetector {
    symbol: String,
    state: PerSymbolState,
    caps: Arc<Capabilities>,
    config: SharedConfig,
}

impl SignalDetector {
    pub fn new(symbol: impl Into<String>, caps: Arc<Capabilities>, config: SharedConfig) -> Self {
        Self {
            symbol: symbol.into(),
            state: PerSymbolState::default(),
            caps,
            config,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn state(&self) -> &PerSymbolState {
        &self.state
    }

    /// Drop cooldown entries older than `horizon_ms`.
    pub fn prune(&mut self, now_ms: i64, horizon_ms: i64) -> usize {
        self.state.cooldowns.prune(now_ms, horizon_ms)
    }

    /// Process one candle for this symbol.
    ///
    /// A malformed candle returns [`DetectorError::Invariant`] and leaves the
    /// state untouched. Everything else yields a [`CycleReport`], including
    /// cycles where individual steps failed upstream.
    #[instrument(skip_all, fields(symbol = %self.symbol, start = candle.start_time, confirmed = candle.confirmed))]
    pub async fn process(&mut self, candle: &Candle) -> Result<CycleReport, DetectorError> {
        if let Err(e) = candle.validate() {
            error!(error = %e, "malformed candle dropped");
            return Err(e);
        }
        if candle.symbol != self.symbol {
            let e = DetectorError::Invariant(format!(
                "candle for {} routed to {}",
                candle.symbol, self.symbol
            ));
            error!(error = %e, "misrouted candle dropped");
            return Err(e);
        }

        // One snapshot per cycle: a hot reload never lands mid-cycle.
        let cfg = self.config.read().clone();

        if !candle.confirmed {
            return Ok(self.unconfirmed_cycle(candle, &cfg).await);
        }
        if let Some(closure) = &self.caps.closure {
            if !closure.is_closed(candle) {
                debug!("confirm flag set but bucket still open");
                return Ok(CycleReport::new(Admission::AwaitingClose));
            }
        }
        Ok(self.confirmed_cycle(candle, &cfg).await)
    }

    // -------------------------------------------------------------------------
    // Unconfirmed path
    // -------------------------------------------------------------------------

    async fn unconfirmed_cycle(&mut self, candle: &Candle, cfg: &RuntimeConfig) -> CycleReport {
        let mut report = CycleReport::new(Admission::Unconfirmed);
        let now = self.caps.clock.now_ms();

        if let Some(pending) = &self.state.pending_preliminary {
            if pending.bucket_start < candle.start_time {
                debug!(
                    pending_start = pending.bucket_start,
                    "preliminary overtaken by a newer bucket, discarded"
                );
                self.state.pending_preliminary = None;
            }
        }

        let result = async {
            preliminary::precheck(candle, cfg)?;
            let history = self.historical_volumes(cfg).await?;
            Ok::<_, Miss>(preliminary::evaluate(candle, &history, now, cfg)?)
        }
        .await;

        if let Ok(alert) = &result {
            // Overwrite, never queue.
            self.state.pending_preliminary = Some(PendingPreliminary::new(candle, alert.clone()));
        }
        record(&mut report, DetectorStep::Preliminary, result);
        report
    }

    // -------------------------------------------------------------------------
    // Confirmed path
    // -------------------------------------------------------------------------

    async fn confirmed_cycle(&mut self, candle: &Candle, cfg: &RuntimeConfig) -> CycleReport {
        let mut report = CycleReport::new(Admission::Confirmed);
        let now = self.caps.clock.now_ms();

        // --- Run counter ---------------------------------------------------
        if !self.state.run.is_synced() {
            let limit = cfg.run_threshold as usize + RESYNC_MARGIN;
            match bounded(
                "recent_candles",
                cfg.provider_timeout_ms,
                self.caps.history.recent_candles(&self.symbol, limit),
            )
            .await
            {
                Ok(history) => {
                    let count = self.state.run.resync(&history, candle.start_time);
                    info!(count, "run counter resynchronised");
                }
                Err(e) => warn!(error = %e, "run counter resync failed, retrying next candle"),
            }
        }
        let run_count = self.state.run.observe(candle);
        debug!(run_count, "run counter updated");

        // --- Final confirmation (always on) --------------------------------
        let resolved_preliminary_ms = match self.state.pending_preliminary.take() {
            Some(pending) if pending.bucket_start == candle.start_time => {
                let alert = preliminary::resolve(&pending.alert, candle, now);
                record(&mut report, DetectorStep::FinalConfirmation, Ok(alert));
                Some(pending.alert.timestamp)
            }
            Some(pending) => {
                if pending.bucket_start > candle.start_time {
                    // Late close of an older bucket; the newer preliminary stays.
                    self.state.pending_preliminary = Some(pending);
                } else {
                    debug!(
                        pending_start = pending.bucket_start,
                        "preliminary for an earlier bucket discarded"
                    );
                }
                report.rejected(DetectorStep::FinalConfirmation, RejectReason::NoPending);
                None
            }
            None => {
                report.rejected(DetectorStep::FinalConfirmation, RejectReason::NoPending);
                None
            }
        };

        // --- Volume spike ----------------------------------------------------
        if cfg.volume_alerts_enabled {
            let result = self.volume_spike(candle, cfg, now).await;
            self.start_cooldown(&result, now);
            record(&mut report, DetectorStep::VolumeSpike, result);
        } else {
            report.disabled(DetectorStep::VolumeSpike);
        }

        // --- Consecutive run -------------------------------------------------
        if cfg.consecutive_alerts_enabled {
            let result = self.consecutive_run(candle, run_count, cfg, now).await;
            self.start_cooldown(&result, now);
            record(&mut report, DetectorStep::ConsecutiveRun, result);
        } else {
            report.disabled(DetectorStep::ConsecutiveRun);
        }

        // --- Priority ----------------------------------------------------------
        if cfg.priority_alerts_enabled {
            let result = self.priority(&report.alerts, resolved_preliminary_ms, now);
            record(&mut report, DetectorStep::Priority, result.map_err(Miss::from));
        } else {
            report.disabled(DetectorStep::Priority);
        }

        report
    }

    /// Start the cooldown of the alert kind that just fired, if it has one.
    fn start_cooldown(&mut self, result: &Result<AlertRecord, Miss>, now: i64) {
        if let Some(key) = result.as_ref().ok().and_then(|a| CooldownKey::for_kind(a.kind())) {
            self.state.cooldowns.record(key, now);
        }
    }

    async fn volume_spike(
        &self,
        candle: &Candle,
        cfg: &RuntimeConfig,
        now: i64,
    ) -> Result<AlertRecord, Miss> {
        volume::precheck(candle, cfg)?;
        let history = self.historical_volumes(cfg).await?;
        let figures = volume::evaluate(candle, &history, &self.state.cooldowns, now, cfg)?;

        let imbalance = if cfg.imbalance_enabled {
            self.imbalance(cfg).await?
        } else {
            None
        };
        let order_book = if cfg.orderbook_enabled && cfg.orderbook_snapshot_on_alert {
            self.order_book(cfg).await
        } else {
            None
        };

        Ok(volume::build(candle, figures, imbalance, now).with_order_book(order_book))
    }

    async fn consecutive_run(
        &self,
        candle: &Candle,
        run_count: u32,
        cfg: &RuntimeConfig,
        now: i64,
    ) -> Result<AlertRecord, Miss> {
        let count = consecutive::evaluate(run_count, &self.state.cooldowns, now, cfg)?;
        let imbalance = self.imbalance(cfg).await?;
        Ok(consecutive::build(candle, count, imbalance, now))
    }

    fn priority(
        &self,
        cycle: &[AlertRecord],
        resolved_preliminary_ms: Option<i64>,
        now: i64,
    ) -> Result<AlertRecord, RejectReason> {
        let run = cycle.iter().find(|a| a.kind() == AlertKind::ConsecutiveLong);
        let volume = priority::volume_alert(cycle);

        let recent = match (run.and_then(|r| r.payload.consecutive_count()), volume) {
            (Some(count), None) => priority::recent_volume_activity(
                count,
                self.state.cooldowns.last_fired(CooldownKey::Volume),
                self.state
                    .pending_preliminary
                    .as_ref()
                    .map(|p| p.alert.timestamp)
                    .or(resolved_preliminary_ms),
                now,
            ),
            _ => false,
        };
        priority::combine(run, volume, recent, now)
    }

    // -------------------------------------------------------------------------
    // Bounded collaborator calls
    // -------------------------------------------------------------------------

    async fn historical_volumes(&self, cfg: &RuntimeConfig) -> Result<Vec<f64>, DetectorError> {
        bounded(
            "historical_volumes",
            cfg.provider_timeout_ms,
            self.caps.history.historical_volumes(
                &self.symbol,
                cfg.analysis_hours,
                cfg.offset_minutes,
                cfg.direction_mode,
            ),
        )
        .await
    }

    async fn imbalance(&self, cfg: &RuntimeConfig) -> Result<Option<ImbalanceResult>, DetectorError> {
        let candles = bounded(
            "recent_candles",
            cfg.provider_timeout_ms,
            self.caps.history.recent_candles(&self.symbol, IMBALANCE_WINDOW),
        )
        .await?;
        if candles.len() < IMBALANCE_MIN_CANDLES {
            debug!(available = candles.len(), "too few candles for imbalance analysis");
            return Ok(None);
        }
        let analyzer = &self.caps.imbalance;
        bounded("analyze_all", cfg.provider_timeout_ms, async {
            Ok(analyzer.analyze_all(&candles).await)
        })
        .await
    }

    /// A missing or slow book is not a failure; the alert goes out without it.
    async fn order_book(&self, cfg: &RuntimeConfig) -> Option<OrderBookSnapshot> {
        let source = self.caps.order_book.as_ref()?;
        let timeout = Duration::from_millis(cfg.provider_timeout_ms);
        match tokio::time::timeout(timeout, source.snapshot(&self.symbol)).await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                warn!("order book snapshot timed out");
                None
            }
        }
    }
}

/// Log a step result and fold it into the report.
fn record(report: &mut CycleReport, step: DetectorStep, result: Result<AlertRecord, Miss>) {
    match result {
        Ok(alert) => {
            info!(
                step = ?step,
                kind = %alert.kind(),
                price = alert.price,
                message = %alert.message,
                "alert produced"
            );
            report.fired(step, alert);
        }
        Err(Miss::Rejected(reason)) => {
            debug!(step = ?step, reason = %reason, "step rejected");
            report.rejected(step, reason);
        }
        Err(Miss::Failed(err)) => {
            warn!(step = ?step, error = %err, "step failed upstream");
            report.failed(step, &err);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
