// =============================================================================
// Engine — one task per symbol, batches to the dispatcher
// =============================================================================
//
// `SymbolRouter` lazily spawns a task the first time a symbol is seen. That
// task owns the symbol's `SignalDetector` and drains a bounded channel of
// commands, so candles for one symbol are processed strictly one after the
// other while different symbols run in parallel. Routing never waits: when a
// symbol's queue is full the candle is dropped and counted, so a stalled
// provider call only holds up its own symbol.
//
// Each non-empty cycle is forwarded as one batch; the dispatcher preserves
// batch order and the in-batch order the detector produced.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::error::DetectorError;
use crate::runtime_config::SharedConfig;
use crate::signals::{AlertRecord, Capabilities, SignalDetector, StepOutcome};
use crate::types::Candle;

/// Pending commands per symbol before new candles are dropped.
const SYMBOL_QUEUE_DEPTH: usize = 256;

/// Work item for a symbol task.
#[derive(Debug)]
pub enum SymbolCommand {
    Candle(Candle),
    /// Drop cooldown entries older than `horizon_ms` as of `now_ms`.
    Prune { now_ms: i64, horizon_ms: i64 },
}

/// Counters exposed on `/api/v1/stats`.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub candles_processed: AtomicU64,
    pub cycles_with_alerts: AtomicU64,
    pub upstream_failures: AtomicU64,
    pub invariant_violations: AtomicU64,
    pub cooldowns_pruned: AtomicU64,
    /// Candles dropped because their symbol's queue was full.
    pub candles_dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatsSnapshot {
    pub candles_processed: u64,
    pub cycles_with_alerts: u64,
    pub upstream_failures: u64,
    pub invariant_violations: u64,
    pub cooldowns_pruned: u64,
    pub candles_dropped: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            candles_processed: self.candles_processed.load(Ordering::Relaxed),
            cycles_with_alerts: self.cycles_with_alerts.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
            cooldowns_pruned: self.cooldowns_pruned.load(Ordering::Relaxed),
            candles_dropped: self.candles_dropped.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// SymbolRouter
// =============================================================================

pub struct SymbolRouter {
    units: Mutex<HashMap<String, mpsc::Sender<SymbolCommand>>>,
    caps: Arc<Capabilities>,
    config: SharedConfig,
    batches: mpsc::Sender<Vec<AlertRecord>>,
    stats: Arc<EngineStats>,
}

impl SymbolRouter {
    pub fn new(
        caps: Arc<Capabilities>,
        config: SharedConfig,
        batches: mpsc::Sender<Vec<AlertRecord>>,
    ) -> Self {
        Self {
            units: Mutex::new(HashMap::new()),
            caps,
            config,
            batches,
            stats: Arc::new(EngineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.stats.clone()
    }

    /// Symbols that have a running task.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.units.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Queue a candle on its symbol's task, spawning the task if needed.
    /// Never waits: a full queue drops the candle.
    pub fn route(&self, candle: Candle) {
        let symbol = candle.symbol.clone();
        let tx = self.unit(&symbol);
        match tx.try_send(SymbolCommand::Candle(candle)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.candles_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(symbol = %symbol, dropped, "symbol queue full, candle dropped");
            }
            Err(TrySendError::Closed(_)) => {
                // The task only exits on panic. Drop it so the next candle
                // starts a fresh one.
                error!(symbol = %symbol, "symbol task gone, candle dropped");
                self.units.lock().remove(&symbol);
            }
        }
    }

    /// Ask every symbol task to prune its cooldowns. A symbol whose queue is
    /// full skips this pass.
    pub fn prune_all(&self, now_ms: i64, horizon_ms: i64) {
        let units: Vec<(String, mpsc::Sender<SymbolCommand>)> = self
            .units
            .lock()
            .iter()
            .map(|(s, tx)| (s.clone(), tx.clone()))
            .collect();
        for (symbol, tx) in units {
            if let Err(e) = tx.try_send(SymbolCommand::Prune { now_ms, horizon_ms }) {
                let reason = match e {
                    TrySendError::Full(_) => "queue full",
                    TrySendError::Closed(_) => "symbol task gone",
                };
                warn!(symbol = %symbol, reason, "prune skipped");
            }
        }
    }

    fn unit(&self, symbol: &str) -> mpsc::Sender<SymbolCommand> {
        let mut units = self.units.lock();
        if let Some(tx) = units.get(symbol) {
            return tx.clone();
        }

        let (tx, rx) = mpsc::channel(SYMBOL_QUEUE_DEPTH);
        let detector = SignalDetector::new(symbol, self.caps.clone(), self.config.clone());
        tokio::spawn(run_unit(detector, rx, self.batches.clone(), self.stats.clone()));
        info!(symbol = %symbol, "symbol task started");
        units.insert(symbol.to_string(), tx.clone());
        tx
    }
}

/// Body of one symbol task.
async fn run_unit(
    mut detector: SignalDetector,
    mut rx: mpsc::Receiver<SymbolCommand>,
    batches: mpsc::Sender<Vec<AlertRecord>>,
    stats: Arc<EngineStats>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SymbolCommand::Candle(candle) => {
                stats.candles_processed.fetch_add(1, Ordering::Relaxed);
                match detector.process(&candle).await {
                    Ok(report) => {
                        let failures = report
                            .steps
                            .iter()
                            .filter(|(_, o)| matches!(o, StepOutcome::Failed(_)))
                            .count();
                        stats
                            .upstream_failures
                            .fetch_add(failures as u64, Ordering::Relaxed);

                        if report.alerts.is_empty() {
                            continue;
                        }
                        stats.cycles_with_alerts.fetch_add(1, Ordering::Relaxed);
                        if batches.send(report.alerts).await.is_err() {
                            warn!(symbol = %detector.symbol(), "dispatcher gone, stopping symbol task");
                            return;
                        }
                    }
                    Err(DetectorError::Invariant(_)) => {
                        stats.invariant_violations.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!(symbol = %detector.symbol(), error = %e, "cycle failed");
                    }
                }
            }
            SymbolCommand::Prune { now_ms, horizon_ms } => {
                let removed = detector.prune(now_ms, horizon_ms);
                stats.cooldowns_pruned.fetch_add(removed as u64, Ordering::Relaxed);
                debug!(
                    symbol = %detector.symbol(),
                    removed,
                    remaining = detector.state().cooldowns.len(),
                    "cooldowns pruned"
                );
            }
        }
    }
    debug!(symbol = %detector.symbol(), "symbol task stopped");
}

/// Periodically prune every symbol's cooldowns. Interval and horizon are
/// re-read from the config on each tick.
pub async fn run_retention(router: Arc<SymbolRouter>, config: SharedConfig) {
    loop {
        let (every, horizon_ms) = {
            let cfg = config.read();
            (
                Duration::from_secs(u64::from(cfg.cleanup_interval_minutes) * 60),
                cfg.retention_horizon_ms(),
            )
        };
        tokio::time::sleep(every).await;
        let now_ms = router.caps.clock.now_ms();
        router.prune_all(now_ms, horizon_ms);
        info!(symbols = router.symbols().len(), horizon_ms, "cooldown retention pass");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::imbalance::ImbalanceResult;
    use crate::providers::{HistoricalDataProvider, ImbalanceAnalyzer};
    use crate::runtime_config::{self, RuntimeConfig};
    use crate::types::{AlertKind, DirectionMode};
    use async_trait::async_trait;

    struct FlatHistory;

    #[async_trait]
    impl HistoricalDataProvider for FlatHistory {
        async fn historical_volumes(
            &self,
            _symbol: &str,
            _hours: u32,
            _offset_minutes: u32,
            _mode: DirectionMode,
        ) -> anyhow::Result<Vec<f64>> {
            Ok(vec![1000.0; 20])
        }

        async fn recent_candles(&self, _symbol: &str, _limit: usize) -> anyhow::Result<Vec<Candle>> {
            Ok(Vec::new())
        }
    }

    /// Never answers for `slow`; flat history for everyone else.
    struct StallingHistory {
        slow: &'static str,
    }

    #[async_trait]
    impl HistoricalDataProvider for StallingHistory {
        async fn historical_volumes(
            &self,
            symbol: &str,
            _hours: u32,
            _offset_minutes: u32,
            _mode: DirectionMode,
        ) -> anyhow::Result<Vec<f64>> {
            if symbol == self.slow {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(vec![1000.0; 20])
        }

        async fn recent_candles(&self, _symbol: &str, _limit: usize) -> anyhow::Result<Vec<Candle>> {
            Ok(Vec::new())
        }
    }

    struct NoPatterns;

    #[async_trait]
    impl ImbalanceAnalyzer for NoPatterns {
        async fn analyze_all(&self, _candles: &[Candle]) -> Option<ImbalanceResult> {
            None
        }
    }

    fn spike(symbol: &str, minute: i64) -> Candle {
        Candle {
            symbol: symbol.into(),
            start_time: minute * 60_000,
            end_time: minute * 60_000 + 59_999,
            open: 100.0,
            high: 111.0,
            low: 99.0,
            close: 110.0,
            volume: 50.0,
            confirmed: true,
        }
    }

    fn router(batches: mpsc::Sender<Vec<AlertRecord>>) -> SymbolRouter {
        router_with(Arc::new(FlatHistory), batches)
    }

    fn router_with(
        history: Arc<dyn HistoricalDataProvider>,
        batches: mpsc::Sender<Vec<AlertRecord>>,
    ) -> SymbolRouter {
        let caps = Arc::new(Capabilities {
            history,
            imbalance: Arc::new(NoPatterns),
            order_book: None,
            closure: None,
            clock: Arc::new(ManualClock::new(1_000_000)),
        });
        SymbolRouter::new(caps, runtime_config::shared(RuntimeConfig::default()), batches)
    }

    #[tokio::test]
    async fn each_symbol_gets_its_own_state() {
        let (tx, mut rx) = mpsc::channel(16);
        let router = router(tx);

        router.route(spike("BTCUSDT", 0));
        router.route(spike("ETHUSDT", 0));
        // Same clock instant: BTC's second spike is cooled down.
        router.route(spike("BTCUSDT", 1));

        let mut symbols = Vec::new();
        for _ in 0..2 {
            let batch = rx.recv().await.unwrap();
            assert_eq!(batch.len(), 1);
            assert_eq!(batch[0].kind(), AlertKind::VolumeSpike);
            symbols.push(batch[0].symbol.clone());
        }
        symbols.sort();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(router.symbols(), vec!["BTCUSDT", "ETHUSDT"]);

        // Prune is queued behind the third candle; once it is handled the
        // counters reflect all three candles.
        router.prune_all(1_000_000, 3_600_000);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(router.stats().snapshot().candles_processed, 3);
        assert_eq!(router.stats().snapshot().cycles_with_alerts, 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_candle_is_counted_not_fatal() {
        let (tx, mut rx) = mpsc::channel(16);
        let router = router(tx);

        let mut bad = spike("SOLUSDT", 0);
        bad.close = f64::NAN;
        router.route(bad);
        router.route(spike("SOLUSDT", 1));

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch[0].symbol, "SOLUSDT");
        assert_eq!(router.stats().snapshot().invariant_violations, 1);
    }

    #[tokio::test]
    async fn stalled_symbol_does_not_block_the_others() {
        let (tx, mut rx) = mpsc::channel(16);
        let router = router_with(Arc::new(StallingHistory { slow: "SLOWUSDT" }), tx);

        for _ in 0..300 {
            let mut tick = spike("SLOWUSDT", 0);
            tick.confirmed = false;
            router.route(tick);
        }
        router.route(spike("FASTUSDT", 0));

        let batch = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("fast symbol held up by the slow one")
            .unwrap();
        assert_eq!(batch[0].symbol, "FASTUSDT");
        assert_eq!(batch[0].kind(), AlertKind::VolumeSpike);
        assert!(router.stats().snapshot().candles_dropped > 0);
    }
}
