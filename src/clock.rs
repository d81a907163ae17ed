// =============================================================================
// Time Source — UTC epoch-millisecond clocks
// =============================================================================
//
// Every alert timestamp and every cooldown decision reads the injected
// `Clock`. Two implementations:
//
//   - ServerTimeClock  local time corrected by an offset measured against the
//                      exchange server (half round-trip latency compensation,
//                      median of several samples). Falls back to local time
//                      until the first successful sync.
//   - ManualClock      test clock advanced explicitly.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::bybit::BybitClient;
use crate::providers::CandleClosure;
use crate::types::Candle;

/// Injectable UTC clock.
pub trait Clock: Send + Sync {
    /// Current UTC time in epoch milliseconds.
    fn now_ms(&self) -> i64;

    /// Whether the clock is synchronised against an authoritative source.
    fn is_synced(&self) -> bool {
        false
    }
}

fn local_now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// ServerTimeClock
// =============================================================================

/// Samples taken per sync; the median offset is applied.
const SYNC_SAMPLES: usize = 5;

/// Offsets above this are logged as drift.
const DRIFT_WARN_MS: i64 = 1_000;

/// Local clock corrected by the measured exchange offset:
/// `server_time = local_time + offset`.
#[derive(Debug, Default)]
pub struct ServerTimeClock {
    offset_ms: AtomicI64,
    synced: AtomicBool,
}

impl ServerTimeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a set of `(local_before, server, local_after)` samples.
    ///
    /// Each sample's offset assumes the server stamped its reply halfway
    /// through the round trip. The median offset wins.
    pub fn apply_samples(&self, samples: &[(i64, i64, i64)]) -> Result<i64> {
        if samples.is_empty() {
            bail!("no time samples to apply");
        }
        let mut offsets: Vec<i64> = samples
            .iter()
            .map(|&(before, server, after)| server - (before + (after - before) / 2))
            .collect();
        offsets.sort_unstable();
        let median = offsets[offsets.len() / 2];

        let previous = self.offset_ms.swap(median, Ordering::Relaxed);
        self.synced.store(true, Ordering::Relaxed);

        if (median - previous).abs() > DRIFT_WARN_MS {
            warn!(previous, offset_ms = median, "clock offset drifted");
        }
        debug!(offset_ms = median, samples = samples.len(), "server time offset applied");
        Ok(median)
    }

    /// Take [`SYNC_SAMPLES`] round trips against the exchange and apply them.
    pub async fn sync_once(&self, client: &BybitClient) -> Result<i64> {
        let mut samples = Vec::with_capacity(SYNC_SAMPLES);
        for _ in 0..SYNC_SAMPLES {
            let before = local_now_ms();
            let server = client.server_time_ms().await?;
            let after = local_now_ms();
            samples.push((before, server, after));
        }
        self.apply_samples(&samples)
    }
}

impl Clock for ServerTimeClock {
    fn now_ms(&self) -> i64 {
        local_now_ms() + self.offset_ms.load(Ordering::Relaxed)
    }

    fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Relaxed)
    }
}

/// Periodically resynchronise `clock` with the exchange. Runs forever.
pub async fn run_time_sync(clock: Arc<ServerTimeClock>, client: Arc<BybitClient>, every: Duration) {
    loop {
        match clock.sync_once(&client).await {
            Ok(offset) => info!(offset_ms = offset, "server time synchronised"),
            Err(e) => warn!(error = %e, "server time sync failed, keeping previous offset"),
        }
        tokio::time::sleep(every).await;
    }
}

// =============================================================================
// ManualClock
// =============================================================================

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn is_synced(&self) -> bool {
        true
    }
}

// =============================================================================
// Closure predicate
// =============================================================================

/// Treats a candle as closed once the clock has passed its bucket end.
pub struct ClosureByEndTime {
    clock: Arc<dyn Clock>,
}

impl ClosureByEndTime {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl CandleClosure for ClosureByEndTime {
    fn is_closed(&self, candle: &Candle) -> bool {
        self.clock.now_ms() >= candle.end_time
    }
}
