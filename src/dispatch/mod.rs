// =============================================================================
// Dispatcher — fans produced alerts out to independent sinks
// =============================================================================
//
// Every alert goes to every sink. Each delivery runs under its own timeout;
// a sink that errors or stalls is logged and skipped, never retried, and
// never delays or blocks delivery to the other sinks.
//
// Batches arrive from the symbol tasks over one channel and are handled in
// arrival order; alerts inside a batch keep the detector's cycle order.
// =============================================================================

pub mod broadcast;
pub mod history;
pub mod notify;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::signals::AlertRecord;
use crate::types::AlertKind;

/// A destination for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, alert: &AlertRecord) -> anyhow::Result<()>;
}

/// Delivery counters exposed on `/api/v1/stats`.
#[derive(Debug, Default)]
pub struct DispatchStats {
    by_kind: RwLock<HashMap<AlertKind, u64>>,
    sink_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchStatsSnapshot {
    pub alerts_by_kind: HashMap<AlertKind, u64>,
    pub total_alerts: u64,
    pub sink_failures: u64,
}

impl DispatchStats {
    fn count(&self, kind: AlertKind) {
        *self.by_kind.write().entry(kind).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        let alerts_by_kind = self.by_kind.read().clone();
        DispatchStatsSnapshot {
            total_alerts: alerts_by_kind.values().sum(),
            alerts_by_kind,
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct Dispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
    timeout: Duration,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sinks: Vec::new(),
            timeout,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        info!(sink = sink.name(), "alert sink registered");
        self.sinks.push(sink);
        self
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Deliver one alert to every sink. Returns the failures, already logged.
    pub async fn dispatch(&self, alert: &AlertRecord) -> Vec<DispatchError> {
        self.stats.count(alert.kind());

        let deliveries = self.sinks.iter().map(|sink| self.deliver_one(sink.as_ref(), alert));
        let failures: Vec<DispatchError> = join_all(deliveries)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        for err in &failures {
            warn!(symbol = %alert.symbol, kind = %alert.kind(), error = %err, "alert delivery failed");
        }
        self.stats
            .sink_failures
            .fetch_add(failures.len() as u64, Ordering::Relaxed);
        failures
    }

    /// Deliver a cycle's alerts in order.
    pub async fn dispatch_batch(&self, batch: &[AlertRecord]) {
        for alert in batch {
            self.dispatch(alert).await;
        }
    }

    async fn deliver_one(&self, sink: &dyn AlertSink, alert: &AlertRecord) -> Result<(), DispatchError> {
        let timeout_ms = self.timeout.as_millis() as u64;
        match tokio::time::timeout(self.timeout, sink.deliver(alert)).await {
            Ok(Ok(())) => {
                debug!(sink = sink.name(), id = %alert.id, "alert delivered");
                Ok(())
            }
            Ok(Err(source)) => Err(DispatchError::Rejected {
                sink: sink.name(),
                source,
            }),
            Err(_) => Err(DispatchError::Timeout {
                sink: sink.name(),
                timeout_ms,
            }),
        }
    }
}

/// Drain cycle batches until every producer is gone.
pub async fn run_dispatcher(dispatcher: Arc<Dispatcher>, mut batches: mpsc::Receiver<Vec<AlertRecord>>) {
    info!(sinks = dispatcher.sinks.len(), "dispatcher started");
    while let Some(batch) = batches.recv().await {
        dispatcher.dispatch_batch(&batch).await;
    }
    info!("dispatcher stopped");
}
