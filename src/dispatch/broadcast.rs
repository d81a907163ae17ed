// =============================================================================
// Realtime broadcast sink — feeds `/api/v1/ws` subscribers
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::clock::Clock;
use crate::dispatch::AlertSink;
use crate::signals::AlertRecord;

/// Frames buffered for slow WebSocket clients before they start lagging.
pub const FEED_CAPACITY: usize = 1024;

/// Wire envelope pushed to every connected client.
#[derive(Debug, Serialize)]
pub struct AlertEnvelope<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub alert: &'a AlertRecord,
    pub server_timestamp: i64,
    pub utc_synced: bool,
}

pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
    clock: Arc<dyn Clock>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<String>, clock: Arc<dyn Clock>) -> Self {
        Self { tx, clock }
    }
}

#[async_trait]
impl AlertSink for BroadcastSink {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn deliver(&self, alert: &AlertRecord) -> anyhow::Result<()> {
        let envelope = AlertEnvelope {
            kind: "new_alert",
            alert,
            server_timestamp: self.clock.now_ms(),
            utc_synced: self.clock.is_synced(),
        };
        let frame = serde_json::to_string(&envelope).context("failed to serialise alert envelope")?;

        // No subscribers is not a delivery failure.
        match self.tx.send(frame) {
            Ok(receivers) => debug!(receivers, id = %alert.id, "alert broadcast"),
            Err(_) => debug!(id = %alert.id, "alert broadcast with no subscribers"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::signals::AlertPayload;
    use crate::types::CandleSnapshot;

    #[tokio::test]
    async fn envelope_shape() {
        let (tx, mut rx) = broadcast::channel(8);
        let sink = BroadcastSink::new(tx, Arc::new(ManualClock::new(42)));
        let alert = AlertRecord::new(
            "XRPUSDT",
            40,
            0.5,
            AlertPayload::ConsecutiveLong { consecutive_count: 7 },
            CandleSnapshot {
                open: 0.4,
                high: 0.5,
                low: 0.4,
                close: 0.5,
                volume: 1.0,
                alert_level: Some(0.5),
            },
            None,
        );

        sink.deliver(&alert).await.unwrap();
        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "new_alert");
        assert_eq!(frame["server_timestamp"], 42);
        assert_eq!(frame["utc_synced"], true);
        assert_eq!(frame["alert"]["alert_type"], "consecutive_long");
        assert_eq!(frame["alert"]["consecutive_count"], 7);
    }

    #[tokio::test]
    async fn no_subscribers_is_ok() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let sink = BroadcastSink::new(tx, Arc::new(ManualClock::new(0)));
        let alert = AlertRecord::new(
            "XRPUSDT",
            0,
            0.5,
            AlertPayload::ConsecutiveLong { consecutive_count: 5 },
            CandleSnapshot {
                open: 0.4,
                high: 0.5,
                low: 0.4,
                close: 0.5,
                volume: 1.0,
                alert_level: None,
            },
            None,
        );
        assert!(sink.deliver(&alert).await.is_ok());
    }
}
