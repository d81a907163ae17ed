use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::dispatch::AlertSink;
use crate::signals::AlertRecord;

/// Alerts retained for `/api/v1/alerts`.
const MAX_RECENT_ALERTS: usize = 500;

/// In-memory ring of the most recent alerts, newest last.
#[derive(Default)]
pub struct AlertHistory {
    alerts: RwLock<VecDeque<AlertRecord>>,
}

impl AlertHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, alert: AlertRecord) {
        let mut alerts = self.alerts.write();
        if alerts.len() >= MAX_RECENT_ALERTS {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }

    /// Up to `limit` alerts, newest first, optionally for one symbol.
    pub fn recent(&self, symbol: Option<&str>, limit: usize) -> Vec<AlertRecord> {
        self.alerts
            .read()
            .iter()
            .rev()
            .filter(|a| symbol.map_or(true, |s| a.symbol.eq_ignore_ascii_case(s)))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AlertSink for AlertHistory {
    fn name(&self) -> &'static str {
        "history"
    }

    async fn deliver(&self, alert: &AlertRecord) -> anyhow::Result<()> {
        self.push(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::AlertPayload;
    use crate::types::CandleSnapshot;

    fn alert(symbol: &str, count: u32) -> AlertRecord {
        AlertRecord::new(
            symbol,
            0,
            1.0,
            AlertPayload::ConsecutiveLong { consecutive_count: count },
            CandleSnapshot {
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
                alert_level: None,
            },
            None,
        )
    }

    #[tokio::test]
    async fn newest_first_with_symbol_filter() {
        let history = AlertHistory::new();
        history.deliver(&alert("BTCUSDT", 5)).await.unwrap();
        history.deliver(&alert("ETHUSDT", 6)).await.unwrap();
        history.deliver(&alert("BTCUSDT", 7)).await.unwrap();

        let all = history.recent(None, 10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].payload.consecutive_count(), Some(7));

        let btc = history.recent(Some("btcusdt"), 1);
        assert_eq!(btc.len(), 1);
        assert_eq!(btc[0].payload.consecutive_count(), Some(7));
    }

    #[test]
    fn ring_is_bounded() {
        let history = AlertHistory::new();
        for n in 0..(MAX_RECENT_ALERTS as u32 + 3) {
            history.push(alert("BTCUSDT", n));
        }
        let all = history.recent(None, usize::MAX);
        assert_eq!(all.len(), MAX_RECENT_ALERTS);
        assert_eq!(all.last().unwrap().payload.consecutive_count(), Some(3));
    }
}
