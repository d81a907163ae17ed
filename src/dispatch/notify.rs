// =============================================================================
// Notification sink — one notifier call per alert kind
// =============================================================================
//
// `NotificationSink` maps every `AlertKind` to exactly one `Notifier` method.
// The match is exhaustive, so adding a kind forces a notifier decision.
//
// Two notifiers ship: `LogNotifier` (structured log line, always on) and
// `TelegramNotifier` (Bot API `sendMessage`, enabled when a bot token and a
// chat id are configured).
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::dispatch::AlertSink;
use crate::runtime_config::SharedConfig;
use crate::signals::{AlertPayload, AlertRecord};
use crate::types::AlertKind;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_preliminary(&self, alert: &AlertRecord) -> Result<()>;
    async fn send_final(&self, alert: &AlertRecord) -> Result<()>;
    async fn send_volume(&self, alert: &AlertRecord) -> Result<()>;
    async fn send_consecutive(&self, alert: &AlertRecord) -> Result<()>;
    async fn send_priority(&self, alert: &AlertRecord) -> Result<()>;
}

/// Routes alerts to a notifier while `notification_enabled` is set.
pub struct NotificationSink<N> {
    notifier: N,
    config: SharedConfig,
}

impl<N: Notifier> NotificationSink<N> {
    pub fn new(notifier: N, config: SharedConfig) -> Self {
        Self { notifier, config }
    }
}

#[async_trait]
impl<N: Notifier> AlertSink for NotificationSink<N> {
    fn name(&self) -> &'static str {
        self.notifier.name()
    }

    async fn deliver(&self, alert: &AlertRecord) -> Result<()> {
        if !self.config.read().notification_enabled {
            debug!(notifier = self.notifier.name(), "notifications disabled, skipping");
            return Ok(());
        }
        match alert.kind() {
            AlertKind::PreliminaryVolumeSpike => self.notifier.send_preliminary(alert).await,
            AlertKind::FinalVolumeSpike => self.notifier.send_final(alert).await,
            AlertKind::VolumeSpike => self.notifier.send_volume(alert).await,
            AlertKind::ConsecutiveLong => self.notifier.send_consecutive(alert).await,
            AlertKind::Priority => self.notifier.send_priority(alert).await,
        }
    }
}

// =============================================================================
// Message formatting
// =============================================================================

fn headline(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::PreliminaryVolumeSpike => "⏳ Preliminary volume spike",
        AlertKind::FinalVolumeSpike => "🏁 Volume spike resolved",
        AlertKind::VolumeSpike => "📊 Volume spike",
        AlertKind::ConsecutiveLong => "📈 Consecutive LONG candles",
        AlertKind::Priority => "🔥 PRIORITY signal",
    }
}

/// Human-readable message body shared by every notifier.
pub fn format_alert(alert: &AlertRecord) -> String {
    let mut lines = vec![
        format!("{}: {}", headline(alert.kind()), alert.symbol),
        format!("Price: {}", alert.price),
    ];

    match &alert.payload {
        AlertPayload::VolumeSpike(f) | AlertPayload::PreliminaryVolumeSpike(f) => {
            lines.push(format!("Volume: {}x average", f.volume_ratio));
            lines.push(format!(
                "Current: {} USDT / average: {} USDT",
                f.current_volume_usdt, f.average_volume_usdt
            ));
        }
        AlertPayload::FinalVolumeSpike {
            figures,
            is_true_signal,
            ..
        } => {
            lines.push(format!(
                "Outcome: {}",
                if *is_true_signal { "held (true signal)" } else { "failed (false signal)" }
            ));
            lines.push(format!("Volume: {}x average", figures.volume_ratio));
        }
        AlertPayload::ConsecutiveLong { consecutive_count } => {
            lines.push(format!("Run: {consecutive_count} candles"));
        }
        AlertPayload::Priority {
            consecutive_count,
            volume,
        } => {
            lines.push(format!("Run: {consecutive_count} candles"));
            if let Some(f) = volume {
                lines.push(format!("Volume: {}x average", f.volume_ratio));
            }
        }
    }

    if let Some(imbalance) = &alert.imbalance_data {
        lines.push(format!(
            "Imbalance: {:?} {:?} [{} .. {}]",
            imbalance.kind, imbalance.direction, imbalance.bottom, imbalance.top
        ));
    }
    if let Some(book) = &alert.order_book_snapshot {
        lines.push(format!(
            "Book: spread {:.1} bps, imbalance {:+.2}",
            book.spread_bps, book.imbalance
        ));
    }
    lines.join("\n")
}

// =============================================================================
// LogNotifier
// =============================================================================

/// Writes every alert to the log.
pub struct LogNotifier;

impl LogNotifier {
    fn emit(&self, alert: &AlertRecord) -> Result<()> {
        info!(
            symbol = %alert.symbol,
            kind = %alert.kind(),
            price = alert.price,
            id = %alert.id,
            "{}",
            format_alert(alert).replace('\n', " | ")
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send_preliminary(&self, alert: &AlertRecord) -> Result<()> {
        self.emit(alert)
    }

    async fn send_final(&self, alert: &AlertRecord) -> Result<()> {
        self.emit(alert)
    }

    async fn send_volume(&self, alert: &AlertRecord) -> Result<()> {
        self.emit(alert)
    }

    async fn send_consecutive(&self, alert: &AlertRecord) -> Result<()> {
        self.emit(alert)
    }

    async fn send_priority(&self, alert: &AlertRecord) -> Result<()> {
        self.emit(alert)
    }
}

// =============================================================================
// TelegramNotifier
// =============================================================================

pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`; `None` if unset.
    pub fn from_env() -> Result<Option<Self>> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").unwrap_or_default();
        if token.is_empty() || chat_id.is_empty() {
            return Ok(None);
        }
        Self::new(token, chat_id).map(Some)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("telegram sendMessage request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("telegram sendMessage returned {status}: {detail}");
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send_preliminary(&self, alert: &AlertRecord) -> Result<()> {
        self.send_text(format_alert(alert)).await
    }

    async fn send_final(&self, alert: &AlertRecord) -> Result<()> {
        self.send_text(format_alert(alert)).await
    }

    async fn send_volume(&self, alert: &AlertRecord) -> Result<()> {
        self.send_text(format_alert(alert)).await
    }

    async fn send_consecutive(&self, alert: &AlertRecord) -> Result<()> {
        self.send_text(format_alert(alert)).await
    }

    async fn send_priority(&self, alert: &AlertRecord) -> Result<()> {
        self.send_text(format_alert(alert)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::{self, RuntimeConfig};
    use crate::signals::alert::VolumeFigures;
    use crate::types::CandleSnapshot;
    use parking_lot::Mutex;

    /// Records which method was called.
    #[derive(Default)]
    struct Calls(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl Notifier for Calls {
        fn name(&self) -> &'static str {
            "calls"
        }
        async fn send_preliminary(&self, _a: &AlertRecord) -> Result<()> {
            self.0.lock().push("preliminary");
            Ok(())
        }
        async fn send_final(&self, _a: &AlertRecord) -> Result<()> {
            self.0.lock().push("final");
            Ok(())
        }
        async fn send_volume(&self, _a: &AlertRecord) -> Result<()> {
            self.0.lock().push("volume");
            Ok(())
        }
        async fn send_consecutive(&self, _a: &AlertRecord) -> Result<()> {
            self.0.lock().push("consecutive");
            Ok(())
        }
        async fn send_priority(&self, _a: &AlertRecord) -> Result<()> {
            self.0.lock().push("priority");
            Ok(())
        }
    }

    fn figures() -> VolumeFigures {
        VolumeFigures {
            volume_ratio: 3.25,
            current_volume_usdt: 3250.0,
            average_volume_usdt: 1000.0,
        }
    }

    fn alert(payload: AlertPayload) -> AlertRecord {
        AlertRecord::new(
            "DOGEUSDT",
            0,
            0.1,
            payload,
            CandleSnapshot {
                open: 0.09,
                high: 0.1,
                low: 0.09,
                close: 0.1,
                volume: 1.0,
                alert_level: None,
            },
            None,
        )
    }

    fn every_kind() -> Vec<AlertRecord> {
        vec![
            alert(AlertPayload::PreliminaryVolumeSpike(figures())),
            alert(AlertPayload::FinalVolumeSpike {
                figures: figures(),
                is_true_signal: true,
                preliminary_timestamp: 0,
            }),
            alert(AlertPayload::VolumeSpike(figures())),
            alert(AlertPayload::ConsecutiveLong { consecutive_count: 5 }),
            alert(AlertPayload::Priority {
                consecutive_count: 5,
                volume: Some(figures()),
            }),
        ]
    }

    #[tokio::test]
    async fn each_kind_reaches_its_own_method() {
        let sink = NotificationSink::new(Calls::default(), runtime_config::shared(RuntimeConfig::default()));
        for a in every_kind() {
            sink.deliver(&a).await.unwrap();
        }
        assert_eq!(
            *sink.notifier.0.lock(),
            vec!["preliminary", "final", "volume", "consecutive", "priority"]
        );
    }

    #[tokio::test]
    async fn disabled_notifications_are_skipped() {
        let cfg = RuntimeConfig {
            notification_enabled: false,
            ..RuntimeConfig::default()
        };
        let sink = NotificationSink::new(Calls::default(), runtime_config::shared(cfg));
        sink.deliver(&every_kind()[0]).await.unwrap();
        assert!(sink.notifier.0.lock().is_empty());
    }

    #[test]
    fn formatted_messages_mention_key_figures() {
        let kinds = every_kind();
        let text = format_alert(&kinds[1]);
        assert!(text.contains("DOGEUSDT"));
        assert!(text.contains("true signal"));
        assert!(text.contains("3.25x"));

        let text = format_alert(&kinds[4]);
        assert!(text.starts_with("🔥 PRIORITY signal"));
        assert!(text.contains("Run: 5 candles"));
    }
}
