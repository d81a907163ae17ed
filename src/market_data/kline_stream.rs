use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::types::Candle;

// ---------------------------------------------------------------------------
// Bybit public kline WebSocket stream
// ---------------------------------------------------------------------------

/// Bybit v5 public linear (USDT perpetual) stream.
pub const BYBIT_PUBLIC_LINEAR_WS: &str = "wss://stream.bybit.com/v5/public/linear";

/// Bybit drops idle connections after 20 s without an application ping.
const PING_INTERVAL_SECS: u64 = 20;

/// Build the subscription frame for 1-minute klines of every symbol.
pub fn subscribe_frame(symbols: &[String], topic_prefix: &str) -> String {
    let args: Vec<String> = symbols
        .iter()
        .map(|s| format!("{topic_prefix}.{}", s.to_uppercase()))
        .collect();
    serde_json::json!({ "op": "subscribe", "args": args }).to_string()
}

/// Helper: Bybit sends numeric values as JSON strings inside kline objects.
pub(crate) fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

/// Parse a kline push message into zero or more candles.
///
/// Expected shape:
/// ```json
/// { "topic": "kline.1.BTCUSDT", "type": "snapshot", "ts": 1700000000000,
///   "data": [ { "start": 1700000000000, "end": 1700000059999, "interval": "1",
///               "open": "37000", "close": "37020", "high": "37050",
///               "low": "36990", "volume": "123.4", "turnover": "4567890.1",
///               "confirm": false, "timestamp": 1700000012345 } ] }
/// ```
///
/// Control frames (subscription acks, pongs) yield an empty vector.
pub fn parse_kline_message(text: &str) -> Result<Vec<Candle>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse kline JSON")?;

    let Some(topic) = root.get("topic").and_then(|t| t.as_str()) else {
        return Ok(Vec::new());
    };
    if !topic.starts_with("kline.") {
        return Ok(Vec::new());
    }
    let symbol = topic
        .rsplit('.')
        .next()
        .context("kline topic without symbol")?
        .to_uppercase();

    let data = root["data"].as_array().context("missing field data")?;

    data.iter()
        .map(|k| {
            Ok(Candle {
                symbol: symbol.clone(),
                start_time: k["start"].as_i64().context("missing field start")?,
                end_time: k["end"].as_i64().context("missing field end")?,
                open: parse_string_f64(&k["open"], "open")?,
                high: parse_string_f64(&k["high"], "high")?,
                low: parse_string_f64(&k["low"], "low")?,
                close: parse_string_f64(&k["close"], "close")?,
                volume: parse_string_f64(&k["volume"], "volume")?,
                confirmed: k["confirm"].as_bool().context("missing field confirm")?,
            })
        })
        .collect()
}

/// Connect to the Bybit kline stream for `symbols` and forward every candle
/// update into `tx`.
///
/// Runs until the stream disconnects, the receiver is dropped, or an error
/// occurs, then returns so that the caller (main.rs) can handle reconnection.
pub async fn run_kline_stream(symbols: &[String], tx: &mpsc::Sender<Candle>) -> Result<()> {
    info!(url = BYBIT_PUBLIC_LINEAR_WS, symbols = ?symbols, "connecting to kline WebSocket");

    let (ws_stream, _response) = connect_async(BYBIT_PUBLIC_LINEAR_WS)
        .await
        .context("failed to connect to kline WebSocket")?;

    let (mut write, mut read) = ws_stream.split();
    write
        .send(Message::Text(subscribe_frame(symbols, "kline.1")))
        .await
        .context("failed to send kline subscription")?;
    info!(count = symbols.len(), "kline WebSocket connected and subscribed");

    let mut ping = interval(Duration::from_secs(PING_INTERVAL_SECS));

    loop {
        tokio::select! {
            _ = ping.tick() => {
                let frame = serde_json::json!({ "op": "ping" }).to_string();
                write.send(Message::Text(frame)).await.context("failed to send ping")?;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_kline_message(&text) {
                    Ok(candles) => {
                        for candle in candles {
                            debug!(
                                symbol = %candle.symbol,
                                close = candle.close,
                                confirmed = candle.confirmed,
                                "candle update"
                            );
                            if tx.send(candle).await.is_err() {
                                warn!("candle receiver dropped, closing kline stream");
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to parse kline message"),
                },
                // tungstenite answers protocol pings itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "kline WebSocket read error");
                    return Err(e.into());
                }
                None => {
                    warn!("kline WebSocket stream ended");
                    return Ok(());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_lists_topics() {
        let frame = subscribe_frame(&["btcusdt".to_string(), "ETHUSDT".to_string()], "kline.1");
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["op"], "subscribe");
        assert_eq!(v["args"][0], "kline.1.BTCUSDT");
        assert_eq!(v["args"][1], "kline.1.ETHUSDT");
    }

    #[test]
    fn parse_kline_message_ok() {
        let json = r#"{
            "topic": "kline.1.BTCUSDT",
            "type": "snapshot",
            "ts": 1700000012345,
            "data": [{
                "start": 1700000000000,
                "end": 1700000059999,
                "interval": "1",
                "open": "37000.00",
                "close": "37020.00",
                "high": "37050.00",
                "low": "36990.00",
                "volume": "123.456",
                "turnover": "4567890.12",
                "confirm": true,
                "timestamp": 1700000012345
            }]
        }"#;
        let candles = parse_kline_message(json).expect("should parse");
        assert_eq!(candles.len(), 1);
        let c = &candles[0];
        assert_eq!(c.symbol, "BTCUSDT");
        assert_eq!(c.start_time, 1_700_000_000_000);
        assert!((c.close - 37020.0).abs() < f64::EPSILON);
        assert!(c.confirmed);
    }

    #[test]
    fn control_frames_yield_nothing() {
        let ack = r#"{"success":true,"ret_msg":"","conn_id":"x","op":"subscribe"}"#;
        assert!(parse_kline_message(ack).unwrap().is_empty());
        let pong = r#"{"success":true,"ret_msg":"pong","op":"ping"}"#;
        assert!(parse_kline_message(pong).unwrap().is_empty());
    }

    #[test]
    fn missing_field_is_an_error() {
        let json = r#"{"topic":"kline.1.BTCUSDT","data":[{"start":1,"end":2}]}"#;
        assert!(parse_kline_message(json).is_err());
    }
}
