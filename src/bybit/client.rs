// =============================================================================
// Bybit REST API Client — public market endpoints
// =============================================================================
//
// Only unauthenticated endpoints are used: server time (clock sync) and
// klines (history backfill at startup). Bybit wraps every payload in
// `{ "retCode": 0, "retMsg": "OK", "result": {...}, "time": <ms> }`; a
// non-zero retCode is an error even on HTTP 200.
// =============================================================================

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::market_data::kline_stream::parse_string_f64;
use crate::types::Candle;

/// 1-minute kline bucket length in milliseconds.
const KLINE_1M_MS: i64 = 60_000;

/// Bybit caps kline requests at 1000 rows.
const MAX_KLINE_LIMIT: usize = 1000;

/// Bybit public REST client.
#[derive(Clone)]
pub struct BybitClient {
    base_url: String,
    client: reqwest::Client,
}

impl BybitClient {
    /// Create a client against `https://api.bybit.com`.
    pub fn new() -> Result<Self> {
        Self::with_base_url("https://api.bybit.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;
        let base_url = base_url.into();
        debug!(base_url = %base_url, "BybitClient initialised");
        Ok(Self { base_url, client })
    }

    /// GET and unwrap the `{retCode, result}` envelope.
    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("Bybit GET {path} returned {status}: {body}");
        }
        check_ret_code(&body).with_context(|| format!("Bybit GET {path}"))?;
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Market
    // -------------------------------------------------------------------------

    /// GET /v5/market/time: server time in epoch milliseconds.
    #[instrument(skip(self), name = "bybit::server_time")]
    pub async fn server_time_ms(&self) -> Result<i64> {
        let body = self.get_json("/v5/market/time").await?;
        body["time"]
            .as_i64()
            .context("server time response missing 'time'")
    }

    /// GET /v5/market/kline: the last `limit` 1-minute linear klines,
    /// oldest first.  Rows whose bucket has not ended by `now_ms` come back
    /// unconfirmed.
    #[instrument(skip(self), name = "bybit::klines")]
    pub async fn klines_1m(&self, symbol: &str, limit: usize, now_ms: i64) -> Result<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_KLINE_LIMIT);
        let path = format!("/v5/market/kline?category=linear&symbol={symbol}&interval=1&limit={limit}");
        let body = self.get_json(&path).await?;
        let candles = parse_kline_rows(symbol, &body, now_ms)?;
        debug!(symbol, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

fn check_ret_code(body: &serde_json::Value) -> Result<()> {
    match body["retCode"].as_i64() {
        Some(0) => Ok(()),
        Some(code) => anyhow::bail!(
            "retCode {code}: {}",
            body["retMsg"].as_str().unwrap_or("unknown error")
        ),
        None => anyhow::bail!("response missing retCode"),
    }
}

/// Parse `result.list` rows: `[start, open, high, low, close, volume,
/// turnover]`, newest first on the wire.
fn parse_kline_rows(symbol: &str, body: &serde_json::Value, now_ms: i64) -> Result<Vec<Candle>> {
    let rows = body["result"]["list"]
        .as_array()
        .context("kline response missing result.list")?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows.iter().rev() {
        let Some(arr) = row.as_array().filter(|a| a.len() >= 6) else {
            warn!(symbol, "skipping malformed kline row");
            continue;
        };
        let start_time = parse_string_f64(&arr[0], "start")? as i64;
        let end_time = start_time + KLINE_1M_MS - 1;
        candles.push(Candle {
            symbol: symbol.to_uppercase(),
            start_time,
            end_time,
            open: parse_string_f64(&arr[1], "open")?,
            high: parse_string_f64(&arr[2], "high")?,
            low: parse_string_f64(&arr[3], "low")?,
            close: parse_string_f64(&arr[4], "close")?,
            volume: parse_string_f64(&arr[5], "volume")?,
            confirmed: end_time < now_ms,
        });
    }
    Ok(candles)
}
