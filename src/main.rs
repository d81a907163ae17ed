// =============================================================================
// Aurora Signal Detector — Main Entry Point
// =============================================================================
//
// Streams 1-minute Bybit candles for the configured symbols, runs every
// candle through its symbol's detector and fans the resulting alerts out to
// the log, Telegram (when configured), the in-memory history and the
// WebSocket feed.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod bybit;
mod clock;
mod dispatch;
mod engine;
mod error;
mod imbalance;
mod market_data;
mod providers;
mod runtime_config;
mod signals;
mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::bybit::BybitClient;
use crate::clock::{run_time_sync, Clock, ClosureByEndTime, ServerTimeClock};
use crate::dispatch::broadcast::{BroadcastSink, FEED_CAPACITY};
use crate::dispatch::history::AlertHistory;
use crate::dispatch::notify::{LogNotifier, NotificationSink, TelegramNotifier};
use crate::dispatch::Dispatcher;
use crate::engine::SymbolRouter;
use crate::imbalance::PatternAnalyzer;
use crate::market_data::{CandleStore, OrderBookManager};
use crate::providers::{CandleClosure, OrderBookSource};
use crate::runtime_config::RuntimeConfig;
use crate::signals::Capabilities;

/// Candles buffered between the kline stream and the router.
const FEED_QUEUE_DEPTH: usize = 4096;
/// Candles retained per symbol beyond the longest analysis window.
const STORE_HEADROOM: usize = 120;
const TIME_SYNC_EVERY: Duration = Duration::from_secs(300);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Signal Detector — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path = PathBuf::from(
        std::env::var("AURORA_CONFIG_PATH").unwrap_or_else(|_| "runtime_config.json".into()),
    );
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override symbols from env if available.
    if let Ok(syms) = std::env::var("AURORA_SYMBOLS") {
        let syms: Vec<String> = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !syms.is_empty() {
            config.symbols = syms;
        }
    }
    let symbols = config.symbols.clone();
    info!(symbols = ?symbols, "Configured symbols");

    let store_capacity = (config.analysis_hours as usize * 60)
        + config.offset_minutes as usize
        + config.backfill_candles
        + STORE_HEADROOM;
    let verify_close = config.verify_candle_close;
    let orderbook_enabled = config.orderbook_enabled;
    let backfill = config.backfill_candles;
    let config = runtime_config::shared(config);

    // ── 2. Exchange client & clock ───────────────────────────────────────
    let bybit = Arc::new(BybitClient::new()?);
    let clock = Arc::new(ServerTimeClock::new());
    if let Err(e) = clock.sync_once(&bybit).await {
        warn!(error = %e, "Initial server time sync failed, using local clock");
    }
    tokio::spawn(run_time_sync(clock.clone(), bybit.clone(), TIME_SYNC_EVERY));
    let clock: Arc<dyn Clock> = clock;

    // ── 3. Candle history (backfilled) ───────────────────────────────────
    let store = Arc::new(CandleStore::new(store_capacity, clock.clone()));
    for symbol in &symbols {
        match bybit.klines_1m(symbol, backfill, clock.now_ms()).await {
            Ok(candles) => {
                store.record_all(&candles);
                info!(symbol = %symbol, stored = store.count(symbol), "History backfilled");
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "History backfill failed"),
        }
    }

    // ── 4. Order book (optional) ─────────────────────────────────────────
    let order_book: Option<Arc<dyn OrderBookSource>> = if orderbook_enabled {
        let manager = Arc::new(OrderBookManager::new());
        let depth_manager = manager.clone();
        let depth_symbols = symbols.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::orderbook::run_depth_stream(&depth_symbols, &depth_manager).await {
                    error!(error = %e, "Depth stream error, reconnecting in 5s");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });
        Some(manager)
    } else {
        None
    };

    let closure: Option<Arc<dyn CandleClosure>> = if verify_close {
        Some(Arc::new(ClosureByEndTime::new(clock.clone())))
    } else {
        None
    };

    let caps = Arc::new(Capabilities {
        history: store.clone(),
        imbalance: Arc::new(PatternAnalyzer::new(config.clone())),
        order_book,
        closure,
        clock: clock.clone(),
    });

    // ── 5. Dispatcher & sinks ────────────────────────────────────────────
    let (alert_feed, _) = broadcast::channel(FEED_CAPACITY);
    let history = Arc::new(AlertHistory::new());
    let mut dispatcher = Dispatcher::new(DISPATCH_TIMEOUT)
        .with_sink(history.clone())
        .with_sink(Arc::new(BroadcastSink::new(alert_feed.clone(), clock.clone())))
        .with_sink(Arc::new(NotificationSink::new(LogNotifier, config.clone())));
    match TelegramNotifier::from_env() {
        Ok(Some(telegram)) => {
            dispatcher = dispatcher.with_sink(Arc::new(NotificationSink::new(telegram, config.clone())));
        }
        Ok(None) => info!("Telegram not configured, skipping"),
        Err(e) => warn!(error = %e, "Telegram notifier unavailable"),
    }
    let dispatcher = Arc::new(dispatcher);
    let dispatch_stats = dispatcher.stats();

    let (batch_tx, batch_rx) = mpsc::channel(FEED_QUEUE_DEPTH);
    tokio::spawn(dispatch::run_dispatcher(dispatcher, batch_rx));

    // ── 6. Engine ────────────────────────────────────────────────────────
    let router = Arc::new(SymbolRouter::new(caps, config.clone(), batch_tx));
    tokio::spawn(engine::run_retention(router.clone(), config.clone()));

    let (candle_tx, mut candle_rx) = mpsc::channel(FEED_QUEUE_DEPTH);
    let stream_symbols = symbols.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = market_data::kline_stream::run_kline_stream(&stream_symbols, &candle_tx).await {
                error!(error = %e, "Kline stream error, reconnecting in 5s");
            }
            if candle_tx.is_closed() {
                return;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    });

    let feed_store = store.clone();
    let feed_router = router.clone();
    tokio::spawn(async move {
        while let Some(candle) = candle_rx.recv().await {
            feed_store.record(&candle);
            feed_router.route(candle);
        }
    });

    // ── 7. API server ────────────────────────────────────────────────────
    let state = Arc::new(AppState {
        runtime_config: config.clone(),
        config_path: config_path.clone(),
        admin_token: std::env::var("AURORA_ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
        clock,
        candle_store: store,
        engine_stats: router.stats(),
        router,
        dispatch_stats,
        alert_history: history,
        alert_feed,
        started_at: Instant::now(),
    });
    if state.admin_token.is_none() {
        warn!("AURORA_ADMIN_TOKEN not set, settings updates disabled");
    }

    let bind_addr = std::env::var("AURORA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let app = api::rest::router(state.clone());
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "Failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");

    if let Err(e) = state.runtime_config.read().save(&config_path) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Aurora Signal Detector shut down complete.");
    Ok(())
}
