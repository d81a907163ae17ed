// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Reads are public; changing settings
// requires the admin Bearer token checked by the `AdminAuth` extractor.
//
// CORS is permissive so a dashboard on another origin can read the feed.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AdminAuth;
use crate::app_state::AppState;

/// Upper bound on `/api/v1/alerts?limit=`.
const MAX_ALERTS_PAGE: usize = 500;

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/alerts", get(alerts))
        .route("/api/v1/candles/:symbol", get(candles))
        // ── Settings (POST is admin-only) ───────────────────────────
        .route("/api/v1/settings", get(get_settings).post(update_settings))
        // ── WebSocket ───────────────────────────────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health / stats
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
    utc_synced: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: state.now_ms(),
        utc_synced: state.clock.is_synced(),
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stats())
}

// =============================================================================
// Alerts / candles
// =============================================================================

#[derive(Deserialize)]
struct AlertsQuery {
    symbol: Option<String>,
    limit: Option<usize>,
}

async fn alerts(State(state): State<Arc<AppState>>, Query(query): Query<AlertsQuery>) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).min(MAX_ALERTS_PAGE);
    Json(state.alert_history.recent(query.symbol.as_deref(), limit))
}

#[derive(Deserialize)]
struct CandlesQuery {
    limit: Option<usize>,
}

async fn candles(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(symbol): axum::extract::Path<String>,
    Query(query): Query<CandlesQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(60);
    Json(state.candle_store.latest(&symbol.to_uppercase(), limit))
}

// =============================================================================
// Settings
// =============================================================================

async fn get_settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.settings())
}

async fn update_settings(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<serde_json::Value>,
) -> impl IntoResponse {
    match state.apply_settings(patch) {
        Ok(updated) => {
            info!("settings updated via API");
            (StatusCode::OK, Json(serde_json::to_value(updated).unwrap_or_default())).into_response()
        }
        Err(e) => {
            warn!(error = %e, "settings update rejected");
            let body = serde_json::json!({ "error": format!("{e:#}") });
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        }
    }
}
