// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Public endpoints (health) require no authentication. The OHLCV query
// endpoints require a valid Bearer token checked via the `AuthBearer`
// extractor.
//
// Query endpoints take the candle period and a millisecond timestamp as path
// segments, plus an optional `?pair=` parameter defaulting to the first
// configured pair. An unrecognized period answers 404; an unknown pair
// answers an empty array, mirroring the in-memory query semantics.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::types::Period;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/ohlcv/:period/:from_ts", get(ohlcv_range))
        .route("/close/:period/:from_ts", get(close_range))
        .route("/current_close/:period", get(current_close))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Common extractors
// =============================================================================

#[derive(Deserialize)]
struct PairParam {
    #[serde(default)]
    pair: Option<String>,
}

/// Parse a period path segment, or reject with a 404 JSON error.
fn parse_period(raw: &str) -> Result<Period, (StatusCode, Json<serde_json::Value>)> {
    raw.parse::<Period>().map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("Unknown period: '{raw}'. Use '1m', '1h' or '1d'."),
            })),
        )
    })
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let series: Vec<_> = state
        .engine
        .series_overview()
        .into_iter()
        .map(|(key, buf_state, len)| {
            json!({
                "series": key.to_string(),
                "state": buf_state,
                "candles": len,
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "exchange": state.exchange(),
        "tracked_series": state.engine.tracked(),
        "series": series,
        "rate_tokens_available": state.limiter.available(),
        "uptime_secs": state.uptime_secs(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// OHLCV queries (authenticated)
// =============================================================================

async fn ohlcv_range(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((period, from_ts)): Path<(String, i64)>,
    Query(params): Query<PairParam>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let period = parse_period(&period)?;
    let pair = params.pair.unwrap_or_else(|| state.default_pair());
    Ok(Json(state.query.get_range(&pair, period, from_ts)))
}

async fn close_range(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((period, from_ts)): Path<(String, i64)>,
    Query(params): Query<PairParam>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let period = parse_period(&period)?;
    let pair = params.pair.unwrap_or_else(|| state.default_pair());
    Ok(Json(state.query.get_close_range(&pair, period, from_ts)))
}

/// Latest close as an array of zero or one points, so clients consume the
/// same shape as the range endpoints.
async fn current_close(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(period): Path<String>,
    Query(params): Query<PairParam>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let period = parse_period(&period)?;
    let pair = params.pair.unwrap_or_else(|| state.default_pair());
    let points: Vec<_> = state.query.get_latest_close(&pair, period).into_iter().collect();
    Ok(Json(points))
}

// =============================================================================
// Tests
// =============================================================================
