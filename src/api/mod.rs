use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::domain::SeriesKind;
use crate::service::MarketDataService;

/// Read-only snapshot API for the dashboard. All handlers copy data out of
/// the service; nothing here can mutate the quote table or the caches except
/// through the service's own operations.
pub struct AppState {
    pub service: Arc<MarketDataService>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/quotes/{symbol}", get(quotes))
        .route("/api/alerts", get(alerts))
        .route("/api/spread/{symbol}", get(spread))
        .route("/api/history/{coin_id}", get(history))
        .route("/api/ohlcv/{symbol}", get(ohlcv))
        .route("/api/ohlcv/{symbol}/refetch", post(ohlcv_refetch))
        .route("/api/subscribe", post(subscribe))
        .route("/api/unsubscribe", post(unsubscribe))
        .route("/api/reconnect", post(reconnect))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = state.service.status().await;
    Json(serde_json::to_value(status).unwrap_or_default())
}

async fn quotes(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Json<serde_json::Value> {
    let quotes = state.service.quotes_for(&symbol).await;
    Json(serde_json::to_value(quotes).unwrap_or_default())
}

async fn alerts(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let alerts = state.service.alerts().await;
    Json(serde_json::to_value(alerts).unwrap_or_default())
}

#[derive(Deserialize)]
struct SpreadParams {
    /// Comma-separated exchange list, compared in the given order.
    exchanges: String,
    /// Optional candidate trade size in USD for a profit projection.
    amount: Option<f64>,
}

async fn spread(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<SpreadParams>,
) -> Json<serde_json::Value> {
    let exchanges: Vec<String> = params
        .exchanges
        .split(',')
        .filter(|e| !e.is_empty())
        .map(|e| e.to_string())
        .collect();

    let opportunity = state.service.spread_check(&symbol, &exchanges).await;
    let projection = match (&opportunity, params.amount) {
        (Some(opp), Some(amount)) => state.service.project_profit(opp, amount).ok(),
        _ => None,
    };

    Json(serde_json::json!({
        "opportunity": opportunity,
        "projection": projection,
    }))
}

#[derive(Deserialize)]
struct HistoryParams {
    days: String,
    kind: Option<SeriesKind>,
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(coin_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let kind = params.kind.unwrap_or(SeriesKind::Price);
    let series = state
        .service
        .history(&coin_id, &params.days, kind)
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;
    Ok(Json(serde_json::to_value(series).unwrap_or_default()))
}

#[derive(Deserialize)]
struct OhlcvParams {
    timeframe: String,
    limit: u32,
    exchange: Option<String>,
}

async fn ohlcv(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<OhlcvParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let series = state
        .service
        .candles(
            &symbol,
            &params.timeframe,
            params.limit,
            params.exchange.as_deref(),
        )
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;
    Ok(Json(serde_json::to_value(series).unwrap_or_default()))
}

async fn ohlcv_refetch(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<OhlcvParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let series = state
        .service
        .refetch_candles(
            &symbol,
            &params.timeframe,
            params.limit,
            params.exchange.as_deref(),
        )
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;
    Ok(Json(serde_json::to_value(series).unwrap_or_default()))
}

#[derive(Deserialize)]
struct SubscriptionBody {
    #[serde(default)]
    symbols: Vec<String>,
    #[serde(default)]
    exchanges: Vec<String>,
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubscriptionBody>,
) -> Json<serde_json::Value> {
    state.service.subscribe(&body.symbols, &body.exchanges).await;
    let status = state.service.status().await;
    Json(serde_json::to_value(status).unwrap_or_default())
}

async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubscriptionBody>,
) -> Json<serde_json::Value> {
    state.service.unsubscribe(&body.symbols, &body.exchanges).await;
    let status = state.service.status().await;
    Json(serde_json::to_value(status).unwrap_or_default())
}

async fn reconnect(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.service.reconnect().await;
    Json(serde_json::json!({ "status": "connecting" }))
}
