use crate::db;
use crate::errors::{AppError, AppResult};
use crate::market::types::{ComparisonMode, OptionType};
use crate::portfolio::analysis::{self, default_range};
use crate::portfolio::export::{self, PriceSeries};
use crate::portfolio::metrics::TickerMetrics;
use crate::portfolio::optimizer;
use crate::state::{AppState, ControllerEvent, DashboardSnapshot, DbCommand, PlRequest, WsMessage};
use crate::valuation::engine::{ContractValuationEngine, ValuationRequest};
use crate::watchlist::UserProfile;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(serde::Deserialize)]
pub struct StockBody {
    pub ticker: String,
}

#[derive(serde::Deserialize)]
pub struct DateBody {
    pub date: NaiveDate,
}

#[derive(serde::Deserialize)]
pub struct StrikeBody {
    pub strike: f64,
}

#[derive(serde::Deserialize)]
pub struct OptionTypeBody {
    pub option_type: OptionType,
}

#[derive(serde::Deserialize)]
pub struct ModeBody {
    pub mode: ComparisonMode,
}

#[derive(serde::Deserialize)]
pub struct AnalyzeBody {
    pub tickers: Vec<String>,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

#[derive(serde::Deserialize)]
pub struct OptimizeBody {
    pub metrics: Vec<TickerMetrics>,
    pub risk_tolerance: f64,
    #[serde(default)]
    pub investment: Option<f64>,
}

#[derive(serde::Deserialize)]
pub struct ReturnsExportBody {
    pub metrics: Vec<TickerMetrics>,
}

#[derive(serde::Deserialize)]
pub struct PricesExportBody {
    pub series: Vec<PriceSeries>,
}

fn error_json(e: &AppError) -> Json<serde_json::Value> {
    Json(e.to_json())
}

fn queued(result: AppResult<()>) -> Json<serde_json::Value> {
    match result {
        Ok(()) => Json(serde_json::json!({ "queued": true })),
        Err(e) => error_json(&e),
    }
}

fn csv_response(filename: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response()
}

/// Round trip through the controller task.
async fn ask_controller<T>(
    state: &AppState,
    build: impl FnOnce(oneshot::Sender<AppResult<T>>) -> ControllerEvent,
) -> AppResult<T> {
    let (tx, rx) = oneshot::channel();
    state.send_event(build(tx)).await?;
    rx.await.map_err(|_| AppError::ChannelClosed("controller reply".into()))?
}

/// Round trip through the db writer task.
async fn ask_db<T>(state: &AppState, build: impl FnOnce(oneshot::Sender<AppResult<T>>) -> DbCommand) -> AppResult<T> {
    let (tx, rx) = oneshot::channel();
    state.send_db(build(tx)).await?;
    rx.await.map_err(|_| AppError::ChannelClosed("db reply".into()))?
}

// ── Selection ──

/// GET /api/state -- current dashboard snapshot (from watch channel, no lock)
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<DashboardSnapshot> {
    let snapshot = state.snapshot_rx.borrow().clone();
    Json(snapshot)
}

pub async fn post_stock(State(state): State<Arc<AppState>>, Json(body): Json<StockBody>) -> Json<serde_json::Value> {
    queued(state.send_event(ControllerEvent::LoadStock { ticker: body.ticker }).await)
}

pub async fn post_select_date(State(state): State<Arc<AppState>>, Json(body): Json<DateBody>) -> Json<serde_json::Value> {
    queued(state.send_event(ControllerEvent::SelectDate { date: body.date }).await)
}

pub async fn post_select_strike(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StrikeBody>,
) -> Json<serde_json::Value> {
    if !body.strike.is_finite() || body.strike <= 0.0 {
        return error_json(&AppError::InvalidInput(format!("strike must be positive, got {}", body.strike)));
    }
    queued(state.send_event(ControllerEvent::SelectStrike { strike: body.strike }).await)
}

pub async fn post_option_type(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OptionTypeBody>,
) -> Json<serde_json::Value> {
    queued(state.send_event(ControllerEvent::SetOptionType { option_type: body.option_type }).await)
}

pub async fn post_mode(State(state): State<Arc<AppState>>, Json(body): Json<ModeBody>) -> Json<serde_json::Value> {
    queued(state.send_event(ControllerEvent::SetMode { mode: body.mode }).await)
}

// ── Valuation ──

/// POST /api/pl -- P/L for the current selection (throttled)
pub async fn post_pl(State(state): State<Arc<AppState>>, Json(request): Json<PlRequest>) -> Json<serde_json::Value> {
    match ask_controller(&state, |reply| ControllerEvent::CalculatePl { request, reply }).await {
        Ok(Some(result)) => Json(serde_json::json!({ "result": result })),
        Ok(None) => Json(serde_json::json!({ "throttled": true })),
        Err(e) => error_json(&e),
    }
}

/// POST /api/evaluate -- stateless evaluation of an explicit request
pub async fn post_evaluate(Json(request): Json<ValuationRequest>) -> Json<serde_json::Value> {
    match ContractValuationEngine::today().evaluate(&request) {
        Ok(result) => Json(serde_json::json!({ "result": result })),
        Err(e) => error_json(&e),
    }
}

// ── Portfolio ──

pub async fn post_analyze(State(state): State<Arc<AppState>>, Json(body): Json<AnalyzeBody>) -> Json<serde_json::Value> {
    let (default_start, default_end) = default_range(Utc::now().date_naive());
    let start = body.start.unwrap_or(default_start);
    let end = body.end.unwrap_or(default_end);

    match analysis::analyze(&state.client, &body.tickers, start, end).await {
        Ok(result) => Json(serde_json::json!(result)),
        Err(e) => error_json(&e),
    }
}

pub async fn post_optimize(State(state): State<Arc<AppState>>, Json(body): Json<OptimizeBody>) -> Json<serde_json::Value> {
    let investment = body.investment.unwrap_or(state.config.default_investment);
    let metrics: BTreeMap<String, TickerMetrics> = body
        .metrics
        .into_iter()
        .map(|m| (m.ticker.to_uppercase(), m))
        .collect();

    match optimizer::optimize(&metrics, body.risk_tolerance, investment) {
        Ok(result) => Json(serde_json::json!(result)),
        Err(e) => error_json(&e),
    }
}

pub async fn post_export_returns(Json(body): Json<ReturnsExportBody>) -> Response {
    csv_response("stock_returns.csv", export::returns_csv(&body.metrics))
}

pub async fn post_export_prices(Json(body): Json<PricesExportBody>) -> Response {
    if body.series.is_empty() {
        return error_json(&AppError::InsufficientData("analyze stocks first".into())).into_response();
    }
    csv_response("stock_prices.csv", export::prices_csv(&body.series))
}

// ── Watchlist ──

pub async fn get_watchlist(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match db::load_watchlist(&state.db) {
        Ok(entries) => Json(serde_json::json!({ "entries": entries })),
        Err(e) => error_json(&e),
    }
}

/// POST /api/watchlist/toggle -- add/remove the currently selected contract
pub async fn post_watchlist_toggle(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let result = async {
        let added_at = Utc::now();
        let entry = ask_controller(&state, |reply| ControllerEvent::BuildWatchlistEntry { added_at, reply }).await?;
        let key = entry.key.clone();
        let (added, entries) = ask_db(&state, |reply| DbCommand::ToggleWatchlist { entry, reply }).await?;
        Ok::<_, AppError>((key, added, entries))
    }
    .await;

    match result {
        Ok((key, added, entries)) => {
            state.broadcast(WsMessage::Watchlist { entries: entries.clone() });
            Json(serde_json::json!({ "key": key, "added": added, "entries": entries }))
        }
        Err(e) => error_json(&e),
    }
}

pub async fn delete_watchlist(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Json<serde_json::Value> {
    match ask_db(&state, |reply| DbCommand::RemoveWatchlist { key, reply }).await {
        Ok(entries) => {
            state.broadcast(WsMessage::Watchlist { entries: entries.clone() });
            Json(serde_json::json!({ "entries": entries }))
        }
        Err(e) => error_json(&e),
    }
}

// ── User ──

pub async fn get_user(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match db::load_user(&state.db) {
        Ok(user) => Json(serde_json::json!({ "user": user })),
        Err(e) => error_json(&e),
    }
}

pub async fn put_user(State(state): State<Arc<AppState>>, Json(profile): Json<UserProfile>) -> Json<serde_json::Value> {
    let user = profile.clone();
    match ask_db(&state, |reply| DbCommand::SaveUser { profile, reply }).await {
        Ok(()) => Json(serde_json::json!({ "user": user })),
        Err(e) => error_json(&e),
    }
}

pub async fn delete_user(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match ask_db(&state, |reply| DbCommand::ClearUser { reply }).await {
        Ok(()) => Json(serde_json::json!({ "user": null })),
        Err(e) => error_json(&e),
    }
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.counters.to_json())
}
