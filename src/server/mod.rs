pub mod routes;
pub mod ws;

use crate::state::AppState;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

/// HTTP + WS surface. Unknown paths fall through to the dashboard bundle.
pub fn router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();

    Router::new()
        .route("/api/state", get(routes::get_state))
        .route("/api/stock", post(routes::post_stock))
        .route("/api/select/date", post(routes::post_select_date))
        .route("/api/select/strike", post(routes::post_select_strike))
        .route("/api/option-type", post(routes::post_option_type))
        .route("/api/mode", post(routes::post_mode))
        .route("/api/pl", post(routes::post_pl))
        .route("/api/evaluate", post(routes::post_evaluate))
        .route("/api/portfolio/analyze", post(routes::post_analyze))
        .route("/api/portfolio/optimize", post(routes::post_optimize))
        .route("/api/portfolio/export/returns", post(routes::post_export_returns))
        .route("/api/portfolio/export/prices", post(routes::post_export_prices))
        .route("/api/watchlist", get(routes::get_watchlist))
        .route("/api/watchlist/toggle", post(routes::post_watchlist_toggle))
        .route("/api/watchlist/{key}", delete(routes::delete_watchlist))
        .route(
            "/api/user",
            get(routes::get_user).put(routes::put_user).delete(routes::delete_user),
        )
        .route("/api/counters", get(routes::get_counters))
        .route("/ws", get(ws::ws_handler))
        .fallback_service(ServeDir::new(&static_dir).fallback(ServeFile::new(static_dir.join("index.html"))))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
