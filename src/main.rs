mod config;
mod controller;
mod db;
mod errors;
mod market;
mod portfolio;
mod server;
mod state;
mod valuation;
mod watchlist;

use crate::market::client::MarketDataClient;
use crate::state::*;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    eprintln!("[option_tracker] binary started, setting up logging...");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("option tracker starting");

    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(
        origin = %cfg.app_origin,
        api = %cfg.market_api_base_url,
        ticker = %cfg.default_ticker,
        "config loaded"
    );

    let db_pool = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    // Bounded channels
    let (controller_tx, controller_rx) = mpsc::channel::<ControllerEvent>(512);
    let (db_tx, db_rx) = mpsc::channel::<DbCommand>(1024);

    let client = MarketDataClient::new(&cfg.market_api_base_url, cfg.http_timeout_secs);
    let shutdown_tx = controller_tx.clone();
    let app_state = AppState::new(cfg.clone(), db_pool.clone(), client.clone(), controller_tx, db_tx);

    // ── Spawn tasks ──

    // 1. DB writer (owns all writes)
    tokio::spawn(db::run_db_writer(db_pool, db_rx));

    // 2. Market API warmup / keep-alive
    tokio::spawn(market::client::run_keepalive(client, cfg.keepalive_interval_secs));

    // 3. View controller (selection state, fetch sequencing, valuation)
    tokio::spawn(controller::run_controller(app_state.clone(), controller_rx));

    // 4. Axum HTTP + WS server
    let app = server::router(app_state);
    let addr = format!("0.0.0.0:{}", cfg.server_port);
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        tracing::error!("bind error: {e}");
        std::process::exit(1);
    });

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
    {
        tracing::error!("server error: {e}");
    }
}

/// Resolves on ctrl-c after telling the controller to stop.
async fn shutdown_signal(controller_tx: mpsc::Sender<ControllerEvent>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("ctrl-c handler error: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
    let _ = controller_tx.send(ControllerEvent::Shutdown).await;
}
