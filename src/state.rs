use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::{AppError, AppResult};
use crate::market::chain::{Moneyness, Neighbors, OptionChain, OptionContract};
use crate::market::client::MarketDataClient;
use crate::market::types::{ChainResponse, CompareResponse, ComparisonMode, OptionType, StockQuote, StrikeQuote};
use crate::valuation::calculator::ContractSummary;
use crate::valuation::engine::ValuationResult;
use crate::watchlist::{UserProfile, WatchlistEntry};
use chrono::{DateTime, NaiveDate, Utc};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

// ── Selection identity ──

/// Everything a fetch result depends on. Results are tagged with the key that
/// was current when the fetch was issued and dropped if it no longer matches.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SelectionKey {
    pub ticker: String,
    pub option_type: OptionType,
    pub date: Option<NaiveDate>,
    /// `strike_key` of the selected strike
    pub strike: Option<i64>,
    pub mode: ComparisonMode,
}

impl SelectionKey {
    /// Chain-level identity: quote and chain payloads only depend on these.
    #[inline]
    pub fn same_chain(&self, other: &Self) -> bool {
        self.ticker == other.ticker && self.option_type == other.option_type
    }
}

// ── Application state owned by the controller task ──

#[derive(Debug, Clone)]
pub struct SelectionState {
    pub ticker: String,
    pub option_type: OptionType,
    pub mode: ComparisonMode,
    pub stock: Option<StockQuote>,
    pub chain: Option<OptionChain>,
    pub selected_date: Option<NaiveDate>,
    pub selected_strike: Option<f64>,
    pub comparison: Option<CompareResponse>,
    pub last_valuation: Option<ValuationResult>,
    /// Contracts used for the cost panel, last value passed to a P/L request
    pub quantity: i64,
    pub loading: bool,
}

impl SelectionState {
    pub fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_uppercase(),
            option_type: OptionType::Call,
            mode: ComparisonMode::Date,
            stock: None,
            chain: None,
            selected_date: None,
            selected_strike: None,
            comparison: None,
            last_valuation: None,
            quantity: 1,
            loading: false,
        }
    }

    pub fn key(&self) -> SelectionKey {
        SelectionKey {
            ticker: self.ticker.clone(),
            option_type: self.option_type,
            date: self.selected_date,
            strike: self.selected_strike.map(crate::market::chain::strike_key),
            mode: self.mode,
        }
    }

    /// Underlying price: chain snapshot first, then the quote.
    pub fn spot(&self) -> Option<f64> {
        self.chain
            .as_ref()
            .map(|c| c.current_price)
            .filter(|p| *p > 0.0)
            .or_else(|| self.stock.as_ref().and_then(StockQuote::price_f64))
    }

    /// Drop everything derived from the current chain.
    pub fn clear_chain(&mut self) {
        self.chain = None;
        self.selected_date = None;
        self.selected_strike = None;
        self.comparison = None;
        self.last_valuation = None;
    }

    pub fn selected_contract(&self) -> AppResult<OptionContract> {
        let (Some(date), Some(strike)) = (self.selected_date, self.selected_strike) else {
            return Err(AppError::InvalidInput("select a contract first".into()));
        };
        let chain = self
            .chain
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("no option chain loaded".into()))?;
        chain.contract(date, strike)
    }
}

// ── Messages INTO the controller (bounded channel) ──

/// P/L request for the current selection. Missing target defaults to spot.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct PlRequest {
    #[serde(default)]
    pub target_price: Option<f64>,
    #[serde(default)]
    pub evaluation_date: Option<NaiveDate>,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Debug)]
pub enum ControllerEvent {
    LoadStock { ticker: String },
    SelectDate { date: NaiveDate },
    SelectStrike { strike: f64 },
    SetOptionType { option_type: OptionType },
    SetMode { mode: ComparisonMode },
    /// Ok(None) means the request was throttled
    CalculatePl {
        request: PlRequest,
        reply: oneshot::Sender<AppResult<Option<ValuationResult>>>,
    },
    /// Build a watchlist entry from the current selection
    BuildWatchlistEntry {
        added_at: DateTime<Utc>,
        reply: oneshot::Sender<AppResult<WatchlistEntry>>,
    },
    StockLoaded {
        key: SelectionKey,
        result: AppResult<(StockQuote, ChainResponse)>,
    },
    ChainLoaded {
        key: SelectionKey,
        result: AppResult<ChainResponse>,
    },
    ComparisonLoaded {
        key: SelectionKey,
        result: AppResult<CompareResponse>,
    },
    Shutdown,
}

// ── Messages OUT to dashboard clients ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "snapshot")]
    Snapshot(Box<DashboardSnapshot>),

    #[serde(rename = "loading")]
    Loading { loading: bool },

    #[serde(rename = "valuation")]
    Valuation { result: ValuationResult },

    #[serde(rename = "watchlist")]
    Watchlist { entries: Vec<WatchlistEntry> },

    #[serde(rename = "error")]
    Error { message: String, kind: String },
}

impl WsMessage {
    pub fn error(e: &AppError) -> Self {
        Self::Error { message: e.to_string(), kind: e.kind().to_string() }
    }
}

// ── DB commands (sent to the writer task) ──

#[derive(Debug)]
pub enum DbCommand {
    /// Replies with (added, full list)
    ToggleWatchlist {
        entry: WatchlistEntry,
        reply: oneshot::Sender<AppResult<(bool, Vec<WatchlistEntry>)>>,
    },
    RemoveWatchlist {
        key: String,
        reply: oneshot::Sender<AppResult<Vec<WatchlistEntry>>>,
    },
    SaveUser {
        profile: UserProfile,
        reply: oneshot::Sender<AppResult<()>>,
    },
    ClearUser {
        reply: oneshot::Sender<AppResult<()>>,
    },
}

// ── Dashboard snapshot (watch channel) ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExpirationView {
    pub date: NaiveDate,
    pub days_left: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StrikeView {
    pub strike: f64,
    pub mid: f64,
    pub moneyness: Moneyness,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DashboardSnapshot {
    pub ticker: String,
    pub stock_name: String,
    pub stock: Option<StockQuote>,
    pub spot: Option<f64>,
    pub option_type: OptionType,
    pub mode: ComparisonMode,
    pub expirations: Vec<ExpirationView>,
    pub selected_date: Option<NaiveDate>,
    pub strikes: Vec<StrikeView>,
    pub atm_strike: Option<f64>,
    pub selected_strike: Option<f64>,
    /// Strikes below/above the selection on its expiration
    pub strike_neighbors: Option<Neighbors<f64>>,
    /// Expirations before/after the selected one
    pub date_neighbors: Option<Neighbors<NaiveDate>>,
    pub contract: Option<OptionContract>,
    pub contract_label: Option<String>,
    pub quote: Option<StrikeQuote>,
    pub summary: Option<ContractSummary>,
    pub watchlist_key: Option<String>,
    pub comparison: Option<CompareResponse>,
    pub last_valuation: Option<ValuationResult>,
    pub loading: bool,
    pub updated_at: String,
}

impl Default for DashboardSnapshot {
    fn default() -> Self {
        Self {
            ticker: String::new(),
            stock_name: String::new(),
            stock: None,
            spot: None,
            option_type: OptionType::Call,
            mode: ComparisonMode::Date,
            expirations: Vec::new(),
            selected_date: None,
            strikes: Vec::new(),
            atm_strike: None,
            selected_strike: None,
            strike_neighbors: None,
            date_neighbors: None,
            contract: None,
            contract_label: None,
            quote: None,
            summary: None,
            watchlist_key: None,
            comparison: None,
            last_valuation: None,
            loading: false,
            updated_at: String::new(),
        }
    }
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub events_processed: AtomicU64,
    pub fetches_started: AtomicU64,
    pub fetch_errors: AtomicU64,
    pub stale_responses_dropped: AtomicU64,
    pub valuations_run: AtomicU64,
    pub valuations_throttled: AtomicU64,
    pub ws_messages_sent: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            events_processed: AtomicU64::new(0),
            fetches_started: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            stale_responses_dropped: AtomicU64::new(0),
            valuations_run: AtomicU64::new(0),
            valuations_throttled: AtomicU64::new(0),
            ws_messages_sent: AtomicU64::new(0),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "events_processed": self.events_processed.load(Ordering::Relaxed),
            "fetches_started": self.fetches_started.load(Ordering::Relaxed),
            "fetch_errors": self.fetch_errors.load(Ordering::Relaxed),
            "stale_responses_dropped": self.stale_responses_dropped.load(Ordering::Relaxed),
            "valuations_run": self.valuations_run.load(Ordering::Relaxed),
            "valuations_throttled": self.valuations_throttled.load(Ordering::Relaxed),
            "ws_messages_sent": self.ws_messages_sent.load(Ordering::Relaxed),
        })
    }
}

// ── Application shared state (channels, not locks) ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub client: MarketDataClient,

    // Controller -> Dashboard: latest snapshot
    pub snapshot_tx: watch::Sender<DashboardSnapshot>,
    pub snapshot_rx: watch::Receiver<DashboardSnapshot>,

    // Controller -> Dashboard: event stream for WS clients
    pub ws_tx: broadcast::Sender<WsMessage>,

    // Handlers/fetch tasks -> Controller
    pub controller_tx: mpsc::Sender<ControllerEvent>,

    // -> DB Writer
    pub db_tx: mpsc::Sender<DbCommand>,

    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        client: MarketDataClient,
        controller_tx: mpsc::Sender<ControllerEvent>,
        db_tx: mpsc::Sender<DbCommand>,
    ) -> Arc<Self> {
        let (ws_tx, _) = broadcast::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(DashboardSnapshot::default());

        Arc::new(Self {
            config,
            db,
            client,
            snapshot_tx,
            snapshot_rx,
            ws_tx,
            controller_tx,
            db_tx,
            counters: PerfCounters::new(),
        })
    }

    #[inline]
    pub fn broadcast(&self, msg: WsMessage) {
        self.counters.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        let _ = self.ws_tx.send(msg);
    }

    /// Forward an event to the controller task.
    pub async fn send_event(&self, event: ControllerEvent) -> AppResult<()> {
        self.controller_tx
            .send(event)
            .await
            .map_err(|_| AppError::ChannelClosed("controller".into()))
    }

    pub async fn send_db(&self, cmd: DbCommand) -> AppResult<()> {
        self.db_tx
            .send(cmd)
            .await
            .map_err(|_| AppError::ChannelClosed("db writer".into()))
    }
}
