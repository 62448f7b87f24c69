use crate::errors::{AppError, AppResult};
use crate::market::chain::{days_left, OptionChain};
use crate::market::types::{ChainResponse, CompareRequest, OptionType, StockQuote};
use crate::state::*;
use crate::valuation::calculator::{summarize, RecalcThrottle};
use crate::valuation::engine::{ContractValuationEngine, ValuationRequest, ValuationResult};
use crate::watchlist::{entry_key, WatchlistEntry};
use chrono::NaiveDate;
use portable_atomic::Ordering;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// Side effects requested by the controller. Executed by the async shell.
#[derive(Debug)]
pub enum ControllerAction {
    /// Quote then chain for `key.ticker` / `key.option_type`
    FetchStock { key: SelectionKey },
    FetchChain { key: SelectionKey },
    FetchComparison { key: SelectionKey, request: CompareRequest },
    /// Push the current snapshot to the watch channel and WS clients
    Publish,
    Broadcast(WsMessage),
    ReplyValuation {
        reply: oneshot::Sender<AppResult<Option<ValuationResult>>>,
        result: AppResult<Option<ValuationResult>>,
    },
    ReplyEntry {
        reply: oneshot::Sender<AppResult<WatchlistEntry>>,
        result: AppResult<WatchlistEntry>,
    },
    StaleDropped { what: &'static str },
    FetchFailed { what: &'static str, error: AppError },
}

pub type Actions = SmallVec<[ControllerAction; 8]>;

/// Owns the selection state. `handle` does no IO.
pub struct ViewController {
    state: SelectionState,
    throttle: RecalcThrottle,
    today: NaiveDate,
}

impl ViewController {
    pub fn new(ticker: &str, recalc_interval: Duration, today: NaiveDate) -> Self {
        Self {
            state: SelectionState::new(ticker),
            throttle: RecalcThrottle::new(recalc_interval),
            today,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn set_today(&mut self, today: NaiveDate) {
        self.today = today;
    }

    pub fn handle(&mut self, event: ControllerEvent, now: Instant) -> Actions {
        let mut out = Actions::new();
        let changed = match event {
            ControllerEvent::LoadStock { ticker } => self.load_stock(&ticker, &mut out),
            ControllerEvent::SetOptionType { option_type } => self.set_option_type(option_type, &mut out),
            ControllerEvent::SetMode { mode } => {
                self.state.mode = mode;
                self.state.comparison = None;
                self.request_comparison(&mut out);
                true
            }
            ControllerEvent::SelectDate { date } => match self.select_date(date, &mut out) {
                Ok(()) => true,
                Err(e) => {
                    out.push(ControllerAction::Broadcast(WsMessage::error(&e)));
                    false
                }
            },
            ControllerEvent::SelectStrike { strike } => match self.select_strike(strike, &mut out) {
                Ok(()) => true,
                Err(e) => {
                    out.push(ControllerAction::Broadcast(WsMessage::error(&e)));
                    false
                }
            },
            ControllerEvent::CalculatePl { request, reply } => {
                if !self.throttle.try_acquire(now) {
                    out.push(ControllerAction::ReplyValuation { reply, result: Ok(None) });
                    false
                } else {
                    let result = self.evaluate_selection(&request);
                    let changed = match &result {
                        Ok(v) => {
                            self.state.last_valuation = Some(*v);
                            out.push(ControllerAction::Broadcast(WsMessage::Valuation { result: *v }));
                            true
                        }
                        Err(_) => false,
                    };
                    out.push(ControllerAction::ReplyValuation { reply, result: result.map(Some) });
                    changed
                }
            }
            ControllerEvent::BuildWatchlistEntry { added_at, reply } => {
                let result = self.state.selected_contract().map(|c| {
                    let name = self
                        .state
                        .stock
                        .as_ref()
                        .map(|q| q.display_name(&self.state.ticker).to_string())
                        .unwrap_or_default();
                    WatchlistEntry::new(
                        &self.state.ticker,
                        c.strike,
                        c.expiration_date,
                        c.option_type,
                        &name,
                        c.mid,
                        added_at,
                    )
                });
                out.push(ControllerAction::ReplyEntry { reply, result });
                false
            }
            ControllerEvent::StockLoaded { key, result } => {
                let current = self.state.key();
                if key.ticker != current.ticker {
                    out.push(ControllerAction::StaleDropped { what: "stock" });
                    return out;
                }
                if !key.same_chain(&current) {
                    // Side switched mid-flight: the quote still belongs to this
                    // ticker, the chain does not. The pending FetchChain owns loading.
                    out.push(ControllerAction::StaleDropped { what: "chain" });
                    return match result {
                        Ok((quote, _)) => {
                            self.state.stock = Some(quote);
                            out.push(ControllerAction::Publish);
                            out
                        }
                        Err(_) => out,
                    };
                }
                self.state.loading = false;
                out.push(ControllerAction::Broadcast(WsMessage::Loading { loading: false }));
                match result {
                    Ok((quote, chain)) => {
                        self.state.stock = Some(quote);
                        self.apply_chain(chain, &mut out);
                    }
                    Err(error) => out.push(ControllerAction::FetchFailed { what: "stock", error }),
                }
                true
            }
            ControllerEvent::ChainLoaded { key, result } => {
                if !key.same_chain(&self.state.key()) {
                    out.push(ControllerAction::StaleDropped { what: "chain" });
                    return out;
                }
                self.state.loading = false;
                out.push(ControllerAction::Broadcast(WsMessage::Loading { loading: false }));
                match result {
                    Ok(chain) => self.apply_chain(chain, &mut out),
                    Err(error) => out.push(ControllerAction::FetchFailed { what: "chain", error }),
                }
                true
            }
            ControllerEvent::ComparisonLoaded { key, result } => {
                if key != self.state.key() {
                    out.push(ControllerAction::StaleDropped { what: "comparison" });
                    return out;
                }
                match result {
                    Ok(cmp) => {
                        self.state.comparison = Some(cmp);
                        true
                    }
                    Err(error) => {
                        out.push(ControllerAction::FetchFailed { what: "comparison", error });
                        false
                    }
                }
            }
            ControllerEvent::Shutdown => false,
        };

        if changed {
            out.push(ControllerAction::Publish);
        }
        out
    }

    fn load_stock(&mut self, ticker: &str, out: &mut Actions) -> bool {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            let e = AppError::InvalidInput("ticker is required".into());
            out.push(ControllerAction::Broadcast(WsMessage::error(&e)));
            return false;
        }
        tracing::info!(ticker = %ticker, "loading stock");

        self.state.ticker = ticker;
        self.state.stock = None;
        self.state.clear_chain();
        self.state.loading = true;

        out.push(ControllerAction::FetchStock { key: self.state.key() });
        out.push(ControllerAction::Broadcast(WsMessage::Loading { loading: true }));
        true
    }

    fn set_option_type(&mut self, option_type: OptionType, out: &mut Actions) -> bool {
        if option_type == self.state.option_type && self.state.chain.is_some() {
            return false;
        }
        self.state.option_type = option_type;
        self.state.clear_chain();
        self.state.loading = true;

        out.push(ControllerAction::FetchChain { key: self.state.key() });
        out.push(ControllerAction::Broadcast(WsMessage::Loading { loading: true }));
        true
    }

    fn apply_chain(&mut self, resp: ChainResponse, out: &mut Actions) {
        let mut chain = OptionChain::from_response(&self.state.ticker, self.state.option_type, resp);
        if chain.current_price <= 0.0 {
            if let Some(p) = self.state.stock.as_ref().and_then(StockQuote::price_f64) {
                chain.current_price = p;
            }
        }
        if chain.is_empty() {
            let e = AppError::InsufficientData(format!(
                "no {} listed for {}",
                self.state.option_type, self.state.ticker
            ));
            out.push(ControllerAction::Broadcast(WsMessage::error(&e)));
        }
        let first = chain.first_expiration();
        tracing::info!(
            ticker = %self.state.ticker,
            option_type = %self.state.option_type,
            expirations = chain.expirations().len(),
            "chain loaded"
        );

        self.state.clear_chain();
        self.state.chain = Some(chain);

        if let Some(date) = first {
            // first expiration always exists in the chain just stored
            let _ = self.select_date(date, out);
        }
    }

    /// Select an expiration and snap to its ATM strike.
    fn select_date(&mut self, date: NaiveDate, out: &mut Actions) -> AppResult<()> {
        let chain = self
            .state
            .chain
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("no option chain loaded".into()))?;
        if !chain.has_date(date) {
            return Err(AppError::MissingContract(format!("expiration {date} not in chain")));
        }
        let atm = chain.find_atm(date);

        self.state.selected_date = Some(date);
        self.state.selected_strike = None;
        self.state.comparison = None;
        self.state.last_valuation = None;

        if let Some(strike) = atm {
            self.select_strike(strike, out)?;
        }
        Ok(())
    }

    fn select_strike(&mut self, strike: f64, out: &mut Actions) -> AppResult<()> {
        let date = self
            .state
            .selected_date
            .ok_or_else(|| AppError::InvalidInput("select an expiration first".into()))?;
        let chain = self
            .state
            .chain
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("no option chain loaded".into()))?;
        let listed = chain.quote(date, strike)?.strike;

        self.state.selected_strike = Some(listed);
        self.state.comparison = None;
        self.state.last_valuation = None;
        self.request_comparison(out);
        Ok(())
    }

    fn request_comparison(&self, out: &mut Actions) {
        let (Some(date), Some(strike)) = (self.state.selected_date, self.state.selected_strike) else {
            return;
        };
        out.push(ControllerAction::FetchComparison {
            key: self.state.key(),
            request: CompareRequest {
                ticker: self.state.ticker.clone(),
                date,
                strike,
                option_type: self.state.option_type,
            },
        });
    }

    fn evaluate_selection(&mut self, request: &PlRequest) -> AppResult<ValuationResult> {
        let contract = self.state.selected_contract()?;
        let spot = self.state.spot();
        let target = request
            .target_price
            .or(spot)
            .ok_or_else(|| AppError::InvalidInput("enter a valid target price".into()))?;
        let quantity = request.quantity.unwrap_or(self.state.quantity).max(1);
        self.state.quantity = quantity;

        let req = ValuationRequest {
            contract,
            underlying_spot_at_selection: spot.unwrap_or(f64::NAN),
            target_underlying_price: target,
            evaluation_date: request.evaluation_date,
            quantity,
        };
        let result = ContractValuationEngine::new(self.today).evaluate(&req)?;
        tracing::debug!(
            target,
            quantity,
            value = result.estimated_option_value,
            pl = result.profit_loss,
            "valuation"
        );
        Ok(result)
    }

    pub fn snapshot(&self, updated_at: String) -> DashboardSnapshot {
        let s = &self.state;
        let chain = s.chain.as_ref();
        let spot = s.spot();

        let expirations = chain
            .map(|c| {
                c.expirations()
                    .into_iter()
                    .map(|date| ExpirationView { date, days_left: days_left(date, self.today) })
                    .collect()
            })
            .unwrap_or_default();

        let (strikes, atm_strike) = match (chain, s.selected_date) {
            (Some(c), Some(date)) => {
                let strikes = c
                    .strikes(date)
                    .iter()
                    .filter_map(|&k| {
                        c.quote(date, k).ok().map(|q| StrikeView {
                            strike: k,
                            mid: q.mid_price(),
                            moneyness: c.moneyness(date, k),
                        })
                    })
                    .collect();
                (strikes, c.find_atm(date))
            }
            _ => (Vec::new(), None),
        };

        let strike_neighbors = match (chain, s.selected_date, s.selected_strike) {
            (Some(c), Some(d), Some(k)) => c.strike_neighbors(d, k),
            _ => None,
        };
        let date_neighbors = match (chain, s.selected_date) {
            (Some(c), Some(d)) => c.date_neighbors(d).ok(),
            _ => None,
        };

        let contract = s.selected_contract().ok();
        let quote = match (chain, s.selected_date, s.selected_strike) {
            (Some(c), Some(d), Some(k)) => c.quote(d, k).ok().cloned(),
            _ => None,
        };

        DashboardSnapshot {
            ticker: s.ticker.clone(),
            stock_name: s
                .stock
                .as_ref()
                .map(|q| q.display_name(&s.ticker).to_string())
                .unwrap_or_else(|| s.ticker.clone()),
            stock: s.stock.clone(),
            spot,
            option_type: s.option_type,
            mode: s.mode,
            expirations,
            selected_date: s.selected_date,
            strikes,
            atm_strike,
            selected_strike: s.selected_strike,
            strike_neighbors,
            date_neighbors,
            contract_label: contract.as_ref().map(|c| c.label()),
            summary: contract
                .as_ref()
                .map(|c| summarize(c, s.quantity, spot.unwrap_or(0.0))),
            watchlist_key: contract
                .as_ref()
                .map(|c| entry_key(&s.ticker, c.strike, c.expiration_date, c.option_type)),
            contract,
            quote,
            comparison: s.comparison.clone(),
            last_valuation: s.last_valuation,
            loading: s.loading,
            updated_at,
        }
    }
}

// ── Async shell ──

/// Controller task: owns the `ViewController`, executes its actions.
pub async fn run_controller(state: Arc<AppState>, mut rx: mpsc::Receiver<ControllerEvent>) {
    tracing::info!("controller task started");

    let mut controller = ViewController::new(
        &state.config.default_ticker,
        Duration::from_millis(state.config.recalc_interval_ms),
        chrono::Utc::now().date_naive(),
    );

    let initial = ControllerEvent::LoadStock { ticker: state.config.default_ticker.clone() };
    let actions = controller.handle(initial, Instant::now());
    execute_actions(actions, &controller, &state);

    while let Some(event) = rx.recv().await {
        if matches!(event, ControllerEvent::Shutdown) {
            break;
        }
        state.counters.events_processed.fetch_add(1, Ordering::Relaxed);
        controller.set_today(chrono::Utc::now().date_naive());
        let actions = controller.handle(event, Instant::now());
        execute_actions(actions, &controller, &state);
    }

    tracing::info!("controller task shutting down");
}

fn execute_actions(actions: Actions, controller: &ViewController, state: &Arc<AppState>) {
    for action in actions {
        match action {
            ControllerAction::FetchStock { key } => {
                state.counters.fetches_started.fetch_add(1, Ordering::Relaxed);
                let client = state.client.clone();
                let tx = state.controller_tx.clone();
                tokio::spawn(async move {
                    let result = async {
                        let quote = client.get_price(&key.ticker).await?;
                        let chain = client.get_chain(&key.ticker, key.option_type).await?;
                        Ok::<_, AppError>((quote, chain))
                    }
                    .await;
                    let _ = tx.send(ControllerEvent::StockLoaded { key, result }).await;
                });
            }
            ControllerAction::FetchChain { key } => {
                state.counters.fetches_started.fetch_add(1, Ordering::Relaxed);
                let client = state.client.clone();
                let tx = state.controller_tx.clone();
                tokio::spawn(async move {
                    let result = client.get_chain(&key.ticker, key.option_type).await;
                    let _ = tx.send(ControllerEvent::ChainLoaded { key, result }).await;
                });
            }
            ControllerAction::FetchComparison { key, request } => {
                state.counters.fetches_started.fetch_add(1, Ordering::Relaxed);
                let client = state.client.clone();
                let tx = state.controller_tx.clone();
                tokio::spawn(async move {
                    let result = client.compare(key.mode, &request).await;
                    let _ = tx.send(ControllerEvent::ComparisonLoaded { key, result }).await;
                });
            }
            ControllerAction::Publish => {
                let snapshot = controller.snapshot(chrono::Utc::now().to_rfc3339());
                let _ = state.snapshot_tx.send(snapshot.clone());
                state.broadcast(WsMessage::Snapshot(Box::new(snapshot)));
            }
            ControllerAction::Broadcast(msg) => state.broadcast(msg),
            ControllerAction::ReplyValuation { reply, result } => {
                match &result {
                    Ok(Some(_)) => {
                        state.counters.valuations_run.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(None) => {
                        state.counters.valuations_throttled.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => tracing::debug!(error = %e, "valuation rejected"),
                }
                let _ = reply.send(result);
            }
            ControllerAction::ReplyEntry { reply, result } => {
                let _ = reply.send(result);
            }
            ControllerAction::StaleDropped { what } => {
                state.counters.stale_responses_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(what, "dropped response for superseded selection");
            }
            ControllerAction::FetchFailed { what, error } => {
                state.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(what, error = %error, "fetch failed");
                state.broadcast(WsMessage::error(&error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::chain::strike_key;
    use crate::market::types::{ChainExpiry, CompareResponse, ComparisonMode, StrikeQuote};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn q(strike: f64, mid: f64) -> StrikeQuote {
        StrikeQuote {
            strike,
            bid: Some(mid - 0.5),
            ask: Some(mid + 0.5),
            mid: Some(mid),
            ..Default::default()
        }
    }

    fn chain_resp() -> ChainResponse {
        ChainResponse {
            ticker: Some("MSFT".into()),
            current_price: Some(412.0),
            option_type: Some("calls".into()),
            chain: vec![
                ChainExpiry { date: "2026-11-20".into(), strikes: vec![q(400.0, 18.0), q(410.0, 12.0), q(420.0, 7.0)] },
                ChainExpiry { date: "2026-12-18".into(), strikes: vec![q(400.0, 24.0), q(410.0, 18.0)] },
            ],
        }
    }

    fn quote() -> StockQuote {
        StockQuote { ticker: Some("MSFT".into()), name: Some("Microsoft".into()), price: Some(412.0), ..Default::default() }
    }

    fn controller() -> ViewController {
        ViewController::new("msft", Duration::from_millis(300), d(2026, 10, 19))
    }

    fn fetch_stock_key(actions: &Actions) -> SelectionKey {
        actions
            .iter()
            .find_map(|a| match a {
                ControllerAction::FetchStock { key } => Some(key.clone()),
                _ => None,
            })
            .expect("no FetchStock action")
    }

    fn comparison_key(actions: &Actions) -> Option<SelectionKey> {
        actions.iter().find_map(|a| match a {
            ControllerAction::FetchComparison { key, .. } => Some(key.clone()),
            _ => None,
        })
    }

    fn stale_count(actions: &Actions) -> usize {
        actions.iter().filter(|a| matches!(a, ControllerAction::StaleDropped { .. })).count()
    }

    /// Controller with MSFT loaded and the first expiration / ATM strike selected.
    fn loaded(now: Instant) -> (ViewController, SelectionKey) {
        let mut c = controller();
        let actions = c.handle(ControllerEvent::LoadStock { ticker: "msft".into() }, now);
        let key = fetch_stock_key(&actions);
        let actions = c.handle(ControllerEvent::StockLoaded { key, result: Ok((quote(), chain_resp())) }, now);
        let cmp_key = comparison_key(&actions).expect("comparison should be requested");
        (c, cmp_key)
    }

    fn pl(c: &mut ViewController, request: PlRequest, now: Instant) -> AppResult<Option<ValuationResult>> {
        let (reply, _rx) = oneshot::channel();
        let actions = c.handle(ControllerEvent::CalculatePl { request, reply }, now);
        for a in actions {
            if let ControllerAction::ReplyValuation { result, .. } = a {
                return result;
            }
        }
        panic!("no valuation reply");
    }

    #[test]
    fn test_load_selects_first_date_and_atm_strike() {
        let (c, cmp_key) = loaded(Instant::now());
        let s = c.state();
        assert!(!s.loading);
        assert_eq!(s.selected_date, Some(d(2026, 11, 20)));
        assert_eq!(s.selected_strike, Some(410.0));
        assert_eq!(cmp_key, s.key());
        assert_eq!(cmp_key.strike, Some(strike_key(410.0)));
    }

    #[test]
    fn test_stale_stock_response_dropped_after_ticker_change() {
        let mut c = controller();
        let now = Instant::now();
        let msft = fetch_stock_key(&c.handle(ControllerEvent::LoadStock { ticker: "MSFT".into() }, now));
        let _aapl = fetch_stock_key(&c.handle(ControllerEvent::LoadStock { ticker: "aapl".into() }, now));

        let actions = c.handle(ControllerEvent::StockLoaded { key: msft, result: Ok((quote(), chain_resp())) }, now);
        assert_eq!(stale_count(&actions), 1);
        assert!(!actions.iter().any(|a| matches!(a, ControllerAction::Publish)));
        assert_eq!(c.state().ticker, "AAPL");
        assert!(c.state().chain.is_none(), "MSFT chain must not land on AAPL");
        assert!(c.state().loading);
    }

    #[test]
    fn test_stale_comparison_dropped_after_strike_change() {
        let now = Instant::now();
        let (mut c, first) = loaded(now);

        let actions = c.handle(ControllerEvent::SelectStrike { strike: 420.0 }, now);
        let second = comparison_key(&actions).unwrap();
        assert_ne!(first, second);

        let actions = c.handle(ControllerEvent::ComparisonLoaded { key: first, result: Ok(CompareResponse::default()) }, now);
        assert_eq!(stale_count(&actions), 1);
        assert!(c.state().comparison.is_none());

        let actions = c.handle(ControllerEvent::ComparisonLoaded { key: second, result: Ok(CompareResponse::default()) }, now);
        assert_eq!(stale_count(&actions), 0);
        assert!(c.state().comparison.is_some());
    }

    #[test]
    fn test_mode_change_invalidates_pending_comparison() {
        let now = Instant::now();
        let (mut c, date_key) = loaded(now);
        let actions = c.handle(ControllerEvent::SetMode { mode: ComparisonMode::Strike }, now);
        let strike_mode = comparison_key(&actions).unwrap();
        assert_eq!(strike_mode.mode, ComparisonMode::Strike);

        let actions = c.handle(ControllerEvent::ComparisonLoaded { key: date_key, result: Ok(CompareResponse::default()) }, now);
        assert_eq!(stale_count(&actions), 1);
    }

    #[test]
    fn test_option_type_change_refetches_chain() {
        let now = Instant::now();
        let (mut c, _) = loaded(now);
        let actions = c.handle(ControllerEvent::SetOptionType { option_type: OptionType::Put }, now);
        let key = actions
            .iter()
            .find_map(|a| match a {
                ControllerAction::FetchChain { key } => Some(key.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(key.option_type, OptionType::Put);
        assert!(c.state().selected_strike.is_none());

        // call chain arriving late is ignored
        let mut call_key = key.clone();
        call_key.option_type = OptionType::Call;
        let actions = c.handle(ControllerEvent::ChainLoaded { key: call_key, result: Ok(chain_resp()) }, now);
        assert_eq!(stale_count(&actions), 1);

        c.handle(ControllerEvent::ChainLoaded { key, result: Ok(chain_resp()) }, now);
        assert_eq!(c.state().selected_strike, Some(410.0));
        assert_eq!(c.state().selected_contract().unwrap().option_type, OptionType::Put);
    }

    #[test]
    fn test_quote_kept_when_side_switches_during_stock_fetch() {
        let mut c = controller();
        let now = Instant::now();
        let calls = fetch_stock_key(&c.handle(ControllerEvent::LoadStock { ticker: "MSFT".into() }, now));
        let actions = c.handle(ControllerEvent::SetOptionType { option_type: OptionType::Put }, now);
        let puts = actions
            .iter()
            .find_map(|a| match a {
                ControllerAction::FetchChain { key } => Some(key.clone()),
                _ => None,
            })
            .unwrap();

        let actions = c.handle(ControllerEvent::StockLoaded { key: calls, result: Ok((quote(), chain_resp())) }, now);
        assert_eq!(stale_count(&actions), 1, "call chain is dropped");
        assert!(actions.iter().any(|a| matches!(a, ControllerAction::Publish)));
        assert!(c.state().chain.is_none());
        assert!(c.state().loading, "put chain still pending");
        assert_eq!(c.state().stock.as_ref().and_then(|q| q.name.as_deref()), Some("Microsoft"));

        c.handle(ControllerEvent::ChainLoaded { key: puts, result: Ok(chain_resp()) }, now);
        assert_eq!(c.state().selected_strike, Some(410.0));
        assert_eq!(c.snapshot("t".into()).stock_name, "Microsoft");
        assert_eq!(c.state().selected_contract().unwrap().option_type, OptionType::Put);
    }

    #[test]
    fn test_unknown_strike_is_reported_and_selection_kept() {
        let now = Instant::now();
        let (mut c, _) = loaded(now);
        let actions = c.handle(ControllerEvent::SelectStrike { strike: 415.0 }, now);
        assert!(actions.iter().any(|a| matches!(
            a,
            ControllerAction::Broadcast(WsMessage::Error { kind, .. }) if kind == "missing_contract"
        )));
        assert_eq!(c.state().selected_strike, Some(410.0));

        let actions = c.handle(ControllerEvent::SelectDate { date: d(2027, 1, 15) }, now);
        assert!(actions.iter().any(|a| matches!(a, ControllerAction::Broadcast(WsMessage::Error { .. }))));
        assert_eq!(c.state().selected_date, Some(d(2026, 11, 20)));
    }

    #[test]
    fn test_empty_chain_is_reported() {
        let mut c = controller();
        let now = Instant::now();
        let key = fetch_stock_key(&c.handle(ControllerEvent::LoadStock { ticker: "MSFT".into() }, now));
        let empty = ChainResponse { current_price: Some(412.0), ..Default::default() };
        let actions = c.handle(ControllerEvent::StockLoaded { key, result: Ok((quote(), empty)) }, now);
        assert!(actions.iter().any(|a| matches!(
            a,
            ControllerAction::Broadcast(WsMessage::Error { kind, .. }) if kind == "insufficient_data"
        )));
        assert!(c.state().selected_date.is_none());
        assert!(!c.state().loading);
    }

    #[test]
    fn test_fetch_error_clears_loading() {
        let mut c = controller();
        let now = Instant::now();
        let key = fetch_stock_key(&c.handle(ControllerEvent::LoadStock { ticker: "ZZZZ".into() }, now));
        let actions = c.handle(
            ControllerEvent::StockLoaded { key, result: Err(AppError::MarketApi { status: 404, body: "not found".into() }) },
            now,
        );
        assert!(!c.state().loading);
        assert!(actions.iter().any(|a| matches!(a, ControllerAction::FetchFailed { what: "stock", .. })));
    }

    #[test]
    fn test_pl_for_selected_contract() {
        let now = Instant::now();
        let (mut c, _) = loaded(now);
        let req = PlRequest { target_price: Some(430.0), evaluation_date: None, quantity: Some(2) };
        let v = pl(&mut c, req, now).unwrap().unwrap();
        // intrinsic 20 * 100 * 2 vs 12 * 100 * 2
        assert!((v.estimated_option_value - 4000.0).abs() < 1e-9);
        assert!((v.total_cost - 2400.0).abs() < 1e-9);
        assert!((v.profit_loss - 1600.0).abs() < 1e-9);
        assert_eq!(c.state().quantity, 2);
        assert_eq!(c.state().last_valuation, Some(v));
    }

    #[test]
    fn test_pl_defaults_target_to_spot() {
        let now = Instant::now();
        let (mut c, _) = loaded(now);
        let v = pl(&mut c, PlRequest::default(), now).unwrap().unwrap();
        // spot 412, strike 410: intrinsic 2
        assert!((v.estimated_option_value - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_pl_throttled_inside_interval() {
        let t0 = Instant::now();
        let (mut c, _) = loaded(t0);
        let req = || PlRequest { target_price: Some(430.0), ..Default::default() };
        assert!(pl(&mut c, req(), t0).unwrap().is_some());
        assert!(pl(&mut c, req(), t0 + Duration::from_millis(120)).unwrap().is_none());
        assert!(pl(&mut c, req(), t0 + Duration::from_millis(300)).unwrap().is_some());
    }

    #[test]
    fn test_pl_without_selection() {
        let mut c = controller();
        let err = pl(&mut c, PlRequest { target_price: Some(100.0), ..Default::default() }, Instant::now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let now = Instant::now();
        let (mut c, _) = loaded(now);
        let err = pl(&mut c, PlRequest { target_price: Some(-5.0), ..Default::default() }, now).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_watchlist_entry_from_selection() {
        let now = Instant::now();
        let (mut c, _) = loaded(now);
        let (reply, _rx) = oneshot::channel();
        let added_at = chrono::Utc::now();
        let actions = c.handle(ControllerEvent::BuildWatchlistEntry { added_at, reply }, now);
        let entry = actions
            .into_iter()
            .find_map(|a| match a {
                ControllerAction::ReplyEntry { result, .. } => Some(result),
                _ => None,
            })
            .unwrap()
            .unwrap();
        assert_eq!(entry.key, "MSFT_410_2026-11-20_calls");
        assert_eq!(entry.stock_name, "Microsoft");
        assert_eq!(entry.mid, 12.0);
    }

    #[test]
    fn test_snapshot_reflects_selection() {
        let now = Instant::now();
        let (c, _) = loaded(now);
        let snap = c.snapshot("t".into());
        assert_eq!(snap.ticker, "MSFT");
        assert_eq!(snap.stock_name, "Microsoft");
        assert_eq!(snap.expirations.len(), 2);
        assert_eq!(snap.expirations[0].days_left, 32);
        assert_eq!(snap.strikes.len(), 3);
        assert_eq!(snap.atm_strike, Some(410.0));
        assert_eq!(snap.contract_label.as_deref(), Some("$410C Nov 20, 26"));
        assert_eq!(snap.summary.unwrap().breakeven, 422.0);
        assert_eq!(snap.watchlist_key.as_deref(), Some("MSFT_410_2026-11-20_calls"));
        let strikes = snap.strike_neighbors.unwrap();
        assert_eq!((strikes.lower, strikes.upper), (Some(400.0), Some(420.0)));
        let dates = snap.date_neighbors.unwrap();
        assert_eq!((dates.lower, dates.upper), (None, Some(d(2026, 12, 18))));

        let json = serde_json::to_value(WsMessage::Snapshot(Box::new(snap))).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["option_type"], "calls");
    }
}
