use super::export::{best_and_worst, Performer};
use super::metrics::{compute_metrics, TickerMetrics};
use crate::errors::{AppError, AppResult};
use crate::market::client::MarketDataClient;
use crate::market::history::{normalize, simulate_history};
use crate::market::types::PricePoint;
use chrono::{Months, NaiveDate};
use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

/// Upper bound on tickers per request; each one costs two backend calls.
pub const MAX_TICKERS: usize = 25;
/// Longest accepted analysis window, in months.
pub const MAX_RANGE_MONTHS: u32 = 120;

#[derive(Debug, Clone, serde::Serialize)]
pub struct TickerAnalysis {
    pub metrics: TickerMetrics,
    pub history: Vec<PricePoint>,
    /// True when the history endpoint gave nothing and the path was simulated
    pub simulated: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PortfolioAnalysis {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub tickers: Vec<TickerAnalysis>,
    pub failed: Vec<String>,
    pub best: Option<Performer>,
    pub worst: Option<Performer>,
}

/// Trim, upper-case and de-duplicate, keeping first-seen order. Blank entries
/// are dropped; comma-separated entries are split.
pub fn parse_tickers<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .flat_map(|s| s.as_ref().split(','))
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// One calendar year back from `today`.
pub fn default_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today
        .checked_sub_months(Months::new(12))
        .unwrap_or(today - chrono::Duration::days(365));
    (start, today)
}

/// Reject inverted or oversized windows before anything is fetched or simulated.
pub fn validate_range(start: NaiveDate, end: NaiveDate) -> AppResult<()> {
    if start > end {
        return Err(AppError::InvalidInput(format!("start {start} is after end {end}")));
    }
    let earliest = end.checked_sub_months(Months::new(MAX_RANGE_MONTHS)).unwrap_or(NaiveDate::MIN);
    if start < earliest {
        return Err(AppError::InvalidInput(format!(
            "range {start}..{end} exceeds {} years",
            MAX_RANGE_MONTHS / 12
        )));
    }
    Ok(())
}

async fn fetch_history(client: &MarketDataClient, ticker: &str, start: NaiveDate, end: NaiveDate) -> Option<Vec<PricePoint>> {
    match client.get_history(ticker, start, end).await {
        Ok(resp) => {
            let points = normalize(resp.history);
            if points.is_empty() {
                tracing::debug!(ticker, "history endpoint returned no points");
                None
            } else {
                Some(points)
            }
        }
        Err(e) => {
            tracing::debug!(ticker, error = %e, "history unavailable");
            None
        }
    }
}

async fn analyze_ticker(
    client: &MarketDataClient,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> AppResult<TickerAnalysis> {
    let quote = client.get_price(ticker).await?;
    let price = quote.price_f64().ok_or(AppError::NoPriceData)?;

    let (history, simulated) = match fetch_history(client, ticker, start, end).await {
        Some(h) => (h, false),
        None => {
            let mut rng = StdRng::from_entropy();
            (simulate_history(&mut rng, price, start, end), true)
        }
    };

    let metrics = compute_metrics(ticker, price, Some(&quote), &history)?;
    Ok(TickerAnalysis { metrics, history, simulated })
}

/// Fetch quote + history for every ticker concurrently and derive metrics.
/// Tickers that fail are skipped; fails only when none succeed.
pub async fn analyze(
    client: &MarketDataClient,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> AppResult<PortfolioAnalysis> {
    let tickers = parse_tickers(tickers);
    if tickers.is_empty() {
        return Err(AppError::InvalidInput("at least one ticker is required".into()));
    }
    if tickers.len() > MAX_TICKERS {
        return Err(AppError::InvalidInput(format!(
            "at most {MAX_TICKERS} tickers per analysis, got {}",
            tickers.len()
        )));
    }
    validate_range(start, end)?;

    let results = join_all(tickers.iter().map(|t| analyze_ticker(client, t, start, end))).await;

    let mut ok = Vec::with_capacity(tickers.len());
    let mut failed = Vec::new();
    for (ticker, result) in tickers.iter().zip(results) {
        match result {
            Ok(a) => ok.push(a),
            Err(e) => {
                tracing::warn!(ticker = %ticker, error = %e, "skipping ticker");
                failed.push(ticker.clone());
            }
        }
    }

    if ok.is_empty() {
        return Err(AppError::InsufficientData(
            "could not fetch data for any of the provided tickers".into(),
        ));
    }

    tracing::info!(loaded = ok.len(), requested = tickers.len(), "portfolio analysis complete");

    let metrics: Vec<TickerMetrics> = ok.iter().map(|a| a.metrics.clone()).collect();
    let (best, worst) = match best_and_worst(&metrics) {
        Some((b, w)) => (Some(b), Some(w)),
        None => (None, None),
    };

    Ok(PortfolioAnalysis { start, end, tickers: ok, failed, best, worst })
}
