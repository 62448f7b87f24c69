use crate::errors::{AppError, AppResult};
use crate::market::types::{PricePoint, StockQuote};
use statrs::statistics::Statistics;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
pub const RISK_FREE_RATE: f64 = 0.05;
pub const STOCHASTIC_PERIOD: usize = 14;

/// Per-ticker performance figures shown in the comparison table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TickerMetrics {
    pub ticker: String,
    pub price: f64,
    pub total_return_pct: f64,
    pub one_year_return_pct: f64,
    pub annualized_volatility_pct: f64,
    pub sharpe_ratio: f64,
    /// 14-period %K, None with fewer than 14 observations
    #[serde(default)]
    pub stochastic_oscillator: Option<f64>,
    #[serde(default)]
    pub change: Option<f64>,
    #[serde(default)]
    pub change_percent: Option<f64>,
}

/// Simple relative differences between consecutive prices.
pub fn daily_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
}

/// 14-period stochastic %K, rounded to one decimal. 50 when the range is flat.
pub fn stochastic_k(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let recent = &prices[prices.len() - period..];
    let high = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let low = recent.iter().copied().fold(f64::INFINITY, f64::min);
    let close = *prices.last()?;

    if high == low {
        return Some(50.0);
    }
    let k = (close - low) / (high - low) * 100.0;
    Some((k * 10.0).round() / 10.0)
}

/// Derive metrics from the live quote price and a normalized (chronological) history.
pub fn compute_metrics(ticker: &str, current_price: f64, quote: Option<&StockQuote>, history: &[PricePoint]) -> AppResult<TickerMetrics> {
    if history.is_empty() {
        return Err(AppError::InsufficientData(format!("{ticker}: empty price history")));
    }
    if !current_price.is_finite() || current_price <= 0.0 {
        return Err(AppError::InvalidInput(format!("{ticker}: invalid current price {current_price}")));
    }

    let prices: Vec<f64> = history.iter().map(|p| p.price).collect();
    let n = prices.len();
    let start_price = prices[0];
    if !start_price.is_finite() || start_price <= 0.0 {
        return Err(AppError::InvalidInput(format!("{ticker}: invalid starting price {start_price}")));
    }

    let total_return_pct = (current_price - start_price) / start_price * 100.0;

    let one_year_days = (TRADING_DAYS_PER_YEAR as usize).min(n - 1);
    let one_year_base = prices[n - 1 - one_year_days];
    let one_year_return_pct = (current_price - one_year_base) / one_year_base * 100.0;

    let returns = daily_returns(&prices);
    let daily_vol = if returns.is_empty() {
        0.0
    } else {
        returns.iter().population_std_dev()
    };
    let annualized_volatility_pct = daily_vol * TRADING_DAYS_PER_YEAR.sqrt() * 100.0;

    let annual_return = total_return_pct / 100.0 * (TRADING_DAYS_PER_YEAR / n as f64);
    let sharpe_ratio = if annualized_volatility_pct > 0.0 {
        (annual_return - RISK_FREE_RATE) / (annualized_volatility_pct / 100.0)
    } else {
        0.0
    };

    Ok(TickerMetrics {
        ticker: ticker.to_uppercase(),
        price: current_price,
        total_return_pct,
        one_year_return_pct,
        annualized_volatility_pct,
        sharpe_ratio,
        stochastic_oscillator: stochastic_k(&prices, STOCHASTIC_PERIOD),
        change: quote.and_then(|q| q.change),
        change_percent: quote.and_then(|q| q.change_percent),
    })
}
