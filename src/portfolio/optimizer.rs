//! Heuristic portfolio allocation.
//!
//! score_i   = max(sharpe_i, 0.1) / max(vol_i, 10)
//! raw_i     = score_i / sum(score)
//! adj_i     = max(0, raw_i + return_i/100 * tolerance * 0.1)
//! weight_i  = adj_i / sum(adj)
//!
//! Portfolio risk is the weighted quadratic sum of volatilities, which ignores
//! cross-asset correlation. Not a mean-variance solve.

use super::metrics::TickerMetrics;
use crate::errors::{AppError, AppResult};
use std::collections::BTreeMap;

const MIN_SHARPE: f64 = 0.1;
const MIN_VOL_PCT: f64 = 10.0;
const RETURN_BONUS_SCALE: f64 = 0.1;
pub const MAX_RISK_TOLERANCE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AllocationEntry {
    pub ticker: String,
    pub weight: f64,
    pub expected_return_pct: f64,
    pub risk_pct: f64,
    /// Dollar amount for the requested investment
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PortfolioAllocation {
    pub allocations: Vec<AllocationEntry>,
    pub portfolio_return_pct: f64,
    pub portfolio_risk_pct: f64,
    pub portfolio_sharpe: f64,
    pub investment: f64,
    pub risk_tolerance: f64,
}

#[inline]
fn score(m: &TickerMetrics) -> f64 {
    m.sharpe_ratio.max(MIN_SHARPE) / m.annualized_volatility_pct.max(MIN_VOL_PCT)
}

fn validate(metrics: &BTreeMap<String, TickerMetrics>, risk_tolerance: f64, investment: f64) -> AppResult<()> {
    if metrics.len() < 2 {
        return Err(AppError::InsufficientData(format!(
            "need at least 2 tickers to optimize, got {}",
            metrics.len()
        )));
    }
    if !risk_tolerance.is_finite() || !(0.0..=MAX_RISK_TOLERANCE).contains(&risk_tolerance) {
        return Err(AppError::InvalidInput(format!("risk tolerance must be in [0, 10], got {risk_tolerance}")));
    }
    if !investment.is_finite() || investment <= 0.0 {
        return Err(AppError::InvalidInput(format!("investment must be positive, got {investment}")));
    }
    for (ticker, m) in metrics {
        let fields = [m.sharpe_ratio, m.annualized_volatility_pct, m.total_return_pct];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(AppError::NotANumber(format!("{ticker}: metrics contain non-finite values")));
        }
    }
    Ok(())
}

/// Pure function: suggested weights plus aggregate return/risk/Sharpe.
pub fn optimize(
    metrics: &BTreeMap<String, TickerMetrics>,
    risk_tolerance: f64,
    investment: f64,
) -> AppResult<PortfolioAllocation> {
    validate(metrics, risk_tolerance, investment)?;

    let scores: Vec<f64> = metrics.values().map(score).collect();
    let total_score: f64 = scores.iter().sum();

    let raw: Vec<f64> = scores.iter().map(|s| s / total_score).collect();
    let adjusted: Vec<f64> = metrics
        .values()
        .zip(&raw)
        .map(|(m, w)| {
            let bonus = m.total_return_pct / 100.0 * risk_tolerance * RETURN_BONUS_SCALE;
            (w + bonus).max(0.0)
        })
        .collect();

    let total_adjusted: f64 = adjusted.iter().sum();
    // Every ticker clamped to zero: keep the unadjusted score weights.
    let weights = if total_adjusted > 0.0 {
        adjusted.iter().map(|w| w / total_adjusted).collect::<Vec<_>>()
    } else {
        tracing::debug!(risk_tolerance, "return bonus zeroed all weights, using raw scores");
        raw
    };

    let allocations: Vec<AllocationEntry> = metrics
        .iter()
        .zip(&weights)
        .map(|((ticker, m), &w)| AllocationEntry {
            ticker: ticker.clone(),
            weight: w,
            expected_return_pct: m.total_return_pct,
            risk_pct: m.annualized_volatility_pct,
            amount: w * investment,
        })
        .collect();

    let portfolio_return_pct: f64 = allocations.iter().map(|a| a.weight * a.expected_return_pct).sum();
    let portfolio_risk_pct = allocations
        .iter()
        .map(|a| (a.weight * a.risk_pct).powi(2))
        .sum::<f64>()
        .sqrt();
    let portfolio_sharpe = sharpe_or_zero(portfolio_return_pct, portfolio_risk_pct);

    Ok(PortfolioAllocation {
        allocations,
        portfolio_return_pct,
        portfolio_risk_pct,
        portfolio_sharpe,
        investment,
        risk_tolerance,
    })
}

/// return/risk, clamped to 0 when risk is zero or the ratio is not finite.
#[inline]
fn sharpe_or_zero(ret: f64, risk: f64) -> f64 {
    if risk <= 0.0 {
        return 0.0;
    }
    let s = ret / risk;
    if s.is_finite() { s } else { 0.0 }
}
