use super::engine::CONTRACT_MULTIPLIER;
use crate::market::chain::OptionContract;
use crate::market::types::OptionType;
use std::time::{Duration, Instant};

/// Cost/breakeven panel for the selected contract. Pure function of the contract.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ContractSummary {
    pub quantity: i64,
    pub premium_per_contract: f64,
    pub total_cost: f64,
    /// A long option can lose at most its premium
    pub max_loss: f64,
    pub breakeven: f64,
    pub spread: f64,
    pub suggested_target_price: Option<f64>,
}

pub fn summarize(contract: &OptionContract, quantity: i64, spot: f64) -> ContractSummary {
    let qty = quantity.max(1);
    let premium_per_contract = contract.mid * CONTRACT_MULTIPLIER;
    let total_cost = premium_per_contract * qty as f64;
    let breakeven = match contract.option_type {
        OptionType::Call => contract.strike + contract.mid,
        OptionType::Put => contract.strike - contract.mid,
    };

    ContractSummary {
        quantity: qty,
        premium_per_contract,
        total_cost,
        max_loss: total_cost,
        breakeven,
        spread: contract.ask - contract.bid,
        suggested_target_price: suggested_target_price(contract.option_type, spot),
    }
}

/// Placeholder target: 10% move in the option's favour.
pub fn suggested_target_price(option_type: OptionType, spot: f64) -> Option<f64> {
    if !spot.is_finite() || spot <= 0.0 {
        return None;
    }
    let mult = match option_type {
        OptionType::Call => 1.10,
        OptionType::Put => 0.90,
    };
    Some((spot * mult * 100.0).round() / 100.0)
}

/// Minimum spacing between accepted P/L recalculations.
/// Calls that arrive too soon are dropped, not queued.
#[derive(Debug, Clone)]
pub struct RecalcThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RecalcThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: None }
    }

    /// Returns true and records `now` if a recalculation may run.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}
