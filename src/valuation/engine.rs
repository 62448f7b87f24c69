//! Option P/L estimation at a hypothetical underlying price and date.
//!
//! At expiration the contract is worth its intrinsic value:
//!   call: max(0, S - K)      put: max(0, K - S)
//!
//! Before expiration the current time value is decayed with the square root
//! of remaining time, relative to the days remaining today:
//!   tv_est = max(0, mid - intrinsic(spot)) * sqrt(days_left_at_eval / days_left_today)
//!   price  = intrinsic(target) + tv_est
//!
//! This is a heuristic for a non-professional audience, not a Black-Scholes solve.
//! One contract covers 100 shares.

use crate::errors::{AppError, AppResult};
use crate::market::chain::OptionContract;
use crate::market::types::OptionType;
use chrono::NaiveDate;

pub const CONTRACT_MULTIPLIER: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ValuationRequest {
    pub contract: OptionContract,
    pub underlying_spot_at_selection: f64,
    pub target_underlying_price: f64,
    /// None means "at expiration"
    #[serde(default)]
    pub evaluation_date: Option<NaiveDate>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

/// Intermediate values, mostly for display and debugging.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ValuationBreakdown {
    pub quantity: i64,
    pub days_to_expiration: i64,
    pub intrinsic_value: f64,
    pub current_time_value: f64,
    pub time_decay_factor: f64,
    pub estimated_time_value: f64,
    /// Per-share option price at the evaluation date
    pub estimated_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ValuationResult {
    pub estimated_option_value: f64,
    pub total_cost: f64,
    pub profit_loss: f64,
    pub return_pct: f64,
    pub breakdown: ValuationBreakdown,
}

/// Per-share payoff at expiration.
#[inline]
pub fn intrinsic_value(option_type: OptionType, underlying: f64, strike: f64) -> f64 {
    (option_type.sign() * (underlying - strike)).max(0.0)
}

/// Whole calendar days from `from` to `to`.
#[inline]
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// Stateless apart from the date it treats as "today".
#[derive(Debug, Clone, Copy)]
pub struct ContractValuationEngine {
    today: NaiveDate,
}

impl ContractValuationEngine {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Engine pinned to the current UTC calendar date.
    pub fn today() -> Self {
        Self::new(chrono::Utc::now().date_naive())
    }

    /// Pure function: same request (and same `today`) always yields the same result.
    pub fn evaluate(&self, req: &ValuationRequest) -> AppResult<ValuationResult> {
        let c = &req.contract;
        let target = req.target_underlying_price;

        if !target.is_finite() || target <= 0.0 {
            return Err(AppError::InvalidInput(format!("target price must be positive, got {target}")));
        }
        if !c.strike.is_finite() || c.strike <= 0.0 {
            return Err(AppError::InvalidInput(format!("strike must be positive, got {}", c.strike)));
        }
        if !c.mid.is_finite() || c.mid <= 0.0 {
            return Err(AppError::NoPriceData);
        }

        let qty = req.quantity.max(1);
        let qty_f = qty as f64;

        let days_to_expiration = match req.evaluation_date {
            Some(eval) => days_between(eval, c.expiration_date).max(0),
            None => 0,
        };

        let intrinsic = intrinsic_value(c.option_type, target, c.strike);

        let (current_time_value, time_decay_factor, estimated_time_value) = if days_to_expiration == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let spot = req.underlying_spot_at_selection;
            let current_intrinsic = if spot.is_finite() {
                intrinsic_value(c.option_type, spot, c.strike)
            } else {
                0.0
            };
            let current_tv = (c.mid - current_intrinsic).max(0.0);

            let days_left_today = days_between(self.today, c.expiration_date);
            let factor = if days_left_today > 0 {
                (days_to_expiration as f64 / days_left_today as f64).sqrt()
            } else {
                0.0
            };
            (current_tv, factor, current_tv * factor)
        };

        let estimated_price = intrinsic + estimated_time_value;
        let estimated_option_value = estimated_price * CONTRACT_MULTIPLIER * qty_f;
        let total_cost = c.mid * CONTRACT_MULTIPLIER * qty_f;
        let profit_loss = estimated_option_value - total_cost;
        let return_pct = if total_cost > 0.0 {
            profit_loss / total_cost * 100.0
        } else {
            0.0
        };

        Ok(ValuationResult {
            estimated_option_value,
            total_cost,
            profit_loss,
            return_pct,
            breakdown: ValuationBreakdown {
                quantity: qty,
                days_to_expiration,
                intrinsic_value: intrinsic,
                current_time_value,
                time_decay_factor,
                estimated_time_value,
                estimated_price,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn contract(option_type: OptionType, strike: f64, mid: f64, expiration: NaiveDate) -> OptionContract {
        OptionContract {
            ticker: "TEST".into(),
            expiration_date: expiration,
            strike,
            option_type,
            bid: mid - 0.05,
            ask: mid + 0.05,
            mid,
            implied_volatility: 0.3,
        }
    }

    fn req(contract: OptionContract, spot: f64, target: f64, eval: Option<NaiveDate>, qty: i64) -> ValuationRequest {
        ValuationRequest {
            contract,
            underlying_spot_at_selection: spot,
            target_underlying_price: target,
            evaluation_date: eval,
            quantity: qty,
        }
    }

    fn engine() -> ContractValuationEngine {
        ContractValuationEngine::new(d(2026, 10, 19))
    }

    #[test]
    fn test_call_at_expiration_example() {
        let c = contract(OptionType::Call, 100.0, 5.0, d(2026, 12, 18));
        let r = engine().evaluate(&req(c, 100.0, 110.0, None, 1)).unwrap();
        assert_eq!(r.breakdown.intrinsic_value, 10.0);
        assert_eq!(r.estimated_option_value, 1000.0);
        assert_eq!(r.total_cost, 500.0);
        assert_eq!(r.profit_loss, 500.0);
        assert_eq!(r.return_pct, 100.0);
    }

    #[test]
    fn test_put_at_expiration_example() {
        let c = contract(OptionType::Put, 50.0, 2.0, d(2026, 12, 18));
        let r = engine().evaluate(&req(c, 55.0, 60.0, None, 2)).unwrap();
        assert_eq!(r.estimated_option_value, 0.0);
        assert_eq!(r.total_cost, 400.0);
        assert_eq!(r.profit_loss, -400.0);
        assert_eq!(r.return_pct, -100.0);
    }

    #[test]
    fn test_expiration_value_matches_payoff_formula() {
        let exp = d(2026, 12, 18);
        for (ty, sign) in [(OptionType::Call, 1.0), (OptionType::Put, -1.0)] {
            for target in [40.0, 75.0, 99.5, 100.0, 100.5, 130.0] {
                for qty in [1_i64, 3, 10] {
                    let c = contract(ty, 100.0, 4.0, exp);
                    let r = engine().evaluate(&req(c, 100.0, target, None, qty)).unwrap();
                    let expected = f64::max(0.0, sign * (target - 100.0)) * 100.0 * qty as f64;
                    assert!((r.estimated_option_value - expected).abs() < 1e-9, "{ty} target={target} qty={qty}");
                }
            }
        }
    }

    #[test]
    fn test_evaluation_on_or_after_expiration_is_intrinsic() {
        let exp = d(2026, 12, 18);
        let c = contract(OptionType::Call, 100.0, 5.0, exp);
        for eval in [exp, d(2027, 1, 8)] {
            let r = engine().evaluate(&req(c.clone(), 100.0, 112.0, Some(eval), 1)).unwrap();
            assert_eq!(r.breakdown.days_to_expiration, 0);
            assert_eq!(r.estimated_option_value, 1200.0);
        }
    }

    #[test]
    fn test_target_at_strike_has_no_intrinsic() {
        for ty in [OptionType::Call, OptionType::Put] {
            let c = contract(ty, 100.0, 3.0, d(2026, 12, 18));
            let r = engine().evaluate(&req(c, 100.0, 100.0, None, 1)).unwrap();
            assert_eq!(r.breakdown.intrinsic_value, 0.0);
            assert_eq!(r.estimated_option_value, 0.0);
        }
    }

    #[test]
    fn test_quantity_coerced_to_one() {
        let c = contract(OptionType::Call, 100.0, 5.0, d(2026, 12, 18));
        for qty in [0, -4] {
            let r = engine().evaluate(&req(c.clone(), 100.0, 110.0, None, qty)).unwrap();
            assert_eq!(r.breakdown.quantity, 1);
            assert_eq!(r.total_cost, 500.0);
        }
    }

    #[test]
    fn test_time_value_decays_with_sqrt_of_remaining_days() {
        // today 2026-10-19, expiration 100 days out, evaluate 25 days before expiration
        let exp = d(2027, 1, 27);
        let eval = d(2027, 1, 2);
        let c = contract(OptionType::Call, 100.0, 8.0, exp);
        // spot 105 -> current intrinsic 5, time value 3
        let r = engine().evaluate(&req(c, 105.0, 110.0, Some(eval), 1)).unwrap();
        assert_eq!(r.breakdown.days_to_expiration, 25);
        assert!((r.breakdown.current_time_value - 3.0).abs() < 1e-12);
        assert!((r.breakdown.time_decay_factor - 0.5).abs() < 1e-12);
        assert!((r.breakdown.estimated_price - 11.5).abs() < 1e-12);
        assert!((r.estimated_option_value - 1150.0).abs() < 1e-9);
        assert!((r.profit_loss - 350.0).abs() < 1e-9);
    }

    #[test]
    fn test_expired_contract_gets_no_time_value() {
        // expiration already in the past relative to today
        let exp = d(2026, 10, 1);
        let c = contract(OptionType::Put, 100.0, 2.0, exp);
        let r = engine().evaluate(&req(c, 98.0, 95.0, Some(d(2026, 9, 20)), 1)).unwrap();
        assert_eq!(r.breakdown.days_to_expiration, 11);
        assert_eq!(r.breakdown.time_decay_factor, 0.0);
        assert_eq!(r.estimated_option_value, 500.0);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let c = contract(OptionType::Put, 95.0, 4.25, d(2027, 3, 19));
        let r = req(c, 101.0, 90.0, Some(d(2026, 12, 1)), 3);
        let e = engine();
        assert_eq!(e.evaluate(&r).unwrap(), e.evaluate(&r).unwrap());
    }

    #[test]
    fn test_input_errors() {
        let exp = d(2026, 12, 18);
        let e = engine();

        let no_mid = contract(OptionType::Call, 100.0, 0.0, exp);
        assert!(matches!(e.evaluate(&req(no_mid, 100.0, 110.0, None, 1)), Err(AppError::NoPriceData)));

        let ok = contract(OptionType::Call, 100.0, 5.0, exp);
        for target in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                e.evaluate(&req(ok.clone(), 100.0, target, None, 1)),
                Err(AppError::InvalidInput(_))
            ));
        }

        let bad_strike = contract(OptionType::Call, 0.0, 5.0, exp);
        assert!(matches!(e.evaluate(&req(bad_strike, 100.0, 110.0, None, 1)), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let json = r#"{
            "contract": {"ticker": "MSFT", "expiration_date": "2026-12-18", "strike": 450.0,
                         "option_type": "calls", "bid": 9.9, "ask": 10.1, "mid": 10.0},
            "underlying_spot_at_selection": 440.0,
            "target_underlying_price": 470.0
        }"#;
        let r: ValuationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(r.quantity, 1);
        assert_eq!(r.evaluation_date, None);
        assert_eq!(r.contract.implied_volatility, 0.30);
    }
}
