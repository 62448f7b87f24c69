use super::types::{ChainResponse, OptionType, StrikeQuote};
use crate::errors::{AppError, AppResult};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Implied volatility assumed when the chain omits it.
pub const DEFAULT_IMPLIED_VOL: f64 = 0.30;

/// Strike step used for the ATM band when a date has a single strike.
const DEFAULT_STRIKE_STEP: f64 = 5.0;

/// Strikes are keyed at 1/1000 precision so 452.5 and 452.50 are the same contract.
#[inline]
pub fn strike_key(strike: f64) -> i64 {
    (strike * 1000.0).round() as i64
}

/// Immutable snapshot of one option contract, as selected by the user.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptionContract {
    pub ticker: String,
    pub expiration_date: NaiveDate,
    pub strike: f64,
    pub option_type: OptionType,
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    #[serde(default = "default_iv")]
    pub implied_volatility: f64,
}

fn default_iv() -> f64 {
    DEFAULT_IMPLIED_VOL
}

impl OptionContract {
    pub fn from_quote(ticker: &str, expiration_date: NaiveDate, option_type: OptionType, q: &StrikeQuote) -> Self {
        Self {
            ticker: ticker.to_uppercase(),
            expiration_date,
            strike: q.strike,
            option_type,
            bid: q.bid.unwrap_or(0.0),
            ask: q.ask.unwrap_or(0.0),
            mid: q.mid_price(),
            implied_volatility: q
                .implied_volatility
                .filter(|iv| iv.is_finite() && *iv > 0.0)
                .unwrap_or(DEFAULT_IMPLIED_VOL),
        }
    }

    /// Short label like `$450C Jan 15, 27`.
    pub fn label(&self) -> String {
        let side = match self.option_type {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        };
        format!("${}{} {}", self.strike, side, self.expiration_date.format("%b %-d, %y"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Moneyness {
    Atm,
    Itm,
    Otm,
}

/// Neighbouring values around a target (strike below/above or date before/after).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Neighbors<T> {
    pub lower: Option<T>,
    pub target: T,
    pub upper: Option<T>,
}

/// Typed option chain: every contract keyed by (expiration, strike).
#[derive(Debug, Clone, Default)]
pub struct OptionChain {
    pub ticker: String,
    pub option_type: Option<OptionType>,
    pub current_price: f64,
    contracts: HashMap<(NaiveDate, i64), StrikeQuote>,
    /// Sorted strikes per expiration
    strikes_by_date: BTreeMap<NaiveDate, Vec<f64>>,
}

impl OptionChain {
    pub fn from_response(ticker: &str, option_type: OptionType, resp: ChainResponse) -> Self {
        let mut contracts = HashMap::new();
        let mut strikes_by_date: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();

        for expiry in resp.chain {
            let date = match NaiveDate::parse_from_str(&expiry.date, "%Y-%m-%d") {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(ticker = ticker, date = %expiry.date, error = %e, "skipping unparsable expiration");
                    continue;
                }
            };

            let strikes = strikes_by_date.entry(date).or_default();
            for q in expiry.strikes {
                if !q.strike.is_finite() || q.strike <= 0.0 {
                    continue;
                }
                if contracts.insert((date, strike_key(q.strike)), q.clone()).is_none() {
                    strikes.push(q.strike);
                }
            }
            strikes.sort_by(|a, b| a.total_cmp(b));
        }
        strikes_by_date.retain(|_, s| !s.is_empty());

        Self {
            ticker: ticker.to_uppercase(),
            option_type: Some(option_type),
            current_price: resp.current_price.filter(|p| p.is_finite()).unwrap_or(0.0),
            contracts,
            strikes_by_date,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn expirations(&self) -> Vec<NaiveDate> {
        self.strikes_by_date.keys().copied().collect()
    }

    pub fn first_expiration(&self) -> Option<NaiveDate> {
        self.strikes_by_date.keys().next().copied()
    }

    pub fn has_date(&self, date: NaiveDate) -> bool {
        self.strikes_by_date.contains_key(&date)
    }

    pub fn strikes(&self, date: NaiveDate) -> &[f64] {
        self.strikes_by_date.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn quote(&self, date: NaiveDate, strike: f64) -> AppResult<&StrikeQuote> {
        if !self.strikes_by_date.contains_key(&date) {
            return Err(AppError::MissingContract(format!("expiration {date} not in chain")));
        }
        self.contracts
            .get(&(date, strike_key(strike)))
            .ok_or_else(|| AppError::MissingContract(format!("strike {strike} not listed for {date}")))
    }

    pub fn contract(&self, date: NaiveDate, strike: f64) -> AppResult<OptionContract> {
        let q = self.quote(date, strike)?;
        let option_type = self.option_type.unwrap_or(OptionType::Call);
        Ok(OptionContract::from_quote(&self.ticker, date, option_type, q))
    }

    /// Strike closest to the current underlying price.
    pub fn find_atm(&self, date: NaiveDate) -> Option<f64> {
        let spot = self.current_price;
        self.strikes(date)
            .iter()
            .copied()
            .min_by(|a, b| (a - spot).abs().total_cmp(&(b - spot).abs()))
    }

    /// ATM when within one strike step of spot, else ITM/OTM by side.
    pub fn moneyness(&self, date: NaiveDate, strike: f64) -> Moneyness {
        let strikes = self.strikes(date);
        let step = match strikes {
            [a, b, ..] if b - a > 0.0 => b - a,
            _ => DEFAULT_STRIKE_STEP,
        };
        let spot = self.current_price;
        if (strike - spot).abs() < step {
            return Moneyness::Atm;
        }
        let itm = match self.option_type.unwrap_or(OptionType::Call) {
            OptionType::Call => strike < spot,
            OptionType::Put => strike > spot,
        };
        if itm { Moneyness::Itm } else { Moneyness::Otm }
    }

    /// Strike below/above the target on one expiration. Unlisted targets snap to the closest strike.
    pub fn strike_neighbors(&self, date: NaiveDate, strike: f64) -> Option<Neighbors<f64>> {
        let strikes = self.strikes(date);
        let idx = strikes
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - strike).abs().total_cmp(&(*b - strike).abs()))
            .map(|(i, _)| i)?;
        Some(Neighbors {
            lower: idx.checked_sub(1).map(|i| strikes[i]),
            target: strikes[idx],
            upper: strikes.get(idx + 1).copied(),
        })
    }

    /// Expirations before/after the target date.
    pub fn date_neighbors(&self, date: NaiveDate) -> AppResult<Neighbors<NaiveDate>> {
        if !self.has_date(date) {
            return Err(AppError::MissingContract(format!("expiration {date} not in chain")));
        }
        Ok(Neighbors {
            lower: self.strikes_by_date.range(..date).next_back().map(|(d, _)| *d),
            target: date,
            upper: self
                .strikes_by_date
                .range(date..)
                .nth(1)
                .map(|(d, _)| *d),
        })
    }
}

/// Whole days from `today` to `date` (negative once expired).
#[inline]
pub fn days_left(date: NaiveDate, today: NaiveDate) -> i64 {
    (date - today).num_days()
}
