use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ── Contract side / comparison mode ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "calls", alias = "call")]
    Call,
    #[serde(rename = "puts", alias = "put")]
    Put,
}

impl OptionType {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "calls",
            Self::Put => "puts",
        }
    }

    /// +1 for calls, -1 for puts. Payoff is max(0, sign * (S - K)).
    #[inline]
    pub fn sign(&self) -> f64 {
        match self {
            Self::Call => 1.0,
            Self::Put => -1.0,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    /// Same strike across neighbouring expirations
    Date,
    /// Neighbouring strikes on the same expiration
    Strike,
}

impl ComparisonMode {
    #[inline]
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Date => "/compare/date",
            Self::Strike => "/compare/strike",
        }
    }
}

// ── Error envelope ──

/// The backend answers `{ "error": "..." }` on failure, sometimes with a 200.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiPayload<T> {
    Failure { error: String },
    Success(T),
}

// ── /price/{ticker} ──

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StockQuote {
    pub ticker: Option<String>,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub previous_close: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub volume: Option<f64>,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub dividend_rate: Option<f64>,
    pub beta: Option<f64>,
}

impl StockQuote {
    #[inline]
    pub fn price_f64(&self) -> Option<f64> {
        self.price.filter(|p| p.is_finite() && *p > 0.0)
    }

    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(fallback)
    }
}

// ── /chain/{ticker}?type= ──

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainResponse {
    pub ticker: Option<String>,
    pub current_price: Option<f64>,
    pub option_type: Option<String>,
    pub chain: Vec<ChainExpiry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainExpiry {
    pub date: String,
    pub strikes: Vec<StrikeQuote>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrikeQuote {
    pub strike: f64,
    pub last_price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub mid: Option<f64>,
    pub change: Option<f64>,
    pub percent_change: Option<f64>,
    pub volume: Option<f64>,
    pub open_interest: Option<f64>,
    pub implied_volatility: Option<f64>,
}

impl StrikeQuote {
    /// Supplied mid, else (bid+ask)/2 when both sides quote, else last trade.
    pub fn mid_price(&self) -> f64 {
        if let Some(m) = self.mid.filter(|m| m.is_finite()) {
            return m.max(0.0);
        }
        match (self.bid, self.ask) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => (b + a) / 2.0,
            _ => self.last_price.filter(|p| p.is_finite()).unwrap_or(0.0).max(0.0),
        }
    }
}

// ── /compare/{date,strike} ──

#[derive(Debug, Clone, Serialize)]
pub struct CompareRequest {
    pub ticker: String,
    pub date: NaiveDate,
    pub strike: f64,
    pub option_type: OptionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesPosition {
    Before,
    Target,
    After,
    Below,
    Above,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonPoint {
    pub position: SeriesPosition,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub strike: Option<f64>,
    #[serde(default)]
    pub data: StrikeQuote,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareResponse {
    pub mode: Option<String>,
    pub ticker: Option<String>,
    pub current_price: Option<f64>,
    pub target_strike: Option<f64>,
    pub target_date: Option<String>,
    pub option_type: Option<String>,
    pub series: SmallVec<[ComparisonPoint; 3]>,
}

// ── /history/{ticker} ──

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryResponse {
    pub history: Vec<PricePoint>,
}
