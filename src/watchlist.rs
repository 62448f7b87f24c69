use crate::market::types::OptionType;
use chrono::{DateTime, NaiveDate, Utc};

pub const WATCHLIST_KEY: &str = "optiontracker_watchlist";
pub const USER_KEY: &str = "optiontracker_user";

/// `{ticker}_{strike}_{date}_{type}`, e.g. `MSFT_410_2027-01-15_calls`.
pub fn entry_key(ticker: &str, strike: f64, date: NaiveDate, option_type: OptionType) -> String {
    format!("{}_{}_{}_{}", ticker.to_uppercase(), strike, date.format("%Y-%m-%d"), option_type.as_str())
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistEntry {
    pub key: String,
    pub ticker: String,
    pub strike: f64,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub option_type: OptionType,
    #[serde(default)]
    pub stock_name: String,
    #[serde(default)]
    pub mid: f64,
    pub added_at: DateTime<Utc>,
}

impl WatchlistEntry {
    pub fn new(
        ticker: &str,
        strike: f64,
        date: NaiveDate,
        option_type: OptionType,
        stock_name: &str,
        mid: f64,
        added_at: DateTime<Utc>,
    ) -> Self {
        let ticker = ticker.to_uppercase();
        Self {
            key: entry_key(&ticker, strike, date, option_type),
            stock_name: if stock_name.is_empty() { ticker.clone() } else { stock_name.to_string() },
            ticker,
            strike,
            date,
            option_type,
            mid: if mid.is_finite() { mid.max(0.0) } else { 0.0 },
            added_at,
        }
    }
}

/// Remove the entry if its key is present, append it otherwise.
/// Returns true when the entry ended up in the list.
pub fn toggle(list: &mut Vec<WatchlistEntry>, entry: WatchlistEntry) -> bool {
    if let Some(idx) = list.iter().position(|w| w.key == entry.key) {
        list.remove(idx);
        false
    } else {
        list.push(entry);
        true
    }
}

pub fn remove(list: &mut Vec<WatchlistEntry>, key: &str) -> bool {
    let before = list.len();
    list.retain(|w| w.key != key);
    list.len() != before
}

/// Signed-in user, persisted as a single blob.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}
