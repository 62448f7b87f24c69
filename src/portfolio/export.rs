use super::metrics::TickerMetrics;
use crate::market::types::PricePoint;
use std::collections::HashMap;
use std::fmt::Write;

/// One ticker's chart series, as posted back by the dashboard for export.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceSeries {
    pub ticker: String,
    pub history: Vec<PricePoint>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Performer {
    pub ticker: String,
    pub total_return_pct: f64,
}

/// Highest and lowest total return. First ticker wins ties.
pub fn best_and_worst(metrics: &[TickerMetrics]) -> Option<(Performer, Performer)> {
    let first = metrics.first()?;
    let mut best = first;
    let mut worst = first;
    for m in &metrics[1..] {
        if m.total_return_pct > best.total_return_pct {
            best = m;
        }
        if m.total_return_pct < worst.total_return_pct {
            worst = m;
        }
    }
    let p = |m: &TickerMetrics| Performer { ticker: m.ticker.clone(), total_return_pct: m.total_return_pct };
    Some((p(best), p(worst)))
}

pub fn returns_csv(metrics: &[TickerMetrics]) -> String {
    let mut csv = String::from("Ticker,1Y Return %,Total Return %,Volatility %,Sharpe Ratio\n");
    for m in metrics {
        let _ = writeln!(
            csv,
            "{},{:.2},{:.2},{:.2},{:.2}",
            m.ticker, m.one_year_return_pct, m.total_return_pct, m.annualized_volatility_pct, m.sharpe_ratio
        );
    }
    csv
}

/// One row per date of the first ticker's history. Tickers without a price on
/// that date leave the cell empty.
pub fn prices_csv(series: &[PriceSeries]) -> String {
    let mut csv = String::from("Date");
    for t in series {
        csv.push(',');
        csv.push_str(&t.ticker);
    }
    csv.push('\n');

    let Some(first) = series.first() else {
        return csv;
    };

    let lookups: Vec<HashMap<_, f64>> = series
        .iter()
        .map(|t| t.history.iter().map(|p| (p.date, p.price)).collect())
        .collect();

    for point in &first.history {
        let _ = write!(csv, "{}", point.date.format("%Y-%m-%d"));
        for prices in &lookups {
            match prices.get(&point.date) {
                Some(price) => {
                    let _ = write!(csv, ",{price:.2}");
                }
                None => csv.push(','),
            }
        }
        csv.push('\n');
    }
    csv
}
