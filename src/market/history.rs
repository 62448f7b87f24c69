use super::types::PricePoint;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::Rng;

/// Sort chronologically and drop duplicate dates (the later entry wins).
/// Non-positive or non-finite prices are discarded.
pub fn normalize(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    points.retain(|p| p.price.is_finite() && p.price > 0.0);
    // Stable sort keeps input order among equal dates, so the last one is the newest.
    points.sort_by_key(|p| p.date);
    let mut out: Vec<PricePoint> = Vec::with_capacity(points.len());
    for p in points {
        match out.last_mut() {
            Some(last) if last.date == p.date => *last = p,
            _ => out.push(p),
        }
    }
    out
}

/// Simulated price path used when the backend has no history for a ticker.
///
/// Random walk with 1.5-2.5% daily volatility and a small upward drift,
/// generated backwards so the final (end-date) price equals `current_price`.
/// Weekends are skipped.
pub fn simulate_history<R: Rng>(
    rng: &mut R,
    current_price: f64,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<PricePoint> {
    let days = (end - start).num_days().max(0) as usize;

    let volatility = 0.015 + rng.gen::<f64>() * 0.01;
    let drift = 0.0002 + rng.gen::<f64>() * 0.0003;

    let mut prices = vec![0.0; days + 1];
    prices[days] = current_price;
    for i in (0..days).rev() {
        let r = (rng.gen::<f64>() - 0.5) * 2.0 * volatility + drift;
        prices[i] = prices[i + 1] / (1.0 + r);
    }

    (0..=days)
        .filter_map(|i| {
            let date = start + Duration::days(i as i64);
            match date.weekday() {
                Weekday::Sat | Weekday::Sun => None,
                _ => Some(PricePoint { date, price: prices[i] }),
            }
        })
        .collect()
}
