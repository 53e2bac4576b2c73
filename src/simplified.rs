//! Alternative "simplified" index (C13): `clip(0,100, 10 × (V+S+M) / N)`.
//! Exposed as a peer read endpoint, never the primary composite. The ×10
//! factor is an adjustment baked into the original formula, not a derived
//! constant — preserved verbatim per DESIGN.md's Open Question #3.

use crate::models::{Article, MarketBar};
use chrono::{DateTime, Utc};

/// The MASI universe size the original hard-codes as a normalizing constant.
pub const UNIVERSE_SIZE: f64 = 76.0;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// 20-day average volume, normalized by the window's own min/max, mapped to
/// `[0,100]`.
fn volume_component(bars: &[MarketBar]) -> f64 {
    if bars.len() < 20 {
        return 50.0;
    }
    let window = &bars[bars.len() - 20..];
    let volumes: Vec<f64> = window.iter().map(|b| b.volume).collect();
    let avg = mean(&volumes);
    let min = volumes.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = volumes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range.abs() < f64::EPSILON {
        return 50.0;
    }
    (((avg - min) / range) * 100.0).clamp(0.0, 100.0)
}

/// Average article polarity over the window, mapped `(avg+1)×50`.
fn sentiment_component(articles: &[Article], as_of: DateTime<Utc>) -> f64 {
    let recent: Vec<f64> = articles
        .iter()
        .filter(|a| {
            a.published_at
                .map(|p| (as_of - p).num_days() <= 7 && p <= as_of)
                .unwrap_or(false)
        })
        .filter_map(|a| a.sentiment_score)
        .collect();
    if recent.is_empty() {
        return 50.0;
    }
    ((mean(&recent) + 1.0) * 50.0).clamp(0.0, 100.0)
}

/// Share of positive-return days in the last 5 bars, mapped to `[0,100]`.
fn market_component(bars: &[MarketBar]) -> f64 {
    if bars.len() < 6 {
        return 50.0;
    }
    let window = &bars[bars.len() - 5..];
    let prior_close = bars[bars.len() - 6].close;
    let mut positive_days = 0usize;
    let mut previous = prior_close;
    for bar in window {
        if bar.close > previous {
            positive_days += 1;
        }
        previous = bar.close;
    }
    (positive_days as f64 / window.len() as f64) * 100.0
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct SimplifiedScore {
    pub score: f64,
    pub volume_component: f64,
    pub sentiment_component: f64,
    pub market_component: f64,
}

pub fn calculate(bars: &[MarketBar], articles: &[Article], as_of: DateTime<Utc>) -> SimplifiedScore {
    let v = volume_component(bars);
    let s = sentiment_component(articles, as_of);
    let m = market_component(bars);
    let score = (10.0 * (v + s + m) / UNIVERSE_SIZE).clamp(0.0, 100.0);
    SimplifiedScore {
        score,
        volume_component: v,
        sentiment_component: s,
        market_component: m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn flat_bars(n: usize, price: f64) -> Vec<MarketBar> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                MarketBar::new(start + chrono::Duration::days(i as i64), price, price, price, price, 1_000_000.0)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn thin_history_defaults_components_to_neutral() {
        let result = calculate(&[], &[], Utc::now());
        assert_eq!(result.volume_component, 50.0);
        assert_eq!(result.market_component, 50.0);
        assert_eq!(result.sentiment_component, 50.0);
    }

    #[test]
    fn score_is_clamped_to_0_100() {
        let bars = flat_bars(30, 100.0);
        let result = calculate(&bars, &[], Utc::now());
        assert!((0.0..=100.0).contains(&result.score));
    }

    #[test]
    fn rising_tape_scores_more_positive_days_than_falling() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut rising = Vec::new();
        let mut falling = Vec::new();
        for i in 0..10 {
            let up_price = 100.0 + i as f64;
            let down_price = 110.0 - i as f64;
            let date = start + chrono::Duration::days(i as i64);
            rising.push(MarketBar::new(date, up_price, up_price, up_price, up_price, 1_000_000.0).unwrap());
            falling.push(MarketBar::new(date, down_price, down_price, down_price, down_price, 1_000_000.0).unwrap());
        }
        assert!(market_component(&rising) > market_component(&falling));
    }
}
