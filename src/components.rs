//! Six pure sub-score functions over market bars and scored articles. No I/O
//! here — everything is a plain function over in-memory slices so it is
//! testable without a database or network.

use crate::models::{Article, ComponentScores, MarketBar};
use chrono::{DateTime, Utc};

const NEUTRAL: f64 = 50.0;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Needs ≥250 bars. `(mean(last 125) - mean(prev 125)) / mean(prev 125) * 100`,
/// mapped `50 + 2×pct`, clipped to `[0,100]`.
pub fn momentum(bars: &[MarketBar]) -> f64 {
    if bars.len() < 250 {
        return NEUTRAL;
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let n = closes.len();
    let recent = &closes[n - 125..];
    let prior = &closes[n - 250..n - 125];
    let recent_mean = mean(recent);
    let prior_mean = mean(prior);
    if prior_mean == 0.0 {
        return NEUTRAL;
    }
    let pct = (recent_mean - prior_mean) / prior_mean * 100.0;
    (NEUTRAL + 2.0 * pct).clamp(0.0, 100.0)
}

/// Needs ≥252 bars. Position of the latest close within the 52-week range.
pub fn price_strength(bars: &[MarketBar]) -> f64 {
    if bars.len() < 252 {
        return NEUTRAL;
    }
    let window = &bars[bars.len() - 252..];
    let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let high = window
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    if (high - low).abs() < f64::EPSILON {
        return NEUTRAL;
    }
    let latest_close = bars.last().unwrap().close;
    (((latest_close - low) / (high - low)) * 100.0).clamp(0.0, 100.0)
}

/// Needs ≥30 bars. `current_volume / mean(last 20 days)`, scaled `min(100, ratio×50)`.
pub fn volume(bars: &[MarketBar]) -> f64 {
    if bars.len() < 30 {
        return NEUTRAL;
    }
    let n = bars.len();
    let window = &bars[n - 20..];
    let mean_volume = mean(&window.iter().map(|b| b.volume).collect::<Vec<_>>());
    if mean_volume == 0.0 {
        return NEUTRAL;
    }
    let ratio = bars.last().unwrap().volume / mean_volume;
    (ratio * 50.0).min(100.0).max(0.0)
}

/// Needs ≥30 bars. Annualized std-dev of daily returns over the last 30 days,
/// mapped `100 - vol×1000` — higher volatility reads as more fear.
pub fn volatility(bars: &[MarketBar]) -> f64 {
    if bars.len() < 30 {
        return NEUTRAL;
    }
    let n = bars.len();
    let window = &bars[n - 30..];
    let returns: Vec<f64> = window
        .windows(2)
        .map(|w| (w[1].close - w[0].close) / w[0].close)
        .collect();
    if returns.is_empty() {
        return NEUTRAL;
    }
    let mean_ret = mean(&returns);
    let variance =
        returns.iter().map(|r| (r - mean_ret).powi(2)).sum::<f64>() / returns.len() as f64;
    let daily_std = variance.sqrt();
    let annualized = daily_std * (252f64).sqrt();
    (NEUTRAL * 2.0 - annualized * 1000.0).clamp(0.0, 100.0)
}

/// Needs ≥20 bars. Equity 20-day return minus a (possibly injected)
/// bond-yield constant, mapped `50 + rel×1000`, clipped.
pub fn equity_vs_bonds(bars: &[MarketBar], bond_annual_return: Option<f64>) -> f64 {
    if bars.len() < 20 {
        return NEUTRAL;
    }
    let n = bars.len();
    let start = bars[n - 20].close;
    let end = bars[n - 1].close;
    if start == 0.0 {
        return NEUTRAL;
    }
    let equity_return = (end - start) / start;
    let bond_return = bond_annual_return.unwrap_or(0.02) / (252.0 / 20.0);
    let rel = equity_return - bond_return;
    (NEUTRAL + rel * 1000.0).clamp(0.0, 100.0)
}

/// Confidence-weighted article sentiment over the last 7 days, per §4.5's
/// batch-normalization rule (articles scored without a recorded confidence
/// fall back to uniform weight within that average).
pub fn media_sentiment(articles: &[Article], as_of: DateTime<Utc>) -> f64 {
    let recent_scores: Vec<(f64, f64)> = articles
        .iter()
        .filter(|a| {
            a.published_at
                .map(|p| (as_of - p).num_days() <= 7 && p <= as_of)
                .unwrap_or(false)
        })
        .filter_map(|a| a.sentiment_score.map(|s| (s, a.sentiment_confidence.unwrap_or(1.0))))
        .collect();

    crate::sentiment::batch_media_sentiment_score(&recent_scores)
}

pub fn calculate_all(
    bars: &[MarketBar],
    articles: &[Article],
    as_of: DateTime<Utc>,
    bond_annual_return: Option<f64>,
) -> ComponentScores {
    ComponentScores {
        momentum: momentum(bars),
        price_strength: price_strength(bars),
        volume: volume(bars),
        volatility: volatility(bars),
        equity_vs_bonds: equity_vs_bonds(bars, bond_annual_return),
        media_sentiment: media_sentiment(articles, as_of),
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
    fn insufficient_data_returns_neutral() {
        let bars = flat_bars(10, 100.0);
        assert_eq!(momentum(&bars), NEUTRAL);
        assert_eq!(price_strength(&bars), NEUTRAL);
        assert_eq!(volume(&bars), NEUTRAL);
    }

    #[test]
    fn flat_price_history_is_near_neutral_across_components() {
        let bars = flat_bars(252, 100.0);
        assert_eq!(momentum(&bars), NEUTRAL);
        assert_eq!(price_strength(&bars), NEUTRAL);
        assert_eq!(volume(&bars), NEUTRAL);
        // Zero realized volatility reads as maximally calm, not neutral.
        assert_eq!(volatility(&bars), 100.0);
        // A flat tape still trails the constant bond-return benchmark slightly.
        let eb = equity_vs_bonds(&bars, None);
        assert!((eb - 50.0).abs() < 5.0, "expected near-neutral equity_vs_bonds, got {eb}");
    }

    #[test]
    fn strong_uptrend_scores_high_momentum() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut bars = Vec::new();
        for i in 0..250 {
            let price = if i < 125 { 100.0 } else { 120.0 };
            bars.push(
                MarketBar::new(start + chrono::Duration::days(i as i64), price, price, price, price, 1_000_000.0)
                    .unwrap(),
            );
        }
        let score = momentum(&bars);
        assert!(score >= 90.0, "expected strong momentum score, got {score}");
    }

    #[test]
    fn price_at_52_week_high_scores_100() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut bars: Vec<MarketBar> = (0..251)
            .map(|i| {
                MarketBar::new(start + chrono::Duration::days(i), 100.0, 100.0, 100.0, 100.0, 1_000_000.0).unwrap()
            })
            .collect();
        bars.push(MarketBar::new(start + chrono::Duration::days(251), 150.0, 150.0, 100.0, 150.0, 1_000_000.0).unwrap());
        let score = price_strength(&bars);
        assert_eq!(score, 100.0);
    }

    #[test]
    fn media_sentiment_neutral_with_no_articles() {
        assert_eq!(media_sentiment(&[], Utc::now()), NEUTRAL);
    }
}
