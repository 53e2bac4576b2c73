//! Backtest service (C14): correlates historical `IndexSnapshot`s against
//! forward index returns. Plain iterator math — no dataframe crate, as
//! nothing else in this corpus reaches for one at this scale.

use crate::models::{IndexSnapshot, MarketBar};
use chrono::NaiveDate;

const MIN_MERGED_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BacktestResult {
    pub total_periods: usize,
    pub correlation_t1: f64,
    pub correlation_t5: f64,
    pub directional_accuracy_t1: f64,
    pub directional_accuracy_t5: f64,
}

struct MergedRow {
    score: f64,
    forward_return_t1: f64,
    forward_return_t5: f64,
}

fn bar_by_date(bars: &[MarketBar]) -> std::collections::HashMap<NaiveDate, f64> {
    bars.iter().map(|b| (b.date, b.close)).collect()
}

fn forward_return(closes: &std::collections::HashMap<NaiveDate, f64>, dates: &[NaiveDate], idx: usize, ahead: usize) -> Option<f64> {
    let from_date = dates.get(idx)?;
    let to_date = dates.get(idx + ahead)?;
    let from = closes.get(from_date)?;
    let to = closes.get(to_date)?;
    if *from == 0.0 {
        return None;
    }
    Some((to - from) / from)
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

fn directional_accuracy(rows: &[MergedRow], ahead_is_t1: bool) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let hits = rows
        .iter()
        .filter(|r| {
            let forward = if ahead_is_t1 { r.forward_return_t1 } else { r.forward_return_t5 };
            (r.score > 50.0 && forward > 0.0) || (r.score < 50.0 && forward < 0.0)
        })
        .count();
    hits as f64 / rows.len() as f64
}

/// Joins `snapshots` (any `as_of` range) with T+1/T+5 forward returns derived
/// from the daily closes in `bars`. `< 10` merged rows → an all-zero result
/// with `total_periods` set honestly (not padded or extrapolated).
pub fn run(snapshots: &[IndexSnapshot], bars: &[MarketBar]) -> BacktestResult {
    let closes = bar_by_date(bars);
    let mut dates: Vec<NaiveDate> = closes.keys().cloned().collect();
    dates.sort();
    let date_index: std::collections::HashMap<NaiveDate, usize> =
        dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

    let mut rows = Vec::new();
    for snap in snapshots {
        let snap_date = snap.as_of.date_naive();
        let Some(&idx) = date_index.get(&snap_date) else {
            continue;
        };
        let (Some(t1), Some(t5)) = (
            forward_return(&closes, &dates, idx, 1),
            forward_return(&closes, &dates, idx, 5),
        ) else {
            continue;
        };
        rows.push(MergedRow {
            score: snap.composite,
            forward_return_t1: t1,
            forward_return_t5: t5,
        });
    }

    if rows.len() < MIN_MERGED_ROWS {
        return BacktestResult {
            total_periods: rows.len(),
            ..Default::default()
        };
    }

    let scores: Vec<f64> = rows.iter().map(|r| r.score).collect();
    let t1_returns: Vec<f64> = rows.iter().map(|r| r.forward_return_t1).collect();
    let t5_returns: Vec<f64> = rows.iter().map(|r| r.forward_return_t5).collect();

    BacktestResult {
        total_periods: rows.len(),
        correlation_t1: pearson(&scores, &t1_returns),
        correlation_t5: pearson(&scores, &t5_returns),
        directional_accuracy_t1: directional_accuracy(&rows, true),
        directional_accuracy_t5: directional_accuracy(&rows, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(date: NaiveDate, close: f64) -> MarketBar {
        MarketBar::new(date, close, close, close, close, 1_000_000.0).unwrap()
    }

    fn snapshot(date: NaiveDate, composite: f64) -> IndexSnapshot {
        IndexSnapshot {
            as_of: Utc.from_utc_datetime(&date.and_hms_opt(16, 0, 0).unwrap()),
            composite,
            components: crate::models::ComponentScores::neutral(),
        }
    }

    #[test]
    fn insufficient_overlap_returns_all_zero_with_honest_count() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let bars: Vec<MarketBar> = (0..20).map(|i| bar(start + chrono::Duration::days(i), 100.0)).collect();
        let snapshots = vec![snapshot(start, 70.0), snapshot(start + chrono::Duration::days(1), 30.0)];
        let result = run(&snapshots, &bars);
        assert_eq!(result.total_periods, 2);
        assert_eq!(result.correlation_t1, 0.0);
        assert_eq!(result.directional_accuracy_t1, 0.0);
    }

    #[test]
    fn high_score_preceding_rally_scores_perfect_directional_accuracy() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut bars = Vec::new();
        let mut price = 100.0;
        for i in 0..40 {
            bars.push(bar(start + chrono::Duration::days(i), price));
            price += 1.0;
        }
        let snapshots: Vec<IndexSnapshot> = (0..20)
            .map(|i| snapshot(start + chrono::Duration::days(i), 80.0))
            .collect();
        let result = run(&snapshots, &bars);
        assert_eq!(result.total_periods, 20);
        assert_eq!(result.directional_accuracy_t1, 1.0);
        assert_eq!(result.directional_accuracy_t5, 1.0);
    }
}
