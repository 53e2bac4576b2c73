//! Rolling-window min-max normalization (C7). Pure function over historical
//! raw component values — applied after `components::calculate_all` and
//! before `aggregator::aggregate`.

use crate::models::ComponentScores;

pub const DEFAULT_WINDOW_DAYS: usize = 90;

/// Scales a single raw value into its position within `[min,max]` of the
/// supplied window (most recent `window` values, oldest first), mapped onto
/// `[0,100]`. Degenerate or thin history passes the raw value through
/// unscaled, except a truly degenerate (zero-range) window which always
/// resolves to neutral 50, per §4.7.
pub fn scale_component(raw: f64, history: &[f64], window: usize) -> f64 {
    if history.len() < 2 {
        return raw;
    }
    let start = history.len().saturating_sub(window);
    let recent = &history[start..];
    let min = recent.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = recent.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range.abs() < f64::EPSILON {
        return 50.0;
    }
    (((raw.max(min).min(max) - min) / range) * 100.0).clamp(0.0, 100.0)
}

/// Per-component raw-value history, keyed the same way as
/// `ComponentScores::as_named_pairs` so callers can build it straight off
/// stored `IndexSnapshot`s.
#[derive(Debug, Clone, Default)]
pub struct ScalerHistory {
    pub momentum: Vec<f64>,
    pub price_strength: Vec<f64>,
    pub volume: Vec<f64>,
    pub volatility: Vec<f64>,
    pub equity_vs_bonds: Vec<f64>,
    pub media_sentiment: Vec<f64>,
}

impl ScalerHistory {
    /// Builds a rolling history from prior `ComponentScores` snapshots,
    /// oldest first, retaining at most `window` points per component.
    pub fn from_snapshots(snapshots: &[ComponentScores], window: usize) -> Self {
        let start = snapshots.len().saturating_sub(window);
        let recent = &snapshots[start..];
        ScalerHistory {
            momentum: recent.iter().map(|s| s.momentum).collect(),
            price_strength: recent.iter().map(|s| s.price_strength).collect(),
            volume: recent.iter().map(|s| s.volume).collect(),
            volatility: recent.iter().map(|s| s.volatility).collect(),
            equity_vs_bonds: recent.iter().map(|s| s.equity_vs_bonds).collect(),
            media_sentiment: recent.iter().map(|s| s.media_sentiment).collect(),
        }
    }
}

/// Scales every sub-score of `raw` against its own component's rolling
/// window, per §4.7.
pub fn scale_all(raw: ComponentScores, history: &ScalerHistory, window: usize) -> ComponentScores {
    ComponentScores {
        momentum: scale_component(raw.momentum, &history.momentum, window),
        price_strength: scale_component(raw.price_strength, &history.price_strength, window),
        volume: scale_component(raw.volume, &history.volume, window),
        volatility: scale_component(raw.volatility, &history.volatility, window),
        equity_vs_bonds: scale_component(raw.equity_vs_bonds, &history.equity_vs_bonds, window),
        media_sentiment: scale_component(raw.media_sentiment, &history.media_sentiment, window),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_window_returns_neutral() {
        let history = vec![42.0; 30];
        assert_eq!(scale_component(42.0, &history, 90), 50.0);
        assert_eq!(scale_component(99.0, &history, 90), 50.0);
    }

    #[test]
    fn thin_history_passes_through_unscaled() {
        assert_eq!(scale_component(73.0, &[10.0], 90), 73.0);
        assert_eq!(scale_component(73.0, &[], 90), 73.0);
    }

    #[test]
    fn value_at_window_extremes_maps_to_0_and_100() {
        let history: Vec<f64> = (0..30).map(|i| i as f64).collect();
        assert_eq!(scale_component(0.0, &history, 90), 0.0);
        assert_eq!(scale_component(29.0, &history, 90), 100.0);
        assert!((scale_component(14.5, &history, 90) - 50.0).abs() < 1.0);
    }

    #[test]
    fn window_only_considers_most_recent_points() {
        let mut history: Vec<f64> = vec![1000.0; 5];
        history.extend((0..10).map(|i| i as f64));
        // Only the last 10 values (0..9) should bound the window.
        assert_eq!(scale_component(9.0, &history, 10), 100.0);
    }
}
