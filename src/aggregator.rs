//! Weighted composite (C8): a plain weighted-sum function over scaled
//! `ComponentScores`, plus the interpretation bands from §4.8. The weight
//! set here is the one surfaced as metadata and is authoritative — see
//! DESIGN.md's Open Question #1 for why the alternate set found in the
//! calculator isn't ported.

use crate::models::{ComponentScores, IndexLabel};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Weights {
    pub momentum: f64,
    pub price_strength: f64,
    pub volume: f64,
    pub volatility: f64,
    pub equity_vs_bonds: f64,
    pub media_sentiment: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Weights {
            momentum: 0.20,
            price_strength: 0.15,
            volume: 0.15,
            volatility: 0.20,
            equity_vs_bonds: 0.15,
            media_sentiment: 0.15,
        }
    }
}

impl Weights {
    fn sum(&self) -> f64 {
        self.momentum
            + self.price_strength
            + self.volume
            + self.volatility
            + self.equity_vs_bonds
            + self.media_sentiment
    }

    pub fn as_named_pairs(&self) -> [(&'static str, f64); 6] {
        [
            ("momentum", self.momentum),
            ("price_strength", self.price_strength),
            ("volume", self.volume),
            ("volatility", self.volatility),
            ("equity_vs_bonds", self.equity_vs_bonds),
            ("media_sentiment", self.media_sentiment),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateResult {
    pub composite: f64,
    pub label: IndexLabel,
}

/// `Σ wᵢ sᵢ / Σ wᵢ`, clamped to `[0,100]`. Panics only on a programmer error
/// (weights summing to zero) — callers should construct weights from
/// `Weights::default()` or validated config, never arbitrary input.
pub fn aggregate(components: &ComponentScores, weights: &Weights) -> AggregateResult {
    let total_weight = weights.sum();
    assert!(total_weight > 0.0, "aggregator weights must sum to a positive total");

    let weighted_sum = weights.momentum * components.momentum
        + weights.price_strength * components.price_strength
        + weights.volume * components.volume
        + weights.volatility * components.volatility
        + weights.equity_vs_bonds * components.equity_vs_bonds
        + weights.media_sentiment * components.media_sentiment;

    let composite = (weighted_sum / total_weight).clamp(0.0, 100.0);
    AggregateResult {
        composite,
        label: IndexLabel::from_score(composite),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores() -> ComponentScores {
        ComponentScores {
            momentum: 80.0,
            price_strength: 60.0,
            volume: 40.0,
            volatility: 20.0,
            equity_vs_bonds: 90.0,
            media_sentiment: 10.0,
        }
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!((Weights::default().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zeroing_a_weight_removes_its_influence_exactly() {
        let full = aggregate(&scores(), &Weights::default());

        let mut zeroed = Weights::default();
        zeroed.media_sentiment = 0.0;
        let without_sentiment = aggregate(&scores(), &zeroed);

        // Recompute by hand excluding media_sentiment entirely.
        let w = Weights::default();
        let manual_weight = w.momentum + w.price_strength + w.volume + w.volatility + w.equity_vs_bonds;
        let manual_sum = w.momentum * scores().momentum
            + w.price_strength * scores().price_strength
            + w.volume * scores().volume
            + w.volatility * scores().volatility
            + w.equity_vs_bonds * scores().equity_vs_bonds;
        let manual = manual_sum / manual_weight;

        assert!((without_sentiment.composite - manual).abs() < 1e-9);
        assert_ne!(full.composite, without_sentiment.composite);
    }

    #[test]
    fn composite_is_clamped_and_labeled() {
        let extreme_greed = ComponentScores {
            momentum: 100.0,
            price_strength: 100.0,
            volume: 100.0,
            volatility: 100.0,
            equity_vs_bonds: 100.0,
            media_sentiment: 100.0,
        };
        let result = aggregate(&extreme_greed, &Weights::default());
        assert_eq!(result.composite, 100.0);
        assert_eq!(result.label, IndexLabel::ExtremeGreed);
    }

    #[test]
    fn neutral_inputs_produce_neutral_label() {
        let result = aggregate(&ComponentScores::neutral(), &Weights::default());
        assert_eq!(result.composite, 50.0);
        assert_eq!(result.label, IndexLabel::Neutral);
    }
}
