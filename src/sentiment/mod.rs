//! Morocco-centric geopolitical/economic sentiment scoring, with an LLM path
//! and a lexicon fallback behind one trait so the orchestrator can switch
//! between them without touching call sites.

pub mod lexicon;
pub mod llm;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct SentimentResult {
    pub score: f64,
    pub label: String,
    pub confidence: f64,
    pub reasoning: String,
}

impl SentimentResult {
    pub fn label_for(score: f64) -> &'static str {
        if score >= 0.3 {
            "Very Positive"
        } else if score > 0.0 {
            "Positive"
        } else if score == 0.0 {
            "Neutral"
        } else if score > -0.3 {
            "Negative"
        } else {
            "Very Negative"
        }
    }
}

#[async_trait]
pub trait SentimentAnalyzer: Send + Sync {
    async fn score_article(&self, title: &str, summary: &str) -> anyhow::Result<SentimentResult>;
}

/// Confidence-weighted average of `(polarity, confidence)` pairs in `[-1,+1]`,
/// mapped linearly onto `[0,100]` via `(p+1)×50` — §4.5's batch-normalization
/// rule, which is C6's authoritative media-sentiment formula (the plain
/// average in `components::media_sentiment` falls back to this with uniform
/// weight when no confidence was recorded for an article).
pub fn batch_media_sentiment_score(scores: &[(f64, f64)]) -> f64 {
    if scores.is_empty() {
        return 50.0;
    }
    let weight_sum: f64 = scores.iter().map(|(_, confidence)| confidence).sum();
    if weight_sum <= 0.0 {
        let avg = scores.iter().map(|(score, _)| score).sum::<f64>() / scores.len() as f64;
        return ((avg + 1.0) * 50.0).clamp(0.0, 100.0);
    }
    let weighted = scores
        .iter()
        .map(|(score, confidence)| score * confidence)
        .sum::<f64>()
        / weight_sum;
    ((weighted + 1.0) * 50.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_score_maps_positive_polarity_above_fifty() {
        let scores = [(0.8, 0.9), (0.6, 0.7)];
        let score = batch_media_sentiment_score(&scores);
        assert!(score > 80.0, "expected strongly positive mapped score, got {score}");
    }

    #[test]
    fn empty_batch_is_neutral() {
        assert_eq!(batch_media_sentiment_score(&[]), 50.0);
    }

    #[test]
    fn zero_confidence_falls_back_to_plain_average() {
        let scores = [(1.0, 0.0), (-0.5, 0.0)];
        let score = batch_media_sentiment_score(&scores);
        let expected = ((0.25 + 1.0) * 50.0_f64).clamp(0.0, 100.0);
        assert!((score - expected).abs() < 1e-9);
    }
}
