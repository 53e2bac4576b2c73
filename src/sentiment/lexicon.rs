//! French financial/geopolitical lexicon scoring — the Morocco-context
//! fallback path used when the LLM path is unavailable or fails for a batch.
//! Ported in meaning from the word/phrase sets and window rules of the
//! Python original this spec was distilled from.

use super::{SentimentAnalyzer, SentimentResult};
use async_trait::async_trait;
use std::collections::HashSet;

const POSITIVE_WORDS: &[&str] = &[
    "hausse",
    "croissance",
    "investissement",
    "création",
    "emploi",
    "emplois",
    "partenariat",
    "accord",
    "reconnaissance",
    "soutien",
    "normalisation",
    "record",
    "progression",
    "excellent",
    "solide",
    "dynamisme",
    "essor",
    "relance",
    "bénéfice",
    "profit",
    "optimisme",
];

const NEGATIVE_WORDS: &[&str] = &[
    "baisse",
    "récession",
    "crise",
    "sanction",
    "sanctions",
    "désinvestissement",
    "contestation",
    "instabilité",
    "tension",
    "tensions",
    "conflit",
    "chute",
    "effondrement",
    "grève",
    "inquiétude",
    "incertitude",
    "déficit",
    "endettement",
    "licenciement",
    "licenciements",
    "ralentissement",
];

const POSITIVE_PHRASES: &[&str] = &[
    "reconnaissance américaine",
    "sahara marocain",
    "création d'emplois",
    "investissement étranger",
    "croissance économique",
    "partenariat stratégique",
];

const NEGATIVE_PHRASES: &[&str] = &[
    "sanctions contre",
    "crise économique",
    "instabilité politique",
    "contestation de la souveraineté",
];

const INTENSIFIERS: &[&str] = &[
    "très",
    "extrêmement",
    "fortement",
    "particulièrement",
    "considérablement",
    "massivement",
];

const NEGATORS: &[&str] = &["pas", "ne", "non", "aucun", "aucune", "jamais", "sans"];

const RESOLUTION_WORDS: &[&str] = &[
    "résoudre",
    "résolution",
    "solution",
    "régler",
    "historique",
    "accord",
    "apaisement",
];

const MOROCCO_POSITIVE_CONTEXT: &[&str] = &[
    "maroc",
    "marocain",
    "marocaine",
    "royaume",
    "sahara marocain",
    "province du sud",
    "provinces du sud",
    "autonomie",
    "régions du sud",
];

const WINDOW: usize = 5;

fn normalize(text: &str) -> Vec<String> {
    text.to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

fn bigrams(tokens: &[String]) -> Vec<String> {
    tokens
        .windows(2)
        .map(|w| format!("{} {}", w[0], w[1]))
        .collect()
}

fn window_contains(tokens: &[String], idx: usize, set: &HashSet<&'static str>) -> bool {
    let start = idx.saturating_sub(WINDOW);
    let end = (idx + WINDOW + 1).min(tokens.len());
    tokens[start..end].iter().any(|t| set.contains(t.as_str()))
}

struct Hit {
    idx: usize,
    is_phrase: bool,
    polarity: Polarity,
}

#[derive(PartialEq, Clone, Copy)]
enum Polarity {
    Positive,
    Negative,
}

/// Scores raw text deterministically: same text always yields the same
/// polarity/confidence, per the idempotence property this analyzer must hold.
pub fn score_text(text: &str) -> SentimentResult {
    let positive_words: HashSet<&'static str> = POSITIVE_WORDS.iter().copied().collect();
    let negative_words: HashSet<&'static str> = NEGATIVE_WORDS.iter().copied().collect();
    let intensifiers: HashSet<&'static str> = INTENSIFIERS.iter().copied().collect();
    let negators: HashSet<&'static str> = NEGATORS.iter().copied().collect();
    let resolution_words: HashSet<&'static str> = RESOLUTION_WORDS.iter().copied().collect();
    let morocco_context: HashSet<&'static str> = MOROCCO_POSITIVE_CONTEXT.iter().copied().collect();
    let positive_phrases: HashSet<&'static str> = POSITIVE_PHRASES.iter().copied().collect();
    let negative_phrases: HashSet<&'static str> = NEGATIVE_PHRASES.iter().copied().collect();

    let tokens = normalize(text);
    let bgrams = bigrams(&tokens);
    let word_count = tokens.len().max(1);

    let mut hits: Vec<Hit> = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        if positive_words.contains(tok.as_str()) {
            hits.push(Hit {
                idx: i,
                is_phrase: false,
                polarity: Polarity::Positive,
            });
        } else if negative_words.contains(tok.as_str()) {
            hits.push(Hit {
                idx: i,
                is_phrase: false,
                polarity: Polarity::Negative,
            });
        }
    }
    for (i, bg) in bgrams.iter().enumerate() {
        if positive_phrases.contains(bg.as_str()) {
            hits.push(Hit {
                idx: i,
                is_phrase: true,
                polarity: Polarity::Positive,
            });
        } else if negative_phrases.contains(bg.as_str()) {
            hits.push(Hit {
                idx: i,
                is_phrase: true,
                polarity: Polarity::Negative,
            });
        }
    }

    let mut positive_score = 0.0f64;
    let mut negative_score = 0.0f64;

    for hit in &hits {
        let mut base_score = 1.0f64;

        let prev_is_negator = hit.idx > 0 && negators.contains(tokens[hit.idx - 1].as_str());
        let prev_is_intensifier =
            hit.idx > 0 && intensifiers.contains(tokens[hit.idx - 1].as_str());
        let is_resolution_context = window_contains(&tokens, hit.idx, &resolution_words);
        let is_morocco_context = window_contains(&tokens, hit.idx, &morocco_context);

        if prev_is_negator {
            base_score = -base_score;
        }
        if prev_is_intensifier {
            base_score *= 1.5;
        }
        if hit.is_phrase {
            base_score *= 1.5;
        }

        let negated = base_score < 0.0;
        let magnitude = base_score.abs();

        match hit.polarity {
            Polarity::Positive => {
                let mut contribution = magnitude;
                if is_morocco_context {
                    contribution *= 1.3;
                }
                if negated {
                    negative_score += contribution;
                } else {
                    positive_score += contribution;
                }
            }
            Polarity::Negative => {
                if is_resolution_context {
                    // "a conflict being resolved" reads bullish despite the negative word.
                    positive_score += magnitude * 1.5;
                } else if negated {
                    positive_score += magnitude;
                } else {
                    let mut contribution = magnitude;
                    if is_morocco_context {
                        contribution *= 1.3;
                    }
                    negative_score += contribution;
                }
            }
        }
    }

    let total = positive_score + negative_score;
    let polarity = if total > 0.0 {
        (positive_score - negative_score) / total
    } else {
        0.0
    };
    let confidence = ((positive_score - negative_score).abs() / word_count as f64 * 2.0).min(1.0);

    SentimentResult {
        score: polarity.clamp(-1.0, 1.0),
        label: SentimentResult::label_for(polarity).to_string(),
        confidence,
        reasoning: format!(
            "lexicon: {} positive hit(s), {} negative hit(s) over {} tokens",
            hits.iter().filter(|h| h.polarity == Polarity::Positive).count(),
            hits.iter().filter(|h| h.polarity == Polarity::Negative).count(),
            word_count
        ),
    }
}

pub struct LexiconAnalyzer;

#[async_trait]
impl SentimentAnalyzer for LexiconAnalyzer {
    async fn score_article(&self, title: &str, summary: &str) -> anyhow::Result<SentimentResult> {
        let combined = format!("{title} {summary}");
        Ok(score_text(&combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn morocco_recognition_scores_strongly_positive() {
        let r = score_text("Reconnaissance américaine du Sahara marocain, création d'emplois");
        assert!(r.score > 0.5, "expected strong positive, got {}", r.score);
    }

    #[test]
    fn sanctions_against_morocco_scores_strongly_negative() {
        let r = score_text("Sanctions contre le Maroc, désinvestissement massif");
        assert!(r.score < -0.5, "expected strong negative, got {}", r.score);
    }

    #[test]
    fn resolution_window_overrides_conflict_word() {
        let r = score_text("Un moment historique pour résoudre le conflit");
        assert!(r.score >= 0.4, "expected resolution bonus to win out, got {}", r.score);
    }

    #[test]
    fn scoring_is_deterministic() {
        let text = "Hausse de la bourse et croissance solide au Maroc";
        let a = score_text(text);
        let b = score_text(text);
        assert_eq!(a.score, b.score);
    }

    #[test]
    fn neutral_text_scores_zero() {
        let r = score_text("Le ciel est bleu aujourd'hui");
        assert_eq!(r.score, 0.0);
    }
}
