//! LLM-backed sentiment scoring, modeled on a chat-completion client with a
//! defensive fixed-field response parser — the same shape as a decision-DSL
//! parser elsewhere in this codebase, applied here to a
//! `SCORE/LABEL/CONFIDENCE/REASONING` block instead.

use super::{SentimentAnalyzer, SentimentResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SYSTEM_PROMPT: &str = r#"Tu es un analyste financier spécialisé dans le contexte géopolitique et économique marocain.
Évalue le ton de l'article fourni sur un axe allant de -1.0 (très négatif) à +1.0 (très positif), du point de vue
des intérêts économiques et géopolitiques du Maroc.

Axe positif : reconnaissance internationale du Maroc, investissement, création d'emplois,
affirmations de souveraineté sur le Sahara marocain, normalisation diplomatique.
Axe négatif : sanctions contre le Maroc, désinvestissement, contestation de souveraineté, troubles sociaux.

Exemples:
- "Reconnaissance américaine du Sahara marocain" -> score +1.0
- "Sanctions européennes contre le Maroc" -> score -1.0
- "Guterres évoque un moment historique pour résoudre ce conflit" -> score +0.7

Réponds STRICTEMENT avec ce format, une ligne par champ:
SCORE: <nombre entre -1.0 et 1.0>
LABEL: <Very Positive|Positive|Neutral|Negative|Very Negative>
CONFIDENCE: <nombre entre 0.0 et 1.0>
REASONING: <une phrase>"#;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

/// Defensively parses the four-field response block. Missing fields default
/// per §4.5 (score 0, confidence 0.5, label "Neutral"); score is clamped to
/// `[-1,+1]`.
fn parse_sentiment_block(raw: &str) -> SentimentResult {
    let mut score = 0.0f64;
    let mut label = "Neutral".to_string();
    let mut confidence = 0.5f64;
    let mut reasoning = String::new();

    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_uppercase();
        let value = value.trim();
        match key.as_str() {
            "SCORE" => {
                if let Ok(v) = value.parse::<f64>() {
                    score = v.clamp(-1.0, 1.0);
                }
            }
            "LABEL" => label = value.to_string(),
            "CONFIDENCE" => {
                if let Ok(v) = value.parse::<f64>() {
                    confidence = v.clamp(0.0, 1.0);
                }
            }
            "REASONING" => reasoning = value.to_string(),
            _ => {}
        }
    }

    SentimentResult {
        score,
        label,
        confidence,
        reasoning,
    }
}

pub struct LlmAnalyzer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl LlmAnalyzer {
    pub fn new(http: reqwest::Client, api_key: String, model: String) -> Self {
        LlmAnalyzer {
            http,
            api_key,
            model,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }

}

#[async_trait]
impl SentimentAnalyzer for LlmAnalyzer {
    async fn score_article(&self, title: &str, summary: &str) -> anyhow::Result<SentimentResult> {
        let user_content = format!("Titre: {title}\nRésumé: {summary}");

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            temperature: 0.2,
            max_tokens: 200,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(30))
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("llm request failed: {e}"))?;

        if !response.status().is_success() {
            anyhow::bail!("llm request returned status {}", response.status());
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("llm response parse failed: {e}"))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| anyhow::anyhow!("llm response had no message content"))?;

        Ok(parse_sentiment_block(&content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_block() {
        let raw = "SCORE: 0.7\nLABEL: Positive\nCONFIDENCE: 0.85\nREASONING: strong recognition";
        let r = parse_sentiment_block(raw);
        assert_eq!(r.score, 0.7);
        assert_eq!(r.label, "Positive");
        assert_eq!(r.confidence, 0.85);
    }

    #[test]
    fn defaults_missing_fields() {
        let raw = "REASONING: unparseable response";
        let r = parse_sentiment_block(raw);
        assert_eq!(r.score, 0.0);
        assert_eq!(r.label, "Neutral");
        assert_eq!(r.confidence, 0.5);
    }

    #[test]
    fn clamps_out_of_range_score() {
        let raw = "SCORE: 5.0\nCONFIDENCE: -1.0";
        let r = parse_sentiment_block(raw);
        assert_eq!(r.score, 1.0);
        assert_eq!(r.confidence, 0.0);
    }
}
