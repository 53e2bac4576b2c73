//! Core data model: market bars, live quotes, articles, component scores,
//! index snapshots. Invariants are enforced in smart constructors rather than
//! through newtype wrappers, matching how the rest of this codebase keeps
//! plain structs and validates at the edges.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MarketBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl MarketBar {
    pub fn new(
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> anyhow::Result<Self> {
        if volume < 0.0 {
            anyhow::bail!("volume must be >= 0, got {volume}");
        }
        if low > open || low > close || high < open || high < close {
            anyhow::bail!(
                "bar invariant violated for {date}: low={low} open={open} close={close} high={high}"
            );
        }
        Ok(MarketBar {
            date,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveQuote {
    pub symbol: String,
    pub last: f64,
    pub change_pct: f64,
    pub volume: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub url: String,
    pub source: String,
    pub title: String,
    pub summary: Option<String>,
    pub content: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
    pub sentiment_score: Option<f64>,
    pub sentiment_label: Option<String>,
    pub sentiment_confidence: Option<f64>,
    pub quality_score: Option<f64>,
}

impl Article {
    /// Whether `other`'s quality strictly exceeds ours, per the §3/§4.2 upsert rule.
    pub fn should_upgrade_from(&self, other_quality: f64) -> bool {
        match self.quality_score {
            Some(existing) => other_quality > existing,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ComponentScores {
    pub momentum: f64,
    pub price_strength: f64,
    pub volume: f64,
    pub volatility: f64,
    pub equity_vs_bonds: f64,
    pub media_sentiment: f64,
}

impl ComponentScores {
    pub fn neutral() -> Self {
        ComponentScores {
            momentum: 50.0,
            price_strength: 50.0,
            volume: 50.0,
            volatility: 50.0,
            equity_vs_bonds: 50.0,
            media_sentiment: 50.0,
        }
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

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub as_of: DateTime<Utc>,
    pub composite: f64,
    pub components: ComponentScores,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexLabel {
    ExtremeGreed,
    Greed,
    Neutral,
    Fear,
    ExtremeFear,
}

impl IndexLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            IndexLabel::ExtremeGreed
        } else if score >= 60.0 {
            IndexLabel::Greed
        } else if score >= 40.0 {
            IndexLabel::Neutral
        } else if score >= 25.0 {
            IndexLabel::Fear
        } else {
            IndexLabel::ExtremeFear
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexLabel::ExtremeGreed => "Extreme Greed",
            IndexLabel::Greed => "Greed",
            IndexLabel::Neutral => "Neutral",
            IndexLabel::Fear => "Fear",
            IndexLabel::ExtremeFear => "Extreme Fear",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_rejects_broken_ohlc_invariant() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        assert!(MarketBar::new(date, 10.0, 9.0, 8.0, 10.0, 100.0).is_err());
        assert!(MarketBar::new(date, 10.0, 12.0, 8.0, 10.0, 100.0).is_ok());
    }

    #[test]
    fn label_bands_match_spec_thresholds() {
        assert_eq!(IndexLabel::from_score(80.0), IndexLabel::ExtremeGreed);
        assert_eq!(IndexLabel::from_score(65.0), IndexLabel::Greed);
        assert_eq!(IndexLabel::from_score(50.0), IndexLabel::Neutral);
        assert_eq!(IndexLabel::from_score(30.0), IndexLabel::Fear);
        assert_eq!(IndexLabel::from_score(10.0), IndexLabel::ExtremeFear);
    }

    #[test]
    fn article_upgrade_rule_is_strict() {
        let mut a = Article {
            url: "https://x/1".into(),
            source: "x".into(),
            title: "t".into(),
            summary: None,
            content: "c".into(),
            image_url: None,
            published_at: None,
            scraped_at: Utc::now(),
            sentiment_score: None,
            sentiment_label: None,
            sentiment_confidence: None,
            quality_score: Some(0.4),
        };
        assert!(!a.should_upgrade_from(0.3));
        assert!(!a.should_upgrade_from(0.4));
        assert!(a.should_upgrade_from(0.41));
        a.quality_score = None;
        assert!(a.should_upgrade_from(0.0));
    }
}
