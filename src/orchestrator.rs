//! Pipeline Orchestrator (C9): sequences C1–C8 plus cache invalidation and
//! persistence, with per-stage retry budgets independent of the per-HTTP
//! retries inside the fetcher. Every stage degrades to empty/neutral input
//! for the next one rather than aborting — the orchestrator always returns
//! a structured outcome, never an `Err` that escapes to the scheduler
//! (spec.md §9's remap of exceptions-as-control-flow).

use crate::aggregator::{self, Weights};
use crate::cache::CacheService;
use crate::components;
use crate::config::Config;
use crate::error::PipelineError;
use crate::extractor::{self, ScrapedUrlCache};
use crate::fetcher::{FetchOpts, Fetcher};
use crate::market::MarketDataService;
use crate::models::{Article, ComponentScores, IndexSnapshot, MarketBar};
use crate::persistence::{self, Persistence};
use crate::scaler::{self, ScalerHistory};
use crate::sentiment::lexicon::LexiconAnalyzer;
use crate::sentiment::{SentimentAnalyzer, SentimentResult};
use crate::sources::{self, SOURCES};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const MARKET_HISTORY_DAYS: i64 = 260;
const MAX_ARTICLES_PER_SOURCE: usize = 15;
const SENTIMENT_CONCURRENCY: usize = 4;
const STAGE_RETRY_ATTEMPTS: u32 = 3;
const STAGE_RETRY_BASE_SECS: u64 = 5;
const QUALITY_KEEP_TOP_N: usize = 3;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineCounts {
    pub market_bars: usize,
    pub articles_scraped: usize,
    pub articles_scored: usize,
    pub articles_persisted: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineOutcome {
    pub success: bool,
    pub score: f64,
    pub components: ComponentScores,
    pub counts: PipelineCounts,
    pub error: Option<String>,
}

impl PipelineOutcome {
    fn neutral(error: Option<String>) -> Self {
        PipelineOutcome {
            success: true,
            score: 50.0,
            components: ComponentScores::neutral(),
            counts: PipelineCounts::default(),
            error,
        }
    }
}

pub struct Orchestrator {
    config: Arc<Config>,
    fetcher: Arc<Fetcher>,
    market: MarketDataService,
    llm_analyzer: Option<Arc<dyn SentimentAnalyzer>>,
    persistence: Arc<Persistence>,
    cache: Arc<CacheService>,
    scraped_cache: SyncMutex<ScrapedUrlCache>,
    weights: Weights,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        fetcher: Arc<Fetcher>,
        llm_analyzer: Option<Arc<dyn SentimentAnalyzer>>,
        persistence: Arc<Persistence>,
        cache: Arc<CacheService>,
        scraped_cache_path: impl AsRef<std::path::Path>,
    ) -> Self {
        let market = MarketDataService::new(Arc::clone(&fetcher));
        Orchestrator {
            config,
            fetcher,
            market,
            llm_analyzer,
            persistence,
            cache,
            scraped_cache: SyncMutex::new(ScrapedUrlCache::load(scraped_cache_path)),
            weights: Weights::default(),
        }
    }

    /// Exposes the market series backing the simplified calculator and the
    /// backtest endpoint, without re-running the full scrape/sentiment stages.
    pub async fn market_history_for_simplified(&self, days: i64) -> Vec<MarketBar> {
        self.market.fetch_history(days, 13_500.0).await
    }

    pub async fn run(&self, target_date: Option<DateTime<Utc>>, cancel: CancellationToken) -> PipelineOutcome {
        let as_of = target_date.unwrap_or_else(Utc::now);
        let mut counts = PipelineCounts::default();

        if cancel.is_cancelled() {
            return PipelineOutcome::neutral(Some("cancelled before start".to_string()));
        }

        // Stage 1: market data. The live quote is fetched and logged
        // alongside the historical series (mirroring the original's
        // `_collect_market_data`, which does the same and still feeds only
        // the historical series to the component calculator) but is not
        // itself a C6 input — none of the six sub-scores take a live quote.
        let bars = self.market.fetch_history(MARKET_HISTORY_DAYS, 13_500.0).await;
        counts.market_bars = bars.len();
        let live_quotes = self.market.fetch_live().await;
        let live_last = live_quotes.first().map(|q| q.last).unwrap_or(0.0);
        tracing::info!(live_quotes = live_quotes.len(), live_last, "collected live market snapshot");

        if cancel.is_cancelled() {
            return PipelineOutcome::neutral(Some("cancelled after market stage".to_string()));
        }

        // Stage 2: scrape media across all sources.
        let mut articles = self.scrape_all_sources(&cancel).await;
        counts.articles_scraped = articles.len();

        if cancel.is_cancelled() {
            return PipelineOutcome::neutral(Some("cancelled after scrape stage".to_string()));
        }

        // Stage 3: sentiment scoring.
        self.score_articles(&mut articles).await;
        counts.articles_scored = articles.iter().filter(|a| a.sentiment_score.is_some()).count();

        // Stage 4: six components.
        let raw_components = components::calculate_all(&bars, &articles, as_of, None);

        // Stage 5: scale + aggregate.
        let history = self.scaler_history();
        let scaled = scaler::scale_all(raw_components, &history, scaler::DEFAULT_WINDOW_DAYS);
        let aggregate = aggregator::aggregate(&scaled, &self.weights);

        // Stage 6: persist + invalidate cache. A persistence failure is
        // logged but never corrupts the caller-visible result.
        let snapshot = IndexSnapshot {
            as_of,
            composite: aggregate.composite,
            components: scaled,
        };
        match self.persistence.commit_run(&snapshot, &articles) {
            Ok(persisted) => {
                counts.articles_persisted = persisted;
                self.invalidate_caches().await;
            }
            Err(e) => persistence::log_persistence_failure(&e),
        }

        if let Err(e) = self.scraped_cache.lock().save() {
            warn!("failed to persist scraped-url cache side file: {e}");
        }

        PipelineOutcome {
            success: true,
            score: aggregate.composite,
            components: scaled,
            counts,
            error: None,
        }
    }

    fn scaler_history(&self) -> ScalerHistory {
        match self.persistence.recent_components(scaler::DEFAULT_WINDOW_DAYS) {
            Ok(snapshots) => ScalerHistory {
                momentum: snapshots.iter().map(|s| s.momentum).collect(),
                price_strength: snapshots.iter().map(|s| s.price_strength).collect(),
                volume: snapshots.iter().map(|s| s.volume).collect(),
                volatility: snapshots.iter().map(|s| s.volatility).collect(),
                equity_vs_bonds: snapshots.iter().map(|s| s.equity_vs_bonds).collect(),
                media_sentiment: snapshots.iter().map(|s| s.media_sentiment).collect(),
            },
            Err(e) => {
                warn!("failed to load scaler history, passing raw values through: {e}");
                ScalerHistory::default()
            }
        }
    }

    async fn invalidate_caches(&self) {
        for pattern in ["index:*", "components:*", "media:*", "simplified:*"] {
            if let Err(e) = self.cache.delete_pattern(pattern).await {
                warn!(pattern, "cache invalidation failed: {e}");
            }
        }
    }

    /// Stage 2, with its own retry budget independent of the fetcher's
    /// per-HTTP retries: each source gets `STAGE_RETRY_ATTEMPTS` attempts at
    /// fetching its listing page(s), linear backoff `5s × attempt`.
    async fn scrape_all_sources(&self, cancel: &CancellationToken) -> Vec<Article> {
        let mut all_articles = Vec::new();
        for adapter in SOURCES {
            if cancel.is_cancelled() {
                break;
            }
            let articles = self.scrape_source_with_retry(adapter).await;
            all_articles.extend(articles);
        }
        all_articles
    }

    async fn scrape_source_with_retry(&self, adapter: &sources::SourceAdapter) -> Vec<Article> {
        for attempt in 0..STAGE_RETRY_ATTEMPTS {
            match self.scrape_source(adapter).await {
                Ok(articles) => return articles,
                Err(e) => {
                    warn!(source = adapter.name, attempt, "scrape stage failed: {e}");
                    if !e.is_retryable() {
                        break;
                    }
                    if attempt + 1 < STAGE_RETRY_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_secs(
                            STAGE_RETRY_BASE_SECS * (attempt as u64 + 1),
                        ))
                        .await;
                    }
                }
            }
        }
        // Exhausted retries (or hit a non-retryable error): degrade to an
        // empty contribution from this source rather than aborting the run
        // (§4.9 degradation policy).
        Vec::new()
    }

    async fn scrape_source(&self, adapter: &sources::SourceAdapter) -> Result<Vec<Article>, PipelineError> {
        let opts = FetchOpts {
            spacing_ms: adapter.spacing_ms,
            max_retries: self.config.max_retries,
            require_html: true,
        };

        let mut candidate_urls = Vec::new();
        for listing_url in adapter.listing_urls.iter().copied() {
            let listing = self.fetcher.fetch(listing_url, &opts).await?;
            candidate_urls.extend(extractor::extract_listing(&listing.body, listing_url, adapter));
        }

        let mut scraped = Vec::new();
        for url in candidate_urls.into_iter().take(MAX_ARTICLES_PER_SOURCE) {
            if self.scraped_cache.lock().is_recent(&url, std::time::Duration::from_secs(24 * 3600)) {
                continue;
            }
            let article = match self.fetch_and_extract(&url, adapter.name, &opts).await {
                Ok(Some(article)) => article,
                Ok(None) => continue,
                Err(e) => {
                    warn!(url, "article fetch/extract failed: {e}");
                    continue;
                }
            };
            self.scraped_cache.lock().mark(&url);
            scraped.push(article);
        }

        Ok(Self::apply_quality_gate(scraped, self.config.quality_cutoff))
    }

    async fn fetch_and_extract(
        &self,
        url: &str,
        source: &str,
        opts: &FetchOpts,
    ) -> Result<Option<Article>, PipelineError> {
        let fetched = self.fetcher.fetch(url, opts).await?;
        let article = extractor::extract_article(&fetched.body, &fetched.final_url, source, self.config.min_content_length);

        let Some(article) = article else {
            return Ok(None);
        };

        let max_age = ChronoDuration::days(self.config.max_article_age_days);
        if let Some(published_at) = article.published_at {
            if Utc::now() - published_at > max_age {
                return Ok(None);
            }
        }

        Ok(Some(article))
    }

    /// Articles under the quality cutoff are dropped unless the source
    /// yielded none above threshold, in which case the top `N` by score are
    /// kept regardless (§4.2).
    fn apply_quality_gate(mut articles: Vec<Article>, cutoff: f64) -> Vec<Article> {
        let passing: Vec<Article> = articles
            .iter()
            .filter(|a| a.quality_score.unwrap_or(0.0) >= cutoff)
            .cloned()
            .collect();
        if !passing.is_empty() {
            return passing;
        }
        articles.sort_by(|a, b| {
            b.quality_score
                .unwrap_or(0.0)
                .partial_cmp(&a.quality_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        articles.truncate(QUALITY_KEEP_TOP_N);
        articles
    }

    /// Stage 3: LLM preferred, with a whole-batch fallback to the lexicon
    /// analyzer on any LLM failure (§4.5/§7).
    async fn score_articles(&self, articles: &mut [Article]) {
        if articles.is_empty() {
            return;
        }

        if let Some(llm) = &self.llm_analyzer {
            match self.score_batch(articles, Arc::clone(llm)).await {
                Ok(()) => return,
                Err(e) => warn!("llm sentiment batch failed, falling back to lexicon: {e}"),
            }
        }

        let lexicon: Arc<dyn SentimentAnalyzer> = Arc::new(LexiconAnalyzer);
        // The lexicon path is CPU-bound and deterministic; it cannot itself
        // fail, so this call is infallible in practice.
        let _ = self.score_batch(articles, lexicon).await;
    }

    async fn score_batch(&self, articles: &mut [Article], analyzer: Arc<dyn SentimentAnalyzer>) -> anyhow::Result<()> {
        let semaphore = Arc::new(Semaphore::new(SENTIMENT_CONCURRENCY));
        let mut tasks = Vec::with_capacity(articles.len());

        for (idx, article) in articles.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let analyzer = Arc::clone(&analyzer);
            let title = article.title.clone();
            let summary = article.summary.clone().unwrap_or_default();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                let result = analyzer.score_article(&title, &summary).await;
                (idx, result)
            }));
        }

        let mut results: Vec<Option<SentimentResult>> = vec![None; articles.len()];
        for task in tasks {
            let (idx, result) = task.await?;
            results[idx] = Some(result?);
        }

        for (idx, result) in results.into_iter().enumerate() {
            if let Some(result) = result {
                articles[idx].sentiment_score = Some(result.score);
                articles[idx].sentiment_label = Some(result.label);
                articles[idx].sentiment_confidence = Some(result.confidence);
            }
        }
        Ok(())
    }
}

/// Neutral cold-start helper: a fresh component set and composite for when
/// every input source is empty, per Scenario A.
pub fn neutral_outcome() -> PipelineOutcome {
    let components = ComponentScores::neutral();
    let aggregate = aggregator::aggregate(&components, &Weights::default());
    PipelineOutcome {
        success: true,
        score: aggregate.composite,
        components,
        counts: PipelineCounts::default(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_gate_keeps_top_n_when_nothing_clears_cutoff() {
        let make = |url: &str, q: f64| Article {
            url: url.to_string(),
            source: "test".to_string(),
            title: String::new(),
            summary: None,
            content: String::new(),
            image_url: None,
            published_at: None,
            scraped_at: Utc::now(),
            sentiment_score: None,
            sentiment_label: None,
            sentiment_confidence: None,
            quality_score: Some(q),
        };
        let articles = vec![
            make("a", 0.10),
            make("b", 0.25),
            make("c", 0.05),
            make("d", 0.20),
        ];
        let kept = Orchestrator::apply_quality_gate(articles, 0.30);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].url, "b");
    }

    #[test]
    fn quality_gate_drops_below_cutoff_when_some_pass() {
        let make = |url: &str, q: f64| Article {
            url: url.to_string(),
            source: "test".to_string(),
            title: String::new(),
            summary: None,
            content: String::new(),
            image_url: None,
            published_at: None,
            scraped_at: Utc::now(),
            sentiment_score: None,
            sentiment_label: None,
            sentiment_confidence: None,
            quality_score: Some(q),
        };
        let articles = vec![make("a", 0.10), make("b", 0.50)];
        let kept = Orchestrator::apply_quality_gate(articles, 0.30);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "b");
    }

    #[test]
    fn neutral_cold_start_produces_neutral_composite() {
        let outcome = neutral_outcome();
        assert_eq!(outcome.score, 50.0);
        assert!(outcome.success);
    }
}
