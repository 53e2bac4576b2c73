//! Process entry point: loads configuration, builds the Arc-of-services
//! graph (fetcher, persistence, cache, orchestrator, scheduler), registers
//! the pipeline's scheduled jobs, and serves the HTTP API.
//!
//! No module owns global mutable state; everything below is constructed
//! once here and passed down explicitly.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use feargreed_core::api::{self, AppState};
use feargreed_core::cache::CacheService;
use feargreed_core::config::Config;
use feargreed_core::fetcher::Fetcher;
use feargreed_core::orchestrator::Orchestrator;
use feargreed_core::persistence::Persistence;
use feargreed_core::scheduler::{Scheduler, Trigger};
use feargreed_core::sentiment::llm::LlmAnalyzer;
use feargreed_core::sentiment::SentimentAnalyzer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SCRAPED_CACHE_FILE: &str = "scraped_urls.json";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Arc::new(Config::from_env().context("failed to load configuration")?);
    info!(port = config.port, db = %config.database_path, "starting casablanca fear & greed core");

    let fetcher = Fetcher::new(config.http_timeout())?;
    let persistence = Arc::new(Persistence::open(&config.database_path)?);
    let cache = Arc::new(CacheService::connect(config.redis_url.as_deref()).await);

    let llm_analyzer: Option<Arc<dyn SentimentAnalyzer>> = match &config.llm_api_key {
        Some(key) => {
            info!(model = %config.llm_model, "LLM sentiment path enabled");
            let http = reqwest::Client::builder().timeout(config.http_timeout()).build()?;
            Some(Arc::new(LlmAnalyzer::new(http, key.clone(), config.llm_model.clone())))
        }
        None => {
            info!("no LLM_API_KEY configured; sentiment falls back to the lexicon path");
            None
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&config),
        fetcher,
        llm_analyzer,
        Arc::clone(&persistence),
        Arc::clone(&cache),
        SCRAPED_CACHE_FILE,
    ));

    let timezone: Tz = config
        .scheduler_timezone
        .parse()
        .unwrap_or_else(|_| {
            warn!(tz = %config.scheduler_timezone, "unrecognized scheduler timezone, defaulting to UTC");
            Tz::UTC
        });
    let scheduler = Scheduler::new(timezone);

    {
        let orchestrator = Arc::clone(&orchestrator);
        scheduler.register("pipeline:interval", Trigger::IntervalMinutes(config.scheduler_interval_minutes), move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let outcome = orchestrator.run(None, CancellationToken::new()).await;
                info!(score = outcome.score, success = outcome.success, "scheduled pipeline run complete");
            }
        });
    }

    if let Some((hour, minute)) = parse_hhmm(&config.scheduler_daily_run) {
        let orchestrator = Arc::clone(&orchestrator);
        scheduler.register("pipeline:daily", Trigger::DailyCron { hour, minute }, move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let outcome = orchestrator.run(None, CancellationToken::new()).await;
                info!(score = outcome.score, success = outcome.success, "daily pipeline run complete");
            }
        });
    } else {
        warn!(raw = %config.scheduler_daily_run, "could not parse SCHEDULER_DAILY_RUN as HH:MM, daily job not registered");
    }

    let state = AppState {
        orchestrator,
        persistence,
        cache,
        scheduler,
        config: Arc::clone(&config),
    };

    let app = api::router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind http listener")?;
    info!(addr, "api listening");
    axum::serve(listener, app).await.context("http server error")?;

    Ok(())
}

fn parse_hhmm(raw: &str) -> Option<(u32, u32)> {
    let (h, m) = raw.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feargreed_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
