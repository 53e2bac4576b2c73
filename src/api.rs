//! HTTP surface (C18): axum router over the orchestrator, scaler/aggregator
//! history, the simplified calculator, and the backtest service. Mirrors the
//! teacher's `Router::new().nest("/api/v1", ...)` + `AppState` shape, scaled
//! down to this crate's read endpoints plus one POST trigger.

use crate::aggregator::Weights;
use crate::backtest;
use crate::cache::{self, CacheService};
use crate::config::Config;
use crate::models::{Article, IndexLabel, IndexSnapshot};
use crate::orchestrator::Orchestrator;
use crate::persistence::Persistence;
use crate::scheduler::Scheduler;
use crate::simplified;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub persistence: Arc<Persistence>,
    pub cache: Arc<CacheService>,
    pub scheduler: Arc<Scheduler>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn v1_routes() -> Router<AppState> {
    Router::new()
        .route("/index/latest", get(index_latest))
        .route("/index/history", get(index_history))
        .route("/components/latest", get(components_latest))
        .route("/metadata/weights", get(metadata_weights))
        .route("/simplified-v2/score", get(simplified_score))
        .route("/backtest/run", get(backtest_run))
        .route("/pipeline/run", post(pipeline_run))
        .route("/scheduler/status", get(scheduler_status))
        .route("/media/latest", get(media_latest))
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn err(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(ApiError { error: message.into() })).into_response()
}

#[derive(Debug, Serialize)]
struct IndexSnapshotResponse {
    as_of: chrono::DateTime<Utc>,
    composite: f64,
    label: &'static str,
    components: crate::models::ComponentScores,
}

impl From<IndexSnapshot> for IndexSnapshotResponse {
    fn from(snapshot: IndexSnapshot) -> Self {
        IndexSnapshotResponse {
            as_of: snapshot.as_of,
            composite: snapshot.composite,
            label: IndexLabel::from_score(snapshot.composite).as_str(),
            components: snapshot.components,
        }
    }
}

async fn index_latest(State(state): State<AppState>) -> axum::response::Response {
    let cache_key = "index:latest";
    if let Ok(Some(cached)) = state.cache.get::<IndexSnapshot>(cache_key).await {
        return Json(IndexSnapshotResponse::from(cached)).into_response();
    }
    match state.persistence.latest_snapshot() {
        Ok(Some(snapshot)) => {
            let _ = state
                .cache
                .set(cache_key, &snapshot, cache::ttl::VOLUME_OR_SIMPLIFIED)
                .await;
            Json(IndexSnapshotResponse::from(snapshot)).into_response()
        }
        Ok(None) => err(StatusCode::NOT_FOUND, "no index snapshot has been computed yet"),
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    range: Option<String>,
}

/// Recognizes the `/index/history` and `/backtest/run` `range` values:
/// `30d,90d,180d,1y,all`. `all` is capped at the `/index/history` 365-row
/// cap anyway, so it's represented here as a long-enough horizon.
fn parse_range_days(range: &Option<String>) -> i64 {
    match range.as_deref() {
        Some("30d") => 30,
        Some("90d") => 90,
        Some("180d") => 180,
        Some("1y") => 365,
        Some("all") => 36_500,
        _ => 30,
    }
}

async fn index_history(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> axum::response::Response {
    let days = parse_range_days(&q.range);
    let since = Utc::now() - chrono::Duration::days(days);
    match state.persistence.history(since, 365) {
        Ok(snapshots) => {
            let body: Vec<IndexSnapshotResponse> = snapshots.into_iter().map(IndexSnapshotResponse::from).collect();
            Json(body).into_response()
        }
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn components_latest(State(state): State<AppState>) -> axum::response::Response {
    match state.persistence.latest_snapshot() {
        Ok(Some(snapshot)) => Json(snapshot.components).into_response(),
        Ok(None) => err(StatusCode::NOT_FOUND, "no index snapshot has been computed yet"),
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct WeightsResponse {
    weights: Vec<(&'static str, f64)>,
}

async fn metadata_weights() -> Json<WeightsResponse> {
    Json(WeightsResponse {
        weights: Weights::default().as_named_pairs().to_vec(),
    })
}

async fn simplified_score(State(state): State<AppState>) -> axum::response::Response {
    let cache_key = "simplified:latest";
    if let Ok(Some(cached)) = state.cache.get::<simplified::SimplifiedScore>(cache_key).await {
        return Json(cached).into_response();
    }

    let bars = state.orchestrator.market_history_for_simplified(simplified::UNIVERSE_SIZE as i64 * 4).await;
    let articles = match state.persistence.articles_page(200, 0) {
        Ok(articles) => articles,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let score = simplified::calculate(&bars, &articles, Utc::now());
    let _ = state.cache.set(cache_key, &score, cache::ttl::VOLUME_OR_SIMPLIFIED).await;
    Json(score).into_response()
}

#[derive(Debug, Deserialize)]
struct BacktestQuery {
    range: Option<String>,
}

async fn backtest_run(State(state): State<AppState>, Query(q): Query<BacktestQuery>) -> axum::response::Response {
    let days = parse_range_days(&q.range).max(90);
    let since = Utc::now() - chrono::Duration::days(days);
    let snapshots = match state.persistence.history(since, 10_000) {
        Ok(snapshots) => snapshots,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let bars = state.orchestrator.market_history_for_simplified(days + 10).await;
    let result = backtest::run(&snapshots, &bars);
    Json(result).into_response()
}

#[derive(Debug, Serialize)]
struct PipelineRunResponse {
    success: bool,
    score: f64,
    error: Option<String>,
}

async fn pipeline_run(State(state): State<AppState>) -> axum::response::Response {
    let outcome = state.orchestrator.run(None, CancellationToken::new()).await;
    Json(PipelineRunResponse {
        success: outcome.success,
        score: outcome.score,
        error: outcome.error,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct SchedulerStatusResponse {
    jobs: Vec<JobStatusResponse>,
}

#[derive(Debug, Serialize)]
struct JobStatusResponse {
    name: String,
    running: bool,
    paused: bool,
}

async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatusResponse> {
    let jobs = state
        .scheduler
        .list()
        .into_iter()
        .map(|j| JobStatusResponse {
            name: j.name,
            running: j.running,
            paused: j.paused,
        })
        .collect();
    Json(SchedulerStatusResponse { jobs })
}

#[derive(Debug, Deserialize)]
struct MediaQuery {
    limit: Option<usize>,
    cursor: Option<i64>,
}

#[derive(Debug, Serialize)]
struct MediaPageResponse {
    articles: Vec<Article>,
    next_cursor: Option<i64>,
}

async fn media_latest(State(state): State<AppState>, Query(q): Query<MediaQuery>) -> axum::response::Response {
    let limit = q.limit.unwrap_or(20).clamp(1, 100);
    match state.persistence.articles_after_cursor(limit, q.cursor) {
        Ok(rows) => {
            let next_cursor = rows.last().map(|(id, _)| *id);
            let articles = rows.into_iter().map(|(_, article)| article).collect();
            Json(MediaPageResponse { articles, next_cursor }).into_response()
        }
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
