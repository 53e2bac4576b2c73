//! Environment-driven configuration, loaded once at process start and passed
//! through explicitly (the orchestrator, scheduler and API all take `Arc<Config>`
//! rather than reading the environment themselves).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub redis_url: Option<String>,
    pub scheduler_timezone: String,
    pub scheduler_daily_run: String,
    pub scheduler_interval_minutes: u64,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub min_content_length: usize,
    pub max_article_age_days: i64,
    pub quality_cutoff: f64,
    pub delay_between_requests_ms: u64,
    pub max_retries: u32,
    pub http_timeout_secs: u64,
    pub port: u16,
    /// Accepted per §6 but not enforced here — rate-limit *admission* is an
    /// external concern (the HTTP shell's, not the ingestion core's).
    pub rate_limit_requests_per_minute: u32,
    pub rate_limit_burst: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./feargreed.db".to_string());
        let redis_url = std::env::var("REDIS_URL").ok();
        let scheduler_timezone = std::env::var("SCHEDULER_TIMEZONE")
            .unwrap_or_else(|_| "Africa/Casablanca".to_string());
        let scheduler_daily_run =
            std::env::var("SCHEDULER_DAILY_RUN").unwrap_or_else(|_| "16:00".to_string());
        let scheduler_interval_minutes = std::env::var("SCHEDULER_INTERVAL_MINUTES")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let llm_api_key = std::env::var("LLM_API_KEY").ok().filter(|s| !s.is_empty());
        let llm_model =
            std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let min_content_length = std::env::var("MIN_CONTENT_LENGTH")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);
        let max_article_age_days = std::env::var("MAX_ARTICLE_AGE_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .unwrap_or(7);
        let quality_cutoff = std::env::var("QUALITY_CUTOFF")
            .unwrap_or_else(|_| "0.30".to_string())
            .parse()
            .unwrap_or(0.30);
        let delay_between_requests_ms = std::env::var("DELAY_BETWEEN_REQUESTS_MS")
            .unwrap_or_else(|_| "1500".to_string())
            .parse()
            .unwrap_or(1500);
        let max_retries = std::env::var("MAX_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);
        let http_timeout_secs = std::env::var("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8088".to_string())
            .parse()
            .unwrap_or(8088);
        let rate_limit_requests_per_minute = std::env::var("RATE_LIMIT_REQUESTS_PER_MINUTE")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);
        let rate_limit_burst = std::env::var("RATE_LIMIT_BURST")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        Ok(Config {
            database_path,
            redis_url,
            scheduler_timezone,
            scheduler_daily_run,
            scheduler_interval_minutes,
            llm_api_key,
            llm_model,
            min_content_length,
            max_article_age_days,
            quality_cutoff,
            delay_between_requests_ms,
            max_retries,
            http_timeout_secs,
            port,
            rate_limit_requests_per_minute,
            rate_limit_burst,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_any_env() {
        std::env::remove_var("DATABASE_PATH");
        std::env::remove_var("REDIS_URL");
        std::env::remove_var("LLM_API_KEY");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.scheduler_daily_run, "16:00");
        assert_eq!(cfg.max_article_age_days, 7);
        assert!(cfg.llm_api_key.is_none());
    }
}
