//! Polite, fault-tolerant HTTP fetching: per-host spacing, user-agent
//! rotation, retry with exponential backoff, and a content-type gate for
//! article fetches.

use crate::error::PipelineError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
];

#[derive(Debug, Clone)]
pub struct FetchOpts {
    pub spacing_ms: u64,
    pub max_retries: u32,
    pub require_html: bool,
}

impl Default for FetchOpts {
    fn default() -> Self {
        FetchOpts {
            spacing_ms: 1500,
            max_retries: 3,
            require_html: true,
        }
    }
}

pub struct FetchResult {
    pub body: String,
    pub final_url: String,
}

/// Shared, process-global fetcher. Per-host timestamps live behind one
/// `tokio::sync::Mutex` because spacing needs an async sleep while the lock
/// is held across the wait decision (a `parking_lot` sync mutex can't be held
/// across an `.await`).
pub struct Fetcher {
    client: reqwest::Client,
    last_request: Mutex<HashMap<String, Instant>>,
    ua_cursor: AtomicUsize,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build http client: {e}"))?;
        Ok(Arc::new(Fetcher {
            client,
            last_request: Mutex::new(HashMap::new()),
            ua_cursor: AtomicUsize::new(0),
        }))
    }

    fn next_user_agent(&self) -> &'static str {
        let i = self.ua_cursor.fetch_add(1, Ordering::Relaxed) % USER_AGENTS.len();
        USER_AGENTS[i]
    }

    fn host_of(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|s| s.to_string()))
            .unwrap_or_else(|| url.to_string())
    }

    async fn wait_for_spacing(&self, host: &str, spacing_ms: u64) {
        let deficit = {
            let mut last = self.last_request.lock().await;
            let now = Instant::now();
            let deficit = match last.get(host) {
                Some(prev) => {
                    let elapsed = now.duration_since(*prev);
                    let spacing = Duration::from_millis(spacing_ms);
                    spacing.checked_sub(elapsed)
                }
                None => None,
            };
            last.insert(host.to_string(), now);
            deficit
        };
        if let Some(deficit) = deficit {
            tokio::time::sleep(deficit).await;
        }
    }

    pub async fn fetch(&self, url: &str, opts: &FetchOpts) -> Result<FetchResult, PipelineError> {
        let host = Self::host_of(url);
        self.wait_for_spacing(&host, opts.spacing_ms).await;

        let mut attempt: u32 = 0;
        loop {
            let ua = self.next_user_agent();
            let response = self
                .client
                .get(url)
                .header("User-Agent", ua)
                .header("Accept-Language", "fr-MA,fr;q=0.9,en;q=0.8")
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let final_url = resp.url().to_string();
                        let content_type = resp
                            .headers()
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        let body = resp
                            .text()
                            .await
                            .map_err(|e| PipelineError::Transient(e.to_string()))?;
                        if opts.require_html && !content_type.contains("html") {
                            return Err(PipelineError::NotHtml(final_url));
                        }
                        return Ok(FetchResult { body, final_url });
                    }

                    if status.as_u16() == 403 {
                        return Err(PipelineError::Forbidden(url.to_string()));
                    }

                    let retryable = status.is_server_error() || status.as_u16() == 429;
                    if !retryable || attempt >= opts.max_retries {
                        return Err(PipelineError::Transient(format!(
                            "status {status} for {url} (attempt {attempt})"
                        )));
                    }
                }
                Err(e) => {
                    if attempt >= opts.max_retries {
                        return Err(PipelineError::Transient(e.to_string()));
                    }
                    debug!(url, attempt, "fetch error, will retry: {e}");
                }
            }

            let backoff = Duration::from_secs(2u64.saturating_pow(attempt));
            warn!(url, attempt, ?backoff, "retrying fetch");
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_rotation_cycles_through_pool() {
        let fetcher_ua_cursor = AtomicUsize::new(0);
        let seen: Vec<usize> = (0..USER_AGENTS.len() * 2)
            .map(|_| fetcher_ua_cursor.fetch_add(1, Ordering::Relaxed) % USER_AGENTS.len())
            .collect();
        assert_eq!(seen[0], seen[USER_AGENTS.len()]);
    }

    #[test]
    fn host_of_extracts_host_only() {
        assert_eq!(Fetcher::host_of("https://example.ma/a/b?c=1"), "example.ma");
    }
}
