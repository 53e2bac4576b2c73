//! Black-box integration tests for the HTTP fetcher (C1) against a real local
//! HTTP server, rather than a mocked client — covers retry/backoff, the
//! per-host spacing floor, and 403 terminality end-to-end.

use feargreed_core::fetcher::{FetchOpts, Fetcher};
use httpmock::prelude::*;
use std::time::{Duration, Instant};

fn opts(spacing_ms: u64, max_retries: u32) -> FetchOpts {
    FetchOpts {
        spacing_ms,
        max_retries,
        require_html: true,
    }
}

#[tokio::test]
async fn succeeds_on_first_attempt_for_an_html_response() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/article");
        then.status(200)
            .header("content-type", "text/html; charset=utf-8")
            .body("<html><body>hello</body></html>");
    });

    let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();
    let result = fetcher.fetch(&server.url("/article"), &opts(0, 2)).await;

    let fetched = result.expect("a clean 200 html response should succeed");
    assert!(fetched.body.contains("hello"));
}

#[tokio::test]
async fn exhausts_retry_budget_on_persistent_server_errors() {
    let server = MockServer::start();
    let failing = server.mock(|when, then| {
        when.method(GET).path("/flaky");
        then.status(500);
    });

    let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();
    let result = fetcher.fetch(&server.url("/flaky"), &opts(0, 2)).await;

    assert!(result.is_err());
    // Initial attempt plus `max_retries` retries.
    failing.assert_hits(3);
}

#[tokio::test]
async fn not_html_content_type_is_rejected_for_article_fetches() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/feed.json");
        then.status(200).header("content-type", "application/json").body("{}");
    });

    let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();
    let result = fetcher.fetch(&server.url("/feed.json"), &opts(0, 1)).await;

    assert!(result.is_err(), "non-HTML content-type must fail the article fetch gate");
}

#[tokio::test]
async fn forbidden_is_terminal_after_one_attempt() {
    let server = MockServer::start();
    let forbidden = server.mock(|when, then| {
        when.method(GET).path("/blocked");
        then.status(403);
    });

    let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();
    let result = fetcher.fetch(&server.url("/blocked"), &opts(0, 5)).await;

    assert!(result.is_err());
    // No headless fallback is configured, so 403 must not be retried.
    forbidden.assert_hits(1);
}

#[tokio::test]
async fn per_host_spacing_delays_a_second_request_to_the_same_host() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/a");
        then.status(200).header("content-type", "text/html").body("<html></html>");
    });
    server.mock(|when, then| {
        when.method(GET).path("/b");
        then.status(200).header("content-type", "text/html").body("<html></html>");
    });

    let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();
    let spacing = opts(300, 1);

    let start = Instant::now();
    fetcher.fetch(&server.url("/a"), &spacing).await.unwrap();
    fetcher.fetch(&server.url("/b"), &spacing).await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(280),
        "second request to the same host should wait out the spacing floor, took {elapsed:?}"
    );
}
