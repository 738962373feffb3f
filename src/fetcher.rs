use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::MirrorError;

/// Browser identity sent by default; some origins refuse obvious bots.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// What came back from one GET.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Empty unless the status was 2xx.
    pub body: Vec<u8>,
    /// URL after redirects; relative references in a page resolve against it.
    pub final_url: Url,
}

impl FetchResponse {
    pub fn ok(final_url: Url, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: content_type.map(str::to_string),
            body: body.into(),
            final_url,
        }
    }

    /// A response that carries only a status, as returned for non-2xx answers.
    pub fn status_only(status: u16, final_url: Url) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
            final_url,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx answer into `HttpStatus`.
    pub fn error_for_status(self, requested: &Url) -> Result<Self, MirrorError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(MirrorError::HttpStatus {
                url: requested.to_string(),
                status: self.status,
            })
        }
    }

    /// HTML by content type, or by sniffing the body when the server sent none.
    pub fn is_html(&self) -> bool {
        match self.content_type.as_deref().map(str::to_ascii_lowercase) {
            Some(ct) if !ct.trim().is_empty() => {
                ct.contains("text/html") || ct.contains("application/xhtml+xml")
            }
            _ => {
                let head = String::from_utf8_lossy(&self.body[..self.body.len().min(64)])
                    .trim_start()
                    .to_ascii_lowercase();
                head.starts_with("<!doctype html") || head.starts_with("<html")
            }
        }
    }
}

/// Performs one GET. Implementations report non-2xx answers as an `Ok`
/// [`FetchResponse`] with an empty body and reserve `Err` for transport failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, MirrorError>;
}

/// reqwest-backed fetcher with a fixed timeout and a spoofed client identity.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = ClientBuilder::new()
            .use_rustls_tls()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, MirrorError> {
        let transport = |e: reqwest::Error| MirrorError::Transport {
            url: url.to_string(),
            source: Box::new(e),
        };

        let response = self.client.get(url.clone()).send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        debug!(%url, status, "response received");

        if !response.status().is_success() {
            return Ok(FetchResponse::status_only(status, final_url));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(transport)?;

        Ok(FetchResponse {
            status,
            content_type,
            body: body.to_vec(),
            final_url,
        })
    }
}

/// Extension point for retrying failed fetches. The mirror's own policy is
/// [`NoRetry`]: a failed URL is abandoned.
pub trait RetryPolicy: Send + Sync {
    /// Delay before attempt `attempt + 1` after `error`, or `None` to give up.
    /// `attempt` counts from 1.
    fn backoff(&self, attempt: u32, error: &MirrorError) -> Option<Duration>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn backoff(&self, _attempt: u32, _error: &MirrorError) -> Option<Duration> {
        None
    }
}

/// Retries fetch failures up to `max_attempts` total, doubling `initial_delay`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy for ExponentialBackoff {
    fn backoff(&self, attempt: u32, error: &MirrorError) -> Option<Duration> {
        if attempt >= self.max_attempts || !error.is_fetch_failure() {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        Some(self.initial_delay.saturating_mul(factor))
    }
}

/// Fetches `url`, turning non-2xx answers into errors and consulting `policy`
/// after each failure.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    policy: &dyn RetryPolicy,
    url: &Url,
) -> Result<FetchResponse, MirrorError> {
    let mut attempt = 1;
    loop {
        let result = match fetcher.fetch(url).await {
            Ok(response) => response.error_for_status(url),
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => return Ok(response),
            Err(e) => match policy.backoff(attempt, &e) {
                Some(delay) => {
                    debug!(%url, attempt, ?delay, error = %e, "retrying fetch");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_html_classification() {
        let page = FetchResponse::ok(url("https://ex.com/"), Some("text/html; charset=UTF-8"), "<p>");
        assert!(page.is_html());

        let css = FetchResponse::ok(url("https://ex.com/a.css"), Some("text/css"), "<html>");
        assert!(!css.is_html());

        let sniffed = FetchResponse::ok(url("https://ex.com/x"), None, "\n<!DOCTYPE html><html></html>");
        assert!(sniffed.is_html());

        let binary = FetchResponse::ok(url("https://ex.com/x"), None, vec![0x89, b'P', b'N', b'G']);
        assert!(!binary.is_html());
    }

    #[test]
    fn test_error_for_status() {
        let requested = url("https://ex.com/missing.png");
        let missing = FetchResponse::status_only(404, requested.clone());
        assert!(matches!(
            missing.error_for_status(&requested),
            Err(MirrorError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_no_retry_gives_up_after_one_attempt() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|url| Ok(FetchResponse::status_only(503, url.clone())));

        let result = fetch_with_retry(&fetcher, &NoRetry, &url("https://ex.com/")).await;
        assert!(matches!(result, Err(MirrorError::HttpStatus { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_backoff_policy_retries_until_success() {
        let mut fetcher = MockFetcher::new();
        let mut seq = mockall::Sequence::new();
        fetcher
            .expect_fetch()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|url| Ok(FetchResponse::status_only(502, url.clone())));
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|url| Ok(FetchResponse::ok(url.clone(), Some("text/css"), "body{}")));

        let policy = ExponentialBackoff {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
        };
        let response = fetch_with_retry(&fetcher, &policy, &url("https://ex.com/a.css"))
            .await
            .unwrap();
        assert_eq!(response.body, b"body{}");
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let policy = ExponentialBackoff {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
        };
        let error = MirrorError::HttpStatus {
            url: "https://ex.com/".to_string(),
            status: 500,
        };
        assert_eq!(policy.backoff(1, &error), Some(Duration::from_millis(100)));
        assert_eq!(policy.backoff(3, &error), Some(Duration::from_millis(400)));
        assert_eq!(policy.backoff(4, &error), None);
    }
}
