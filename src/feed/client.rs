//! Async HTTP transport used for feed pages and media downloads, plus the retry policy.

use super::error::{graph_error_message, FetchError};
use async_trait::async_trait;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; reelbook/0.1)";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_REDIRECTS: usize = 10;

/// Default number of retries after the first failed download attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// Minimal GET-bytes seam between the pipeline and the network.
///
/// The production implementation is [HttpClient]; tests substitute in-memory fakes
/// to count calls and script failures.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `url` and return the full body. Non-2xx statuses are errors.
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// reqwest-backed transport with a fixed User-Agent, timeout and redirect limit.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: redact_token(url),
                source: e.without_url(),
            })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| FetchError::BodyRead {
            url: redact_token(url),
            source: e.without_url(),
        })?;
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: redact_token(url),
                detail: graph_error_message(&body),
            });
        }
        Ok(body.to_vec())
    }
}

/// Builder for [HttpClient].
#[derive(Debug)]
pub struct HttpClientBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Request timeout in seconds. Default 60; video downloads can be slow.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn build(self) -> Result<HttpClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(HttpClient { inner })
    }
}

/// Bounded retry: how many attempts to make and how long to wait before each retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Vec<Duration>,
}

impl RetryPolicy {
    /// `retries` extra attempts after the first, no delay between them.
    pub fn immediate(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            backoff: Vec::new(),
        }
    }

    /// `retries` extra attempts, sleeping `backoff_secs[i]` before retry `i`.
    /// When the list is shorter than the number of retries its last value is reused.
    pub fn with_backoff_secs(retries: u32, backoff_secs: &[u64]) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            backoff: backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff
            .get(attempt as usize)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(DEFAULT_RETRIES)
    }
}

/// Strip the `access_token` query value so URLs can be logged and shown in errors.
pub fn redact_token(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) if parsed.query_pairs().any(|(k, _)| k == "access_token") => {
            let pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| {
                    let v = if k == "access_token" {
                        "REDACTED".to_string()
                    } else {
                        v.into_owned()
                    };
                    (k.into_owned(), v)
                })
                .collect();
            parsed.query_pairs_mut().clear().extend_pairs(pairs);
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
