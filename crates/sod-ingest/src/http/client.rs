//! HTTP client with retry, backoff, rate-limit cooldown, and pacing
//!
//! Every outbound request of the pipeline goes through [`RetryingClient`].
//! A response is classified as success (2xx), rate-limited (429), transient
//! (5xx, timeouts, connection failures), or permanent (anything else).
//! Transient and rate-limited outcomes are retried up to
//! [`RetryPolicy::max_attempts`]; permanent ones fail on the first attempt.

use super::clock::Clock;
use crate::config::RetryPolicy;
use crate::error::{FetchError, FetchResult};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A GET request with query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// URL plus query for log lines, with the API key left out
    fn describe(&self) -> String {
        let shown: Vec<String> = self
            .query
            .iter()
            .filter(|(k, _)| k != "api_key")
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if shown.is_empty() {
            self.url.clone()
        } else {
            format!("{}?{}", self.url, shown.join("&"))
        }
    }
}

/// A successful response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Attempts it took, including the successful one
    pub attempts: u32,
}

impl FetchResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RateLimited,
    Transient,
    Permanent,
}

pub fn classify_status(status: StatusCode) -> Outcome {
    if status.is_success() {
        Outcome::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Outcome::RateLimited
    } else if status.is_server_error() {
        Outcome::Transient
    } else {
        Outcome::Permanent
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub struct RetryingClient {
    client: Client,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    last_request: Mutex<Option<Instant>>,
    requests_sent: AtomicU64,
}

impl RetryingClient {
    pub fn new(
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        user_agent: &str,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            policy,
            clock,
            last_request: Mutex::new(None),
            requests_sent: AtomicU64::new(0),
        })
    }

    /// Requests put on the wire so far, retries included
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Wait out the pacing interval if the previous request was too recent,
    /// then claim the slot
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let since = self.clock.now().saturating_duration_since(previous);
            if since < self.policy.request_interval {
                self.clock.sleep(self.policy.request_interval - since).await;
            }
        }
        *last = Some(self.clock.now());
    }

    /// Perform a GET, retrying transient failures
    pub async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchResponse> {
        let target = request.describe();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.pace().await;
            self.requests_sent.fetch_add(1, Ordering::Relaxed);
            debug!(url = %target, attempt, "Sending request");

            let (reason, wait) = match self
                .client
                .get(&request.url)
                .query(&request.query)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    match classify_status(status) {
                        Outcome::Success => match response.bytes().await {
                            Ok(body) => {
                                return Ok(FetchResponse {
                                    status: status.as_u16(),
                                    body: body.to_vec(),
                                    attempts: attempt,
                                });
                            },
                            Err(e) => {
                                (format!("body read failed: {}", e), self.policy.backoff(attempt))
                            },
                        },
                        Outcome::RateLimited => {
                            let hinted = retry_after(response.headers()).unwrap_or_default();
                            let wait = self
                                .policy
                                .rate_limit_cooldown
                                .max(hinted)
                                .max(self.policy.backoff(attempt));
                            ("HTTP 429 Too Many Requests".to_string(), wait)
                        },
                        Outcome::Transient => {
                            (format!("HTTP {}", status), self.policy.backoff(attempt))
                        },
                        Outcome::Permanent => {
                            warn!(url = %target, status = status.as_u16(), "Permanent HTTP failure");
                            return Err(FetchError::Permanent {
                                url: target,
                                status: Some(status.as_u16()),
                                reason: format!("HTTP {}", status),
                            });
                        },
                    }
                },
                Err(e) if e.is_builder() => {
                    return Err(FetchError::Permanent {
                        url: target,
                        status: None,
                        reason: format!("invalid request: {}", e),
                    });
                },
                Err(e) => {
                    let kind = if e.is_timeout() { "timeout" } else { "connection error" };
                    (format!("{}: {}", kind, e), self.policy.backoff(attempt))
                },
            };

            if attempt >= max_attempts {
                warn!(url = %target, attempts = attempt, %reason, "Giving up after retries");
                return Err(FetchError::Transient {
                    url: target,
                    attempts: attempt,
                    reason,
                });
            }

            warn!(
                url = %target,
                attempt,
                max_attempts,
                wait_ms = wait.as_millis() as u64,
                %reason,
                "Request failed, retrying"
            );
            self.clock.sleep(wait).await;
        }
    }

    /// Fetch a page and note which offset it covered, for log correlation
    pub async fn fetch_page(&self, request: &FetchRequest) -> FetchResult<FetchResponse> {
        if let Some(offset) = request.query_value("offset") {
            debug!(offset, "Fetching page");
        }
        self.fetch(request).await
    }
}
