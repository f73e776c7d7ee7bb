//! Compliance store access + HTTP client utilities for the SGCA bridge.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};

mod memory;
mod rest;
mod store;

pub use memory::{MemoryState, MemoryStore};
pub use rest::{RestStore, RestStoreConfig};
pub use store::{ComplianceStore, SharedStore, StoreError};

pub const CRATE_NAME: &str = "sgca-storage";

/// 5xx and 429 are worth another try; every other status is final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Connect failures and timeouts are transient; body or redirect errors are not.
pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Capped exponential backoff: `base * 2^attempt`, never above `cap`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub retries: usize,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            retries: 3,
            base: Duration::from_millis(250),
            cap: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: usize) -> Duration {
        let multiplier = u32::try_from(attempt)
            .ok()
            .and_then(|exp| 2u32.checked_pow(exp))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier).min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Requests allowed on the wire at once across every caller.
    pub max_in_flight: usize,
    pub backoff: Backoff,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            max_in_flight: 8,
            backoff: Backoff::default(),
        }
    }
}

/// Successful response with its body already read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("invalid json from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
            FetchError::Decode { .. } => None,
        }
    }
}

/// Outcome of a single send.
enum Attempt {
    Done(HttpResponse),
    Retry(String),
    Fail(FetchError),
}

/// reqwest client shared by the table store and the Skualo adapter.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    backoff: Backoff,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        Ok(Self {
            client: builder.build().context("building http client")?,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            backoff: config.backoff,
        })
    }

    /// Sends the request produced by `build`, rebuilding it for every retry.
    pub async fn execute<F>(&self, label: &str, build: F) -> Result<HttpResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        // The semaphore is owned by `self` and never closed.
        let _permit = self.in_flight.acquire().await.expect("semaphore not closed");
        async {
            let mut attempt = 0;
            loop {
                match self.attempt(&build, attempt).await {
                    Attempt::Done(response) => return Ok(response),
                    Attempt::Fail(err) => return Err(err),
                    Attempt::Retry(reason) => {
                        let wait = self.backoff.delay(attempt);
                        debug!(attempt, reason = %reason, wait_ms = wait.as_millis() as u64, "retrying");
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                    }
                }
            }
        }
        .instrument(info_span!("http_request", label))
        .await
    }

    async fn attempt<F>(&self, build: &F, attempt: usize) -> Attempt
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let retries_left = attempt < self.backoff.retries;
        let resp = match build(&self.client).send().await {
            Ok(resp) => resp,
            Err(err) if retries_left && is_transient(&err) => return Attempt::Retry(err.to_string()),
            Err(err) => return Attempt::Fail(err.into()),
        };

        let status = resp.status();
        if retries_left && is_retryable_status(status) {
            return Attempt::Retry(status.to_string());
        }

        let url = resp.url().to_string();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Attempt::Fail(FetchError::HttpStatus {
                status: status.as_u16(),
                url,
                body,
            });
        }
        match resp.bytes().await {
            Ok(body) => Attempt::Done(HttpResponse {
                status,
                url,
                body: body.to_vec(),
            }),
            Err(err) => Attempt::Fail(err.into()),
        }
    }

    pub async fn get_json<T, F>(&self, label: &str, build: F) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let response = self.execute(label, build).await?;
        decode_json(&response)
    }
}

pub fn decode_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, FetchError> {
    serde_json::from_slice(&response.body).map_err(|source| FetchError::Decode {
        url: response.url.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_cap() {
        let backoff = Backoff {
            retries: 5,
            base: Duration::from_millis(100),
            cap: Duration::from_millis(350),
        };
        let delays: Vec<_> = (0..3).map(|n| backoff.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 350]);
        assert_eq!(backoff.delay(64), Duration::from_millis(350));
    }

    #[test]
    fn only_server_errors_and_throttling_retry() {
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        // PostgREST reports unique violations as 409; retrying cannot help.
        assert!(!is_retryable_status(StatusCode::CONFLICT));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn decode_errors_name_the_url() {
        let response = HttpResponse {
            status: StatusCode::OK,
            url: "https://store.test/rest/v1/periods".into(),
            body: b"not json".to_vec(),
        };
        let err = decode_json::<Vec<serde_json::Value>>(&response).unwrap_err();
        assert!(err.to_string().contains("https://store.test/rest/v1/periods"));
        assert_eq!(err.status(), None);
    }
}
