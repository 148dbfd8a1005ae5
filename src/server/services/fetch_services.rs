// outbound requests to media origins. everything the proxy sends upstream goes through here so
// timeouts, retries and header handling live in exactly one spot
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode, header};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use mockall::automock;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::AppConfig,
    server::utils::{OpaqueReference, content_encoding::UPSTREAM_ACCEPT_ENCODING},
};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

pub type DynFetchService = Arc<dyn FetchServiceTrait + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// transient failures that outlived every retry
    #[error("upstream unavailable after {attempts} attempt(s): {reason}")]
    UpstreamUnavailable { attempts: u32, reason: String },
    /// 403/404 and friends, usually an expired url. never retried
    #[error("upstream rejected the request with status {status}")]
    UpstreamRejected { status: u16 },
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
    #[error("upstream body failed mid-stream: {0}")]
    Body(String),
    #[error("upstream body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    /// raw client Range header, forwarded untouched
    pub range: Option<String>,
    /// ask for gzip/zstd, only when we read the body ourselves
    pub accept_compressed: bool,
}

impl UpstreamRequest {
    pub fn new(url: Url, headers: BTreeMap<String, String>) -> Self {
        Self {
            url,
            headers,
            range: None,
            accept_compressed: false,
        }
    }

    pub fn for_reference(reference: &OpaqueReference) -> Result<Self, FetchError> {
        let url = Url::parse(&reference.target_url)
            .map_err(|e| FetchError::InvalidRequest(format!("bad target url: {}", e)))?;
        Ok(Self::new(url, reference.request_headers()))
    }

    pub fn with_range(mut self, range: Option<String>) -> Self {
        self.range = range;
        self
    }

    pub fn compressed(mut self) -> Self {
        self.accept_compressed = true;
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// where we actually ended up after redirects, playlists resolve against this
    pub final_url: Url,
    pub body: ByteStream,
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("final_url", &self.final_url.as_str())
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    pub fn header_str(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// buffers the whole body, bailing out once it grows past `limit`
    pub async fn collect_limited(self, limit: usize) -> Result<Vec<u8>, FetchError> {
        let mut body = self.body;
        let mut out = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if out.len() + chunk.len() > limit {
                return Err(FetchError::BodyTooLarge { limit });
            }
            out.extend_from_slice(&chunk);
        }

        Ok(out)
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// retries on top of the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.upstream_max_retries,
            base_delay: Duration::from_millis(config.upstream_retry_base_ms),
            ..Self::default()
        }
    }

    /// 0 for the first attempt, then base, 2x base, 4x base ... capped at max_delay
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2_u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[automock]
#[async_trait]
pub trait FetchServiceTrait {
    /// one logical fetch, retries included. the body is streamed, not buffered
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError>;
}

enum AttemptFailure {
    Transient(String),
    Rejected(u16),
    Invalid(String),
}

pub struct FetchService {
    http: reqwest::Client,
    policy: RetryPolicy,
    request_timeout: Duration,
    default_user_agent: String,
}

impl FetchService {
    /// pooled client shared by everything that talks to the outside
    pub fn build_client(config: &AppConfig) -> anyhow::Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .http2_adaptive_window(true)
            .build()?;
        Ok(client)
    }

    pub fn new(http: reqwest::Client, config: &AppConfig) -> Self {
        Self {
            http,
            policy: RetryPolicy::from_config(config),
            request_timeout: config.request_timeout(),
            default_user_agent: config.default_user_agent.clone(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn attempt(&self, request: &UpstreamRequest) -> Result<reqwest::Response, AttemptFailure> {
        let mut builder = self.http.get(request.url.clone());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if !request.has_header("user-agent") {
            builder = builder.header(header::USER_AGENT, self.default_user_agent.as_str());
        }

        if let Some(range) = &request.range {
            builder = builder.header(header::RANGE, range.as_str());
        }

        // segments go back to the client byte for byte, so never invite a compressed copy
        builder = builder.header(
            header::ACCEPT_ENCODING,
            if request.accept_compressed {
                UPSTREAM_ACCEPT_ENCODING
            } else {
                "identity"
            },
        );

        let response = match tokio::time::timeout(self.request_timeout, builder.send()).await {
            Err(_) => {
                return Err(AttemptFailure::Transient(format!(
                    "no response within {:?}",
                    self.request_timeout
                )));
            }
            Ok(Err(e)) if e.is_builder() => return Err(AttemptFailure::Invalid(e.to_string())),
            Ok(Err(e)) => return Err(AttemptFailure::Transient(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            Err(AttemptFailure::Transient(format!("upstream status {}", status)))
        } else {
            Err(AttemptFailure::Rejected(status.as_u16()))
        }
    }
}

#[async_trait]
impl FetchServiceTrait for FetchService {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        let mut last_reason = String::new();
        let attempts = self.policy.max_retries + 1;
        let started = Instant::now();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for_attempt(attempt);
                // a little jitter so a burst of players doesn't retry in lockstep
                let jitter = Duration::from_millis(rand::random_range(0..=delay.as_millis() as u64 / 4));
                metrics::counter!("upstream_retries_total").increment(1);
                tokio::time::sleep(delay + jitter).await;
            }

            metrics::counter!("upstream_attempts_total").increment(1);

            match self.attempt(&request).await {
                Ok(response) => {
                    metrics::histogram!("upstream_time_to_headers_seconds")
                        .record(started.elapsed().as_secs_f64());
                    debug!(
                        "upstream {} answered {} on attempt {}",
                        request.url,
                        response.status(),
                        attempt + 1
                    );
                    return Ok(UpstreamResponse {
                        status: response.status(),
                        headers: response.headers().clone(),
                        final_url: response.url().clone(),
                        body: Box::pin(
                            response
                                .bytes_stream()
                                .map_err(|e| FetchError::Body(e.to_string())),
                        ),
                    });
                }
                Err(AttemptFailure::Rejected(status)) => {
                    warn!("upstream {} rejected request with {}", request.url, status);
                    return Err(FetchError::UpstreamRejected { status });
                }
                Err(AttemptFailure::Invalid(reason)) => {
                    return Err(FetchError::InvalidRequest(reason));
                }
                Err(AttemptFailure::Transient(reason)) => {
                    warn!(
                        "upstream {} attempt {}/{} failed: {}",
                        request.url,
                        attempt + 1,
                        attempts,
                        reason
                    );
                    last_reason = reason;
                }
            }
        }

        Err(FetchError::UpstreamUnavailable {
            attempts,
            reason: last_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_millis(350));
    }

    #[test]
    fn reference_headers_carry_the_referer() {
        let reference = OpaqueReference::new(
            "https://cdn.example/a/seg.ts",
            Some("https://site.example/".to_string()),
            Some(BTreeMap::from([("Origin".to_string(), "https://site.example".to_string())])),
        );

        let request = UpstreamRequest::for_reference(&reference).unwrap();

        assert_eq!(request.headers.get("Referer").unwrap(), "https://site.example/");
        assert_eq!(request.headers.get("Origin").unwrap(), "https://site.example");
        assert!(!request.has_header("user-agent"));
    }
}
