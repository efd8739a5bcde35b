//! Rate-limited HTTP client
//!
//! Every outbound platform call goes through [`HttpClient`]: it passes the
//! shared [`AdmissionLimiter`], carries a fixed per-call timeout (media
//! transfers use the longer [`HttpClient::media_timeout`]) and is retried
//! with exponential backoff on network errors and 5xx responses. Non-5xx
//! responses are returned as-is for the caller to classify.

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{HttpError, Result};
use crate::rate_limiter::AdmissionLimiter;

/// Characters of an upstream error body kept in errors and logs
const BODY_PREVIEW_CHARS: usize = 512;

#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    limiter: Arc<AdmissionLimiter>,
    retry_policy: ExponentialBuilder,
    media_timeout: Duration,
}

impl HttpClient {
    /// Build a client around an injected, process-wide limiter
    pub fn new(config: &HttpConfig, limiter: Arc<AdmissionLimiter>) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(10).min(config.timeout()))
            .timeout(config.timeout())
            .build()
            .map_err(HttpError::from)?;

        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(config.retry_min_delay())
            .with_max_delay(config.retry_min_delay() * 8)
            .with_max_times(config.max_retries)
            .with_jitter();

        Ok(Self {
            inner,
            limiter,
            retry_policy,
            media_timeout: config.media_timeout(),
        })
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        &self.limiter
    }

    /// Per-request timeout for calls that move media bytes
    pub fn media_timeout(&self) -> Duration {
        self.media_timeout
    }

    pub async fn get(&self, url: &str) -> std::result::Result<Response, HttpError> {
        self.request(Method::GET, url, |req| req).await
    }

    pub async fn post<F>(&self, url: &str, build: F) -> std::result::Result<Response, HttpError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        self.request(Method::POST, url, build).await
    }

    /// Issue a request, retrying transient failures
    ///
    /// `build` is invoked once per attempt to decorate a fresh request
    /// (headers, query, body), so it must be repeatable.
    pub async fn request<F>(
        &self,
        method: Method,
        url: &str,
        build: F,
    ) -> std::result::Result<Response, HttpError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let build = &build;

        (|| {
            let method = method.clone();
            async move {
                let _permit = self.limiter.admit().await?;
                let response = build(self.inner.request(method.clone(), url)).send().await?;

                if response.status().is_server_error() {
                    let status = response.status();
                    let body = body_preview(response).await;
                    debug!(%status, %method, url, body = %body, "Upstream server error (will retry)");
                    return Err(HttpError::Server { status, body });
                }

                Ok(response)
            }
        })
        .retry(self.retry_policy)
        .when(|e: &HttpError| e.is_retryable())
        .notify(|err: &HttpError, dur: Duration| {
            warn!("HTTP {} {} failed: {}. Retrying in {:?}", method, url, err, dur);
        })
        .await
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("limiter", &self.limiter)
            .finish()
    }
}

/// Read at most [`BODY_PREVIEW_CHARS`] of a response body for diagnostics
pub async fn body_preview(response: Response) -> String {
    match response.bytes().await {
        Ok(bytes) => String::from_utf8_lossy(&bytes)
            .chars()
            .take(BODY_PREVIEW_CHARS)
            .collect(),
        Err(e) => format!("<failed to read body: {e}>"),
    }
}
