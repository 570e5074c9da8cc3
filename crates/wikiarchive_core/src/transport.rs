use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::RETRY_AFTER;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use crate::error::TransportError;
use crate::pacing::{RateLimiter, Sleeper, ThreadSleeper};

pub type QueryParams = Vec<(String, String)>;

/// One request/response exchange against the wiki API.
///
/// Implementations own retries; callers only ever see the final outcome.
pub trait Transport: Sync {
    fn fetch(&self, params: &[(String, String)]) -> Result<Value, TransportError>;
    fn request_count(&self) -> usize;
}

/// Attempt budget and linear backoff: attempt `n` failing waits `backoff_step * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
    /// Upper bound on how long a server `Retry-After` may stretch one wait.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(1_500),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

/// Run `attempt_once` until it succeeds or the policy's attempt budget is spent.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut attempt_once: impl FnMut(u32) -> Result<T, TransportError>,
) -> Result<T, TransportError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let error = match attempt_once(attempt) {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !error.is_retryable() {
            return Err(error);
        }
        if attempt >= max_attempts {
            return Err(TransportError::Exhausted {
                attempts: attempt,
                last: Box::new(error),
            });
        }

        let mut wait = policy.backoff_for(attempt);
        if let Some(requested) = error.retry_after() {
            wait = wait.max(requested.min(policy.max_retry_after));
        }
        log::debug!("attempt {attempt}/{max_attempts} failed ({error}); retrying in {wait:?}");
        sleeper.sleep(wait);
        attempt += 1;
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
    pub rate_limit_rps: Option<f64>,
}

pub struct MediaWikiClient {
    client: Client,
    base_url: Url,
    user_agent: String,
    retry: RetryPolicy,
    limiter: Option<RateLimiter>,
    sleeper: Arc<dyn Sleeper>,
    request_count: AtomicUsize,
}

impl MediaWikiClient {
    pub fn new(config: &MediaWikiClientConfig) -> Result<Self> {
        Self::with_sleeper(config, Arc::new(ThreadSleeper))
    }

    pub fn with_sleeper(config: &MediaWikiClientConfig, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        let base_url = Url::parse(&config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            base_url,
            user_agent: config.user_agent.clone(),
            retry: config.retry,
            limiter: config.rate_limit_rps.and_then(RateLimiter::new),
            sleeper,
            request_count: AtomicUsize::new(0),
        })
    }

    fn send_once(&self, pairs: &[(String, String)]) -> Result<Value, TransportError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(self.sleeper.as_ref());
        }
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let response = self
            .client
            .get(self.base_url.clone())
            .header("User-Agent", self.user_agent.clone())
            .query(pairs)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status,
                retry_after: retry_after_header(&response),
            });
        }

        let body = response.text()?;
        let payload: Value =
            serde_json::from_str(&body).map_err(|error| TransportError::Decode(error.to_string()))?;
        if let Some(error) = payload.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            let info = error
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("unknown info");
            return Err(TransportError::Api {
                code: code.to_string(),
                info: info.to_string(),
            });
        }
        Ok(payload)
    }
}

impl Transport for MediaWikiClient {
    fn fetch(&self, params: &[(String, String)]) -> Result<Value, TransportError> {
        let pairs = request_pairs(params);
        with_retry(&self.retry, self.sleeper.as_ref(), |_| self.send_once(&pairs))
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
}

fn request_pairs(params: &[(String, String)]) -> QueryParams {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if key == "format" || key == "formatversion" || value.is_empty() {
            continue;
        }
        pairs.push((key.clone(), value.clone()));
    }
    pairs
}

fn retry_after_header(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Build a parameter list from borrowed pairs.
pub fn params(pairs: &[(&str, &str)]) -> QueryParams {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

/// Current wikitext of the page's main slot. A missing page yields an empty string.
pub fn fetch_page_wikitext<T: Transport + ?Sized>(
    transport: &T,
    title: &str,
) -> Result<String, TransportError> {
    let response = transport.fetch(&params(&[
        ("action", "query"),
        ("prop", "revisions"),
        ("rvprop", "content"),
        ("rvslots", "main"),
        ("titles", title),
    ]))?;
    let parsed: RevisionResponse = serde_json::from_value(response)
        .map_err(|error| TransportError::Decode(format!("page content response: {error}")))?;

    let content = parsed
        .query
        .pages
        .into_iter()
        .next()
        .and_then(|page| page.revisions.into_iter().next())
        .and_then(|revision| revision.slots)
        .and_then(|slots| slots.main)
        .map(|main| main.content)
        .unwrap_or_default();
    Ok(content)
}

/// Rendered HTML of the page as produced by `action=parse`.
pub fn fetch_page_html<T: Transport + ?Sized>(
    transport: &T,
    title: &str,
) -> Result<String, TransportError> {
    let response = transport.fetch(&params(&[
        ("action", "parse"),
        ("page", title),
        ("prop", "text"),
    ]))?;
    let parsed: ParseResponse = serde_json::from_value(response)
        .map_err(|error| TransportError::Decode(format!("parse response: {error}")))?;
    Ok(parsed.parse.text)
}

#[derive(Debug, Deserialize, Default)]
struct RevisionResponse {
    #[serde(default)]
    query: RevisionQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct RevisionQueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct ParseResponse {
    #[serde(default)]
    parse: ParsePayload,
}

#[derive(Debug, Deserialize, Default)]
struct ParsePayload {
    #[serde(default)]
    text: String,
}
