//! Concurrent HTTP fetcher.
//!
//! One [`Fetcher`] is shared by all workers. Each request moves through
//! robots gating, the per-host concurrency limit, the adaptive
//! throttler, and the retry loop; the per-host permit is held across
//! retries so a retrying request still counts against its host's limit.
//! An optional response cache short-circuits the network entirely.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::Semaphore;
use url::Url;

use crate::error::{ConfigError, FetchError};
use crate::settings::Settings;
use crate::stats::CrawlStats;

use super::cache::{self, CachedResponse, ResponseCache};
use super::retry::RetryPolicy;
use super::robots::RobotsGate;
use super::throttle::AutoThrottler;

const MAX_REDIRECTS: usize = 10;

/// Result of a completed fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub body: Vec<u8>,
    pub final_url: Url,
    pub status: u16,
}

/// Shared HTTP fetch engine.
pub struct Fetcher {
    client: reqwest::Client,
    allowed_codes: HashSet<u16>,
    per_host_limit: usize,
    host_semaphores: DashMap<String, Arc<Semaphore>>,
    robots: Option<RobotsGate>,
    throttler: AutoThrottler,
    retry: RetryPolicy,
    cache: Option<Box<dyn ResponseCache>>,
    cache_enabled_for_get: bool,
    ignored_params: Vec<String>,
    stats: Arc<CrawlStats>,
}

impl Fetcher {
    pub fn new(settings: &Settings, stats: Arc<CrawlStats>) -> Result<Self, ConfigError> {
        let http = &settings.http;

        let mut headers = HeaderMap::new();
        for (name, value) in &http.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigError::InvalidSettings(vec![format!("invalid header name '{name}'")])
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ConfigError::InvalidSettings(vec![format!("invalid header value for '{name:?}'")])
            })?;
            headers.insert(name, value);
        }

        let redirect_policy = if http.allow_redirects {
            reqwest::redirect::Policy::limited(MAX_REDIRECTS)
        } else {
            reqwest::redirect::Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(http.timeout())
            .redirect(redirect_policy)
            .gzip(true)
            .brotli(true);

        if !http.proxies.is_empty() {
            let proxies = http.proxies.clone();
            builder = builder.proxy(reqwest::Proxy::custom(move |url: &Url| {
                url.host_str()
                    .and_then(|host| proxies.get(host))
                    .and_then(|proxy| Url::parse(proxy).ok())
            }));
        }

        let client = builder.build().map_err(|e| {
            ConfigError::InvalidSettings(vec![format!("failed to build HTTP client: {e}")])
        })?;

        let robots = http
            .respect_robots
            .then(|| RobotsGate::new(http.user_agent()));

        let default_target = (http.concurrency as f64 / 4.0).max(1.0);
        let throttler = AutoThrottler::new(&settings.throttle, default_target);
        let retry = RetryPolicy::new(&settings.retry);
        let cache = cache::build(&settings.cache)?;
        let cache_enabled_for_get = settings
            .cache
            .allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case("GET"));

        Ok(Self {
            client,
            allowed_codes: http.allowed_response_codes.iter().copied().collect(),
            per_host_limit: http.per_host,
            host_semaphores: DashMap::new(),
            robots,
            throttler,
            retry,
            cache,
            cache_enabled_for_get,
            ignored_params: settings.cache.ignored_params.clone(),
            stats,
        })
    }

    /// Fetch one URL, applying robots, throttling, and retries.
    pub async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError> {
        if let Some(robots) = &self.robots {
            if !robots.can_fetch(url).await {
                CrawlStats::incr(&self.stats.robots_denied);
                tracing::debug!(url = url.as_str(), "disallowed by robots.txt");
                return Err(FetchError::RobotsDenied);
            }
        }

        let host = host_key(url);
        let semaphore = self.host_semaphore(&host);
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| FetchError::Network("host limiter closed".to_string()))?;

        let key = cache::cache_key(url, &self.ignored_params);
        if let Some(cache) = &self.cache {
            if self.cache_enabled_for_get {
                if let Some(hit) = cache.get(&key) {
                    CrawlStats::incr(&self.stats.cache_hits);
                    tracing::debug!(url = url.as_str(), "cache hit");
                    let final_url =
                        Url::parse(&hit.final_url).unwrap_or_else(|_| url.clone());
                    return Ok(FetchOutcome {
                        body: hit.body,
                        final_url,
                        status: hit.status,
                    });
                }
            }
        }

        let mut attempt: u32 = 0;
        loop {
            self.throttler.wait(&host).await;

            tracing::debug!(url = url.as_str(), attempt, "fetching");
            let started = Instant::now();
            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let final_url = response.url().clone();
                    if self.retry.should_retry_status(attempt, status) {
                        attempt += 1;
                        CrawlStats::incr(&self.stats.retried);
                        tracing::warn!(url = url.as_str(), status, attempt, "retrying");
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                        continue;
                    }
                    let body = response
                        .bytes()
                        .await
                        .map_err(FetchError::from_reqwest)?
                        .to_vec();
                    self.throttler.record_latency(&host, started.elapsed());
                    if !self.allowed_codes.contains(&status) {
                        return Err(FetchError::StatusNotAllowed(status));
                    }
                    if let Some(cache) = &self.cache {
                        if self.cache_enabled_for_get {
                            cache.put(
                                &key,
                                &CachedResponse {
                                    status,
                                    final_url: final_url.as_str().to_string(),
                                    body: body.clone(),
                                },
                            );
                        }
                    }
                    CrawlStats::incr(&self.stats.fetched);
                    return Ok(FetchOutcome {
                        body,
                        final_url,
                        status,
                    });
                }
                Err(err) => {
                    self.throttler.record_latency(&host, started.elapsed());
                    let transient = err.is_timeout() || err.is_connect();
                    if transient && self.retry.should_retry_error(attempt) {
                        attempt += 1;
                        CrawlStats::incr(&self.stats.retried);
                        tracing::warn!(url = url.as_str(), attempt, error = %err, "retrying");
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::from_reqwest(err));
                }
            }
        }
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        self.host_semaphores
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }
}

/// Concurrency key for a URL: canonical host plus explicit port.
pub fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
