//! HTTP implementation of `UpstreamClient`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::{
    decode_page, ItemPage, PageRequest, ResponseCache, RollingWindowLimiter, UpstreamClient,
    UpstreamError, UpstreamStatus,
};
use crate::config::UpstreamConfig;
use crate::metrics;

/// Rate-limited, timeout-bounded client for the provider's JSON feed.
pub struct HttpUpstreamClient {
    client: Client,
    base_url: String,
    extra_params: BTreeMap<String, String>,
    limiter: RollingWindowLimiter,
    cache: ResponseCache,
    requests: AtomicU64,
}

impl HttpUpstreamClient {
    /// Create a new client from configuration.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(UpstreamError::NotConfigured(
                "upstream.base_url is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| UpstreamError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            extra_params: config.extra_params.clone(),
            limiter: RollingWindowLimiter::new(config.requests_per_minute),
            cache: ResponseCache::new(config.response_cache_ttl(), config.response_cache_capacity),
            requests: AtomicU64::new(0),
        })
    }

    /// Configured params first, request params on top.
    fn effective_request(&self, request: &PageRequest) -> PageRequest {
        let mut params = self.extra_params.clone();
        params.extend(request.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        PageRequest {
            endpoint: request.endpoint.clone(),
            page: request.page,
            params,
        }
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    async fn send(&self, request: &PageRequest) -> Result<ItemPage, UpstreamError> {
        let waited = self.limiter.acquire().await;
        if !waited.is_zero() {
            debug!(
                endpoint = %request.endpoint,
                page = request.page,
                waited_ms = waited.as_millis() as u64,
                "Request resumed after rate limit wait"
            );
        }

        self.requests.fetch_add(1, Ordering::Relaxed);
        let url = self.url_for(&request.endpoint);
        let start = Instant::now();

        let result = self
            .client
            .get(&url)
            .query(&request.query_pairs())
            .send()
            .await;

        metrics::UPSTREAM_REQUEST_DURATION
            .with_label_values(&[request.endpoint.as_str()])
            .observe(start.elapsed().as_secs_f64());

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("request timed out: {}", e)
                } else {
                    format!("request failed: {}", e)
                };
                metrics::UPSTREAM_REQUESTS
                    .with_label_values(&[request.endpoint.as_str(), "error"])
                    .inc();
                return Err(UpstreamError::transient(request, reason));
            }
        };

        let status = response.status();
        metrics::UPSTREAM_REQUESTS
            .with_label_values(&[request.endpoint.as_str(), status.as_str()])
            .inc();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Transient {
                endpoint: request.endpoint.clone(),
                page: request.page,
                reason: format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)),
                status: Some(status.as_u16()),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::transient(request, format!("reading body: {}", e)))?;

        decode_page(request, &body)
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<ItemPage, UpstreamError> {
        let request = self.effective_request(request);
        let key = request.cache_key();

        if let Some(page) = self.cache.get(&key) {
            debug!(endpoint = %request.endpoint, page = request.page, "Response cache hit");
            metrics::RESPONSE_CACHE.with_label_values(&["hit"]).inc();
            return Ok(page);
        }
        debug!(endpoint = %request.endpoint, page = request.page, "Response cache miss");
        metrics::RESPONSE_CACHE.with_label_values(&["miss"]).inc();

        let page = self.send(&request).await?;
        if page.skipped > 0 {
            warn!(
                endpoint = %request.endpoint,
                page = request.page,
                skipped = page.skipped,
                "Skipped upstream records with missing required fields"
            );
        }
        self.cache.insert(key, page.clone());
        Ok(page)
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    async fn status(&self) -> UpstreamStatus {
        UpstreamStatus {
            client: self.name().to_string(),
            requests: self.request_count(),
            rate_limit: Some(self.limiter.status().await),
            response_cache: Some(self.cache.stats()),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
