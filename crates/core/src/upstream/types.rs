//! Upstream request/response types and the client trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::{RateLimitStatus, ResponseCacheStats};
use crate::catalog::CatalogItem;

/// One page request against a provider feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRequest {
    /// Feed path relative to the provider base URL (e.g. "/items").
    pub endpoint: String,
    /// 1-based page number.
    pub page: u32,
    /// Extra query parameters. Sorted, so equal requests build equal keys.
    pub params: BTreeMap<String, String>,
}

impl PageRequest {
    pub fn new(endpoint: impl Into<String>, page: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            page,
            params: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: &BTreeMap<String, String>) -> Self {
        self.params.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Query pairs sent on the wire, `page` first.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("page".to_string(), self.page.to_string())];
        pairs.extend(
            self.params
                .iter()
                .filter(|(k, _)| k.as_str() != "page")
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        pairs
    }

    /// Key identifying this request in the response cache.
    pub fn cache_key(&self) -> String {
        let query: Vec<String> = self
            .query_pairs()
            .into_iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(&k), urlencoding::encode(&v)))
            .collect();
        format!("{}?{}", self.endpoint, query.join("&"))
    }
}

/// A decoded page of the provider feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    pub page: u32,
    /// Records that decoded cleanly, in feed order.
    pub items: Vec<CatalogItem>,
    /// Keys (id) of records the provider flagged as deleted.
    pub removed: Vec<String>,
    /// Total page count, if the provider reported one.
    pub total_pages: Option<u32>,
    /// Records dropped because required fields were missing.
    pub skipped: usize,
}

impl ItemPage {
    /// True when the provider returned no records at all.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.removed.is_empty() && self.skipped == 0
    }
}

/// Errors returned by upstream clients.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Timeout, connection failure or non-2xx status. Safe to retry.
    #[error("transient upstream failure on {endpoint} page {page}: {reason}")]
    Transient {
        endpoint: String,
        page: u32,
        reason: String,
        status: Option<u16>,
    },

    /// Transport succeeded but the body could not be understood.
    #[error("malformed upstream response on {endpoint} page {page}: {reason}")]
    Malformed {
        endpoint: String,
        page: u32,
        reason: String,
    },

    #[error("upstream not configured: {0}")]
    NotConfigured(String),
}

impl UpstreamError {
    pub fn transient(request: &PageRequest, reason: impl Into<String>) -> Self {
        UpstreamError::Transient {
            endpoint: request.endpoint.clone(),
            page: request.page,
            reason: reason.into(),
            status: None,
        }
    }

    pub fn malformed(request: &PageRequest, reason: impl Into<String>) -> Self {
        UpstreamError::Malformed {
            endpoint: request.endpoint.clone(),
            page: request.page,
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Transient { .. })
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Transient { .. } => "transient",
            UpstreamError::Malformed { .. } => "malformed",
            UpstreamError::NotConfigured(_) => "not_configured",
        }
    }
}

/// Trait for upstream feed clients.
///
/// Implementations apply their own rate limiting and caching but never
/// retry; retry policy belongs to the caller.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Client name for logging.
    fn name(&self) -> &str;

    /// Fetch and decode one page.
    async fn fetch_page(&self, request: &PageRequest) -> Result<ItemPage, UpstreamError>;

    /// Requests sent over the network so far (cache hits excluded).
    fn request_count(&self) -> u64;

    /// Operator-facing view of the client. Clients without a limiter or
    /// response cache report only their request count.
    async fn status(&self) -> UpstreamStatus {
        UpstreamStatus {
            client: self.name().to_string(),
            requests: self.request_count(),
            rate_limit: None,
            response_cache: None,
        }
    }
}

/// Upstream client state for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamStatus {
    pub client: String,
    pub requests: u64,
    pub rate_limit: Option<RateLimitStatus>,
    pub response_cache: Option<ResponseCacheStats>,
}
