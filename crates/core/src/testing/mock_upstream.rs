//! Mock upstream feed for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::catalog::CatalogItem;
use crate::upstream::{ItemPage, PageRequest, UpstreamClient, UpstreamError};

/// An injected page failure.
#[derive(Debug, Clone)]
struct InjectedFailure {
    error: UpstreamError,
    /// Remaining failures; `None` fails forever.
    remaining: Option<u32>,
}

/// Mock implementation of the UpstreamClient trait.
///
/// Provides controllable behavior for testing:
/// - Scripted pages per endpoint (pages past the script come back empty)
/// - Injected failures per page, permanent or for a number of attempts
/// - Recorded requests for assertions
/// - Simulated latency
pub struct MockUpstream {
    /// Scripted pages per endpoint; index 0 is page 1.
    pages: Arc<RwLock<HashMap<String, Vec<ItemPage>>>>,
    /// Failures keyed by (endpoint, page).
    failures: Arc<RwLock<HashMap<(String, u32), InjectedFailure>>>,
    /// Recorded requests in arrival order.
    requests: Arc<RwLock<Vec<PageRequest>>>,
    /// Page count reported on every page, if set.
    total_pages: Arc<RwLock<Option<u32>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    request_count: AtomicU64,
}

impl std::fmt::Debug for MockUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockUpstream")
            .field("pages", &"<pages>")
            .field("failures", &"<failures>")
            .field("requests", &"<requests>")
            .finish()
    }
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUpstream {
    /// Create a new mock with no pages.
    pub fn new() -> Self {
        Self {
            pages: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            requests: Arc::new(RwLock::new(Vec::new())),
            total_pages: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(None)),
            request_count: AtomicU64::new(0),
        }
    }

    /// Script an endpoint's feed: one inner vec per page.
    pub async fn set_pages(&self, endpoint: &str, pages: Vec<Vec<CatalogItem>>) {
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, items)| ItemPage {
                page: i as u32 + 1,
                items,
                ..ItemPage::default()
            })
            .collect();
        self.pages.write().await.insert(endpoint.to_string(), pages);
    }

    /// Replace a single page (1-based), padding with empty pages as needed.
    pub async fn set_page(&self, endpoint: &str, page: ItemPage) {
        let mut pages = self.pages.write().await;
        let feed = pages.entry(endpoint.to_string()).or_default();
        let idx = page.page.max(1) as usize - 1;
        while feed.len() <= idx {
            let n = feed.len() as u32 + 1;
            feed.push(ItemPage {
                page: n,
                ..ItemPage::default()
            });
        }
        feed[idx] = page;
    }

    /// Report this page count on every returned page.
    pub async fn set_total_pages(&self, total: Option<u32>) {
        *self.total_pages.write().await = total;
    }

    /// Delay every response by `delay`.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().await = delay;
    }

    /// Make a page fail on every request.
    pub async fn fail_page(&self, endpoint: &str, page: u32, error: UpstreamError) {
        self.failures.write().await.insert(
            (endpoint.to_string(), page),
            InjectedFailure {
                error,
                remaining: None,
            },
        );
    }

    /// Make a page fail for the next `times` requests, then succeed.
    pub async fn fail_page_times(&self, endpoint: &str, page: u32, times: u32, error: UpstreamError) {
        self.failures.write().await.insert(
            (endpoint.to_string(), page),
            InjectedFailure {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Remove all injected failures.
    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// Get recorded requests.
    pub async fn recorded_requests(&self) -> Vec<PageRequest> {
        self.requests.read().await.clone()
    }

    /// Page numbers requested from `endpoint`, in request order.
    pub async fn requested_pages(&self, endpoint: &str) -> Vec<u32> {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .map(|r| r.page)
            .collect()
    }

    /// Clear recorded requests.
    pub async fn clear_requests(&self) {
        self.requests.write().await.clear();
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<ItemPage, UpstreamError> {
        self.requests.write().await.push(request.clone());
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let delay = *self.delay.read().await;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        {
            let mut failures = self.failures.write().await;
            let key = (request.endpoint.clone(), request.page);
            if let Some(failure) = failures.get_mut(&key) {
                let error = failure.error.clone();
                match failure.remaining {
                    None => return Err(error),
                    Some(n) if n > 0 => {
                        failure.remaining = Some(n - 1);
                        return Err(error);
                    }
                    Some(_) => {
                        failures.remove(&key);
                    }
                }
            }
        }

        let total_pages = *self.total_pages.read().await;
        let pages = self.pages.read().await;
        let mut page = pages
            .get(&request.endpoint)
            .and_then(|feed| feed.get(request.page.max(1) as usize - 1))
            .cloned()
            .unwrap_or_default();
        page.page = request.page;
        if total_pages.is_some() {
            page.total_pages = total_pages;
        }
        Ok(page)
    }

    fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}
