//! Retry with exponential backoff for transient page failures.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::upstream::{ItemPage, PageRequest, UpstreamClient, UpstreamError};

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Per-page retry settings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub page_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            page_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Retries shared by every page of one run.
#[derive(Debug)]
pub struct RetryBudget {
    remaining: AtomicU32,
}

impl RetryBudget {
    pub fn new(retries: u32) -> Self {
        Self {
            remaining: AtomicU32::new(retries),
        }
    }

    /// Take one retry from the budget. Returns false when exhausted.
    pub fn try_take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }
}

/// Fetch a page, retrying transient failures while both the per-page
/// retries and the run budget allow.
pub async fn fetch_with_retry(
    client: &dyn UpstreamClient,
    request: &PageRequest,
    policy: &RetryPolicy,
    budget: &RetryBudget,
) -> Result<ItemPage, UpstreamError> {
    let mut attempt = 0;
    loop {
        match client.fetch_page(request).await {
            Ok(page) => return Ok(page),
            Err(e) if e.is_retryable() && attempt < policy.page_retries && budget.try_take() => {
                let delay = policy.delay_for(attempt);
                debug!(
                    endpoint = %request.endpoint,
                    page = request.page,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying page after transient failure"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockUpstream};

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            page_retries: retries,
            backoff: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
        assert_eq!(p.delay_for(20), MAX_BACKOFF);
    }

    #[test]
    fn test_budget_exhausts() {
        let budget = RetryBudget::new(2);
        assert!(budget.try_take());
        assert!(budget.try_take());
        assert!(!budget.try_take());
        assert_eq!(budget.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers() {
        let upstream = MockUpstream::new();
        upstream
            .set_pages("/items", vec![vec![fixtures::catalog_item("a", 1)]])
            .await;
        upstream
            .fail_page_times("/items", 1, 2, fixtures::transient_error("/items", 1))
            .await;

        let budget = RetryBudget::new(10);
        let page = fetch_with_retry(&upstream, &PageRequest::new("/items", 1), &policy(3), &budget)
            .await
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(upstream.requested_pages("/items").await, vec![1, 1, 1]);
        assert_eq!(budget.remaining(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_page_retries() {
        let upstream = MockUpstream::new();
        upstream
            .fail_page("/items", 1, fixtures::transient_error("/items", 1))
            .await;

        let budget = RetryBudget::new(10);
        let result =
            fetch_with_retry(&upstream, &PageRequest::new("/items", 1), &policy(2), &budget).await;

        assert!(result.is_err());
        assert_eq!(upstream.requested_pages("/items").await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_budget_limits_retries() {
        let upstream = MockUpstream::new();
        upstream
            .fail_page("/items", 1, fixtures::transient_error("/items", 1))
            .await;

        let budget = RetryBudget::new(1);
        let result =
            fetch_with_retry(&upstream, &PageRequest::new("/items", 1), &policy(5), &budget).await;

        assert!(result.is_err());
        assert_eq!(upstream.requested_pages("/items").await.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_is_not_retried() {
        let upstream = MockUpstream::new();
        let request = PageRequest::new("/items", 1);
        upstream
            .fail_page("/items", 1, UpstreamError::malformed(&request, "bad body"))
            .await;

        let budget = RetryBudget::new(10);
        let result = fetch_with_retry(&upstream, &request, &policy(5), &budget).await;

        assert!(matches!(result, Err(UpstreamError::Malformed { .. })));
        assert_eq!(upstream.requested_pages("/items").await.len(), 1);
        assert_eq!(budget.remaining(), 10);
    }
}
