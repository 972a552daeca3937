//! Rolling-window rate limiter for upstream requests.
//!
//! At most `limit` requests may start within any window of `period`
//! (60 seconds by default). Callers over budget are suspended until the
//! oldest request leaves the window; nothing is rejected or dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::info;

use crate::metrics;

/// Rate limit status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub requests_per_window: u32,
    pub window_secs: u64,
    /// Requests that may start right now without waiting.
    pub available: u32,
    pub next_available_in_ms: Option<u64>,
    /// Times a caller had to wait so far.
    pub waits: u64,
}

/// Log of request start times within the current window.
struct Window {
    limit: u32,
    period: Duration,
    started: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.started.front() {
            if now.duration_since(oldest) >= self.period {
                self.started.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns `Ok(())` if a request was recorded, or `Err(wait)` with the
    /// time until the next slot opens.
    fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.prune(now);
        if (self.started.len() as u32) < self.limit {
            self.started.push_back(now);
            return Ok(());
        }
        let oldest = self.started.front().copied().unwrap_or(now);
        Err((oldest + self.period).saturating_duration_since(now))
    }
}

/// Rolling-window limiter shared by all requests of one client.
///
/// Waiters are served in arrival order: the window is guarded by a fair
/// async mutex held across the wait.
pub struct RollingWindowLimiter {
    window: Mutex<Window>,
    waits: AtomicU64,
}

impl RollingWindowLimiter {
    /// Limit to `requests_per_minute` over a rolling 60-second window.
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(limit: u32, period: Duration) -> Self {
        Self {
            window: Mutex::new(Window {
                limit: limit.max(1),
                period,
                started: VecDeque::new(),
            }),
            waits: AtomicU64::new(0),
        }
    }

    /// Wait until a request may start, then record it.
    ///
    /// Returns how long the caller was suspended.
    pub async fn acquire(&self) -> Duration {
        let mut window = self.window.lock().await;
        let mut waited = Duration::ZERO;

        loop {
            match window.try_acquire(Instant::now()) {
                Ok(()) => return waited,
                Err(wait) => {
                    if waited.is_zero() {
                        self.waits.fetch_add(1, Ordering::Relaxed);
                        metrics::RATE_LIMIT_WAITS.inc();
                    }
                    info!(
                        wait_ms = wait.as_millis() as u64,
                        limit = window.limit,
                        "Upstream rate limit reached, waiting for window"
                    );
                    sleep(wait).await;
                    waited += wait;
                }
            }
        }
    }

    /// Get the current rate limit status.
    pub async fn status(&self) -> RateLimitStatus {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        window.prune(now);
        let used = window.started.len() as u32;
        let available = window.limit.saturating_sub(used);
        RateLimitStatus {
            requests_per_window: window.limit,
            window_secs: window.period.as_secs(),
            available,
            next_available_in_ms: if available > 0 {
                None
            } else {
                window
                    .started
                    .front()
                    .map(|&oldest| (oldest + window.period).saturating_duration_since(now))
                    .map(|d| d.as_millis() as u64)
            },
            waits: self.waits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn try_acquire(limiter: &RollingWindowLimiter) -> Result<(), Duration> {
        limiter.window.lock().await.try_acquire(Instant::now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_until_exhausted() {
        let limiter = RollingWindowLimiter::new(3);
        for _ in 0..3 {
            assert!(try_acquire(&limiter).await.is_ok());
        }

        let wait = try_acquire(&limiter).await.unwrap_err();
        assert_eq!(wait, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rolls() {
        let limiter = RollingWindowLimiter::new(2);
        try_acquire(&limiter).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        try_acquire(&limiter).await.unwrap();

        // First slot frees 60s after it was taken, i.e. 30s from now.
        let wait = try_acquire(&limiter).await.unwrap_err();
        assert_eq!(wait, Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(try_acquire(&limiter).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_instead_of_failing() {
        let limiter = RollingWindowLimiter::new(1);
        assert_eq!(limiter.acquire().await, Duration::ZERO);

        let start = Instant::now();
        let waited = limiter.acquire().await;
        assert_eq!(waited, Duration::from_secs(60));
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(limiter.status().await.waits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_served_in_arrival_order() {
        let limiter = Arc::new(RollingWindowLimiter::new(1));
        limiter.acquire().await;

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                order.lock().unwrap().push(i);
            }));
            // Let the task reach the lock before spawning the next one.
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status() {
        let limiter = RollingWindowLimiter::new(2);
        let status = limiter.status().await;
        assert_eq!(status.requests_per_window, 2);
        assert_eq!(status.window_secs, 60);
        assert_eq!(status.available, 2);
        assert!(status.next_available_in_ms.is_none());

        limiter.acquire().await;
        limiter.acquire().await;
        let status = limiter.status().await;
        assert_eq!(status.available, 0);
        assert_eq!(status.next_available_in_ms, Some(60_000));
    }
}
