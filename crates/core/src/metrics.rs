//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Upstream client (requests, latency, response cache, rate limiting)
//! - Synchronizer (runs, durations, page failures, item changes)
//! - Query cache and snapshot persistence

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Upstream Client
// =============================================================================

/// Upstream HTTP requests by endpoint and status code ("error" for transport failures).
pub static UPSTREAM_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelsync_upstream_requests_total",
            "Total upstream HTTP requests",
        ),
        &["endpoint", "status"],
    )
    .unwrap()
});

/// Upstream request latency in seconds.
pub static UPSTREAM_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reelsync_upstream_request_duration_seconds",
            "Duration of upstream HTTP requests",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]),
        &["endpoint"],
    )
    .unwrap()
});

/// Response cache lookups by result.
pub static RESPONSE_CACHE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelsync_response_cache_total",
            "Upstream response cache lookups",
        ),
        &["result"], // "hit", "miss"
    )
    .unwrap()
});

/// Requests that had to wait for the rate limit window.
pub static RATE_LIMIT_WAITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "reelsync_rate_limit_waits_total",
        "Total upstream requests delayed by the rate limiter",
    )
    .unwrap()
});

// =============================================================================
// Synchronizer
// =============================================================================

/// Sync runs by mode and result.
pub static SYNC_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelsync_sync_runs_total", "Total sync runs"),
        &["mode", "result"], // mode: "full", "incremental"; result: "success", "failed", "cancelled"
    )
    .unwrap()
});

/// Sync run duration in seconds.
pub static SYNC_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("reelsync_sync_duration_seconds", "Duration of sync runs").buckets(
            vec![1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0],
        ),
        &["mode"],
    )
    .unwrap()
});

/// Pages that could not be fetched, by mode and error kind.
pub static SYNC_PAGES_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelsync_sync_pages_failed_total",
            "Total pages skipped during sync",
        ),
        &["mode", "kind"],
    )
    .unwrap()
});

/// Records written by sync, by mode and change type.
pub static SYNC_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelsync_sync_items_total", "Total records written by sync"),
        &["mode", "change"], // "new", "updated", "removed"
    )
    .unwrap()
});

// =============================================================================
// Query Cache / Persistence
// =============================================================================

/// Search result cache lookups by result.
pub static QUERY_CACHE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelsync_query_cache_total", "Search result cache lookups"),
        &["result"], // "hit", "miss"
    )
    .unwrap()
});

/// Records in the live query snapshot.
pub static SNAPSHOT_ITEMS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelsync_snapshot_items",
        "Number of records in the current query snapshot",
    )
    .unwrap()
});

/// Snapshot persistence writes by tier and result.
pub static PERSISTENCE_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelsync_persistence_writes_total",
            "Total snapshot persistence writes",
        ),
        &["tier", "result"], // tier: "compact", "block"; result: "success", "failed"
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Upstream
        Box::new(UPSTREAM_REQUESTS.clone()),
        Box::new(UPSTREAM_REQUEST_DURATION.clone()),
        Box::new(RESPONSE_CACHE.clone()),
        Box::new(RATE_LIMIT_WAITS.clone()),
        // Sync
        Box::new(SYNC_RUNS.clone()),
        Box::new(SYNC_DURATION.clone()),
        Box::new(SYNC_PAGES_FAILED.clone()),
        Box::new(SYNC_ITEMS.clone()),
        // Cache
        Box::new(QUERY_CACHE.clone()),
        Box::new(SNAPSHOT_ITEMS.clone()),
        Box::new(PERSISTENCE_WRITES.clone()),
    ]
}
