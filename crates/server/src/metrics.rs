//! Prometheus metrics for observability.
//!
//! HTTP request metrics live here; sync, cache and upstream collectors come
//! from `reelsync_core::metrics` and are registered into the same registry.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use regex_lite::Regex;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reelsync_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelsync_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelsync_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Catalog Metrics (collected dynamically)
// =============================================================================

/// Records in the catalog store.
pub static CATALOG_ITEMS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("reelsync_catalog_items", "Records in the catalog store").unwrap()
});

/// 1 while a sync run is active.
pub static SYNC_IN_PROGRESS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("reelsync_sync_in_progress", "Whether a sync run is active").unwrap()
});

/// 1 when the catalog is due for a refresh.
pub static CATALOG_NEEDS_UPDATE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelsync_catalog_needs_update",
        "Whether the served catalog may be stale",
    )
    .unwrap()
});

/// Seconds since the last successful sync (-1 if never synced).
pub static LAST_SYNC_AGE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelsync_last_sync_age_seconds",
        "Seconds since the last successful sync",
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Catalog
    registry.register(Box::new(CATALOG_ITEMS.clone())).unwrap();
    registry.register(Box::new(SYNC_IN_PROGRESS.clone())).unwrap();
    registry
        .register(Box::new(CATALOG_NEEDS_UPDATE.clone()))
        .unwrap();
    registry.register(Box::new(LAST_SYNC_AGE.clone())).unwrap();

    // Core metrics (upstream, sync, cache, persistence)
    for metric in reelsync_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges from current catalog state before encoding.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let stats = state.service().get_stats().await;
    CATALOG_ITEMS.set(stats.total_items as i64);
    SYNC_IN_PROGRESS.set(i64::from(stats.is_syncing));
    CATALOG_NEEDS_UPDATE.set(i64::from(stats.needs_update));
    LAST_SYNC_AGE.set(
        stats
            .last_synced_at
            .map(|at| (chrono::Utc::now() - at).num_seconds().max(0))
            .unwrap_or(-1),
    );
}

static ITEM_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/api/v1/catalog/(?:items|slug))/[^/]+$").unwrap());

/// Normalize a path for metric labels (replace record keys with placeholders).
pub fn normalize_path(path: &str) -> String {
    ITEM_PATH.replace(path, "$1/{key}").into_owned()
}
