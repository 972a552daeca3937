use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("reelsync.db")
}

/// Upstream provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Provider root URL (e.g., "https://api.example.com/v1")
    pub base_url: String,
    /// Feed used by full sync
    #[serde(default = "default_full_endpoint")]
    pub full_endpoint: String,
    /// Newest-first feed used by incremental sync
    #[serde(default = "default_incremental_endpoint")]
    pub incremental_endpoint: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Per-request timeout in seconds (default: 15)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_response_cache_ttl_secs")]
    pub response_cache_ttl_secs: u64,
    #[serde(default = "default_response_cache_capacity")]
    pub response_cache_capacity: usize,
    /// Query parameters added to every page request
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

impl UpstreamConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            full_endpoint: default_full_endpoint(),
            incremental_endpoint: default_incremental_endpoint(),
            requests_per_minute: default_requests_per_minute(),
            timeout_secs: default_timeout_secs(),
            response_cache_ttl_secs: default_response_cache_ttl_secs(),
            response_cache_capacity: default_response_cache_capacity(),
            extra_params: BTreeMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn response_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.response_cache_ttl_secs)
    }
}

fn default_full_endpoint() -> String {
    "/items".to_string()
}

fn default_incremental_endpoint() -> String {
    "/items/latest".to_string()
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_response_cache_ttl_secs() -> u64 {
    300
}

fn default_response_cache_capacity() -> usize {
    512
}

/// Synchronizer tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Pages fetched concurrently per full-sync batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Safety ceiling on pages per full sync
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Safety ceiling on items per full sync
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Minimum fraction of attempted pages that must succeed for a full sync to commit
    #[serde(default = "default_min_success_ratio")]
    pub min_success_ratio: f64,
    /// Retries per page for transient errors
    #[serde(default = "default_page_retries")]
    pub page_retries: u32,
    /// Retries shared by all pages of one run
    #[serde(default = "default_run_retry_budget")]
    pub run_retry_budget: u32,
    /// Base backoff between retries, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Soft deadline for a full sync run
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    /// Pages fetched ahead during incremental sync
    #[serde(default = "default_incremental_lookahead")]
    pub incremental_lookahead: usize,
    #[serde(default = "default_incremental_max_pages")]
    pub incremental_max_pages: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_pages: default_max_pages(),
            max_items: default_max_items(),
            min_success_ratio: default_min_success_ratio(),
            page_retries: default_page_retries(),
            run_retry_budget: default_run_retry_budget(),
            retry_backoff_ms: default_retry_backoff_ms(),
            run_deadline_secs: default_run_deadline_secs(),
            incremental_lookahead: default_incremental_lookahead(),
            incremental_max_pages: default_incremental_max_pages(),
        }
    }
}

impl SyncConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_max_pages() -> u32 {
    2000
}

fn default_max_items() -> usize {
    200_000
}

fn default_min_success_ratio() -> f64 {
    0.5
}

fn default_page_retries() -> u32 {
    2
}

fn default_run_retry_budget() -> u32 {
    50
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_run_deadline_secs() -> u64 {
    1800
}

fn default_incremental_lookahead() -> usize {
    1
}

fn default_incremental_max_pages() -> u32 {
    100
}

/// Background refresh configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval between scheduled ticks (default: 1h)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Age after which the catalog needs a full rebuild (default: 24h)
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_stale_after_secs() -> u64 {
    86_400
}

/// Hot-tier query cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Memoized search results kept per process
    #[serde(default = "default_result_cache_capacity")]
    pub result_cache_capacity: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    /// Persisted snapshots older than this are not served on warm start
    #[serde(default = "default_usable_snapshot_age_secs")]
    pub usable_snapshot_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            result_cache_capacity: default_result_cache_capacity(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            usable_snapshot_age_secs: default_usable_snapshot_age_secs(),
        }
    }
}

impl CacheConfig {
    pub fn usable_snapshot_age(&self) -> Duration {
        Duration::from_secs(self.usable_snapshot_age_secs)
    }
}

fn default_result_cache_capacity() -> usize {
    256
}

fn default_limit() -> usize {
    24
}

fn default_max_limit() -> usize {
    100
}

fn default_usable_snapshot_age_secs() -> u64 {
    7 * 86_400
}

/// Snapshot persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// Directory holding compact snapshot files and the block database
    #[serde(default = "default_persistence_dir")]
    pub dir: PathBuf,
    /// Blobs at or above this size go to the block store
    #[serde(default = "default_compact_threshold_bytes")]
    pub compact_threshold_bytes: usize,
    #[serde(default = "default_block_size_bytes")]
    pub block_size_bytes: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            dir: default_persistence_dir(),
            compact_threshold_bytes: default_compact_threshold_bytes(),
            block_size_bytes: default_block_size_bytes(),
        }
    }
}

fn default_persistence_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

fn default_compact_threshold_bytes() -> usize {
    1024 * 1024
}

fn default_block_size_bytes() -> usize {
    256 * 1024
}

/// Sanitized config for API responses (upstream query params redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub upstream: SanitizedUpstreamConfig,
    pub sync: SyncConfig,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub persistence: PersistenceConfig,
}

/// Upstream config without parameter values, which may carry API keys
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedUpstreamConfig {
    pub base_url: String,
    pub full_endpoint: String,
    pub incremental_endpoint: String,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
    pub response_cache_ttl_secs: u64,
    pub extra_param_names: Vec<String>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            upstream: SanitizedUpstreamConfig {
                base_url: config.upstream.base_url.clone(),
                full_endpoint: config.upstream.full_endpoint.clone(),
                incremental_endpoint: config.upstream.incremental_endpoint.clone(),
                requests_per_minute: config.upstream.requests_per_minute,
                timeout_secs: config.upstream.timeout_secs,
                response_cache_ttl_secs: config.upstream.response_cache_ttl_secs,
                extra_param_names: config.upstream.extra_params.keys().cloned().collect(),
            },
            sync: config.sync.clone(),
            scheduler: config.scheduler.clone(),
            cache: config.cache.clone(),
            persistence: config.persistence.clone(),
        }
    }
}
