use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Upstream base URL is an http(s) URL and the rate limit is positive
/// - Sync batch size, success ratio and lookahead are in range
/// - Persistence block size and cache limits are usable
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Upstream validation
    let base_url = config.upstream.base_url.trim();
    if base_url.is_empty() {
        return Err(ConfigError::ValidationError(
            "upstream.base_url cannot be empty".to_string(),
        ));
    }
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::ValidationError(format!(
            "upstream.base_url must start with http:// or https:// (got {})",
            base_url
        )));
    }
    if config.upstream.requests_per_minute == 0 {
        return Err(ConfigError::ValidationError(
            "upstream.requests_per_minute must be greater than 0".to_string(),
        ));
    }

    // Sync validation
    if !(1..=100).contains(&config.sync.batch_size) {
        return Err(ConfigError::ValidationError(format!(
            "sync.batch_size must be between 1 and 100 (got {})",
            config.sync.batch_size
        )));
    }
    let ratio = config.sync.min_success_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(ConfigError::ValidationError(format!(
            "sync.min_success_ratio must be in (0, 1] (got {})",
            ratio
        )));
    }
    if config.sync.incremental_lookahead == 0 {
        return Err(ConfigError::ValidationError(
            "sync.incremental_lookahead must be at least 1".to_string(),
        ));
    }

    // Persistence / cache validation
    if config.persistence.block_size_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "persistence.block_size_bytes must be greater than 0".to_string(),
        ));
    }
    if config.cache.default_limit > config.cache.max_limit {
        return Err(ConfigError::ValidationError(format!(
            "cache.default_limit ({}) cannot exceed cache.max_limit ({})",
            config.cache.default_limit, config.cache.max_limit
        )));
    }

    Ok(())
}
