//! Upstream provider access.
//!
//! This module provides an `UpstreamClient` trait for fetching pages of the
//! provider's item feed, plus the HTTP implementation with its rolling-window
//! rate limiter and short-TTL response cache.

mod decode;
mod http;
mod rate_limiter;
mod response_cache;
mod types;

pub use decode::{decode_item, decode_page, slugify, DecodedItem};
pub use http::HttpUpstreamClient;
pub use rate_limiter::{RateLimitStatus, RollingWindowLimiter};
pub use response_cache::{ResponseCache, ResponseCacheStats};
pub use types::*;
