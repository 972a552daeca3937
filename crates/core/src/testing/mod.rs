//! Testing utilities and mock implementations.
//!
//! This module provides a scripted upstream feed and record fixtures,
//! allowing sync and cache scenarios to be tested without a real provider.
//!
//! # Example
//!
//! ```rust,ignore
//! use reelsync_core::testing::{fixtures, MockUpstream};
//!
//! let upstream = MockUpstream::new();
//! upstream.set_pages("/items", vec![
//!     vec![fixtures::catalog_item("dune", 1), fixtures::catalog_item("alien", 2)],
//!     vec![fixtures::catalog_item("heat", 3)],
//! ]).await;
//! upstream.fail_page("/items", 2, fixtures::transient_error("/items", 2)).await;
//!
//! // Use as Arc<dyn UpstreamClient> in a Synchronizer...
//! ```

mod mock_upstream;

pub use mock_upstream::MockUpstream;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::catalog::{CatalogItem, Tag};
    use crate::upstream::{ItemPage, PageRequest, UpstreamError};

    /// Fixed reference time: 2024-01-01T00:00:00Z plus `n` minutes.
    pub fn minutes(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(n)
    }

    /// Create a test record with reasonable defaults.
    ///
    /// The id is `id-<slug>` and the modification time is `minutes(modified_minutes)`.
    pub fn catalog_item(slug: &str, modified_minutes: i64) -> CatalogItem {
        CatalogItem {
            id: format!("id-{}", slug),
            slug: slug.to_string(),
            title: title_from_slug(slug),
            original_title: format!("{} (original)", title_from_slug(slug)),
            year: Some(2020),
            kind: Some("series".to_string()),
            categories: vec![Tag::new("Drama", "drama")],
            countries: vec![Tag::new("Japan", "japan")],
            upstream_modified_at: minutes(modified_minutes),
            last_synced_at: None,
        }
    }

    /// Create a test record with explicit filterable fields.
    pub fn tagged_item(
        slug: &str,
        modified_minutes: i64,
        category: &str,
        country: &str,
        year: i32,
        kind: &str,
    ) -> CatalogItem {
        let mut item = catalog_item(slug, modified_minutes);
        item.categories = vec![Tag::new(title_from_slug(category), category)];
        item.countries = vec![Tag::new(title_from_slug(country), country)];
        item.year = Some(year);
        item.kind = Some(kind.to_string());
        item
    }

    /// Build a page holding `items`.
    pub fn item_page(page: u32, items: Vec<CatalogItem>) -> ItemPage {
        ItemPage {
            page,
            items,
            ..ItemPage::default()
        }
    }

    /// A retryable failure for the given page.
    pub fn transient_error(endpoint: &str, page: u32) -> UpstreamError {
        UpstreamError::transient(&PageRequest::new(endpoint, page), "connection reset")
    }

    /// Raw provider JSON for a record, as the HTTP feed would send it.
    pub fn raw_item(item: &CatalogItem) -> serde_json::Value {
        serde_json::json!({
            "id": item.id,
            "slug": item.slug,
            "title": item.title,
            "originalTitle": item.original_title,
            "year": item.year,
            "type": item.kind,
            "categories": item.categories,
            "countries": item.countries,
            "modifiedAt": item.upstream_modified_at.to_rfc3339(),
        })
    }

    fn title_from_slug(slug: &str) -> String {
        slug.split('-')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
