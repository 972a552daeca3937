//! Search query and result types.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogItem;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercase, trim and collapse whitespace runs to one space. Applied to
/// both keywords and indexed text so they compare alike.
pub(crate) fn fold_text(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").to_lowercase()
}

/// Result ordering. Every order breaks ties by id ascending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Most recently modified upstream first.
    #[default]
    ModifiedDesc,
    ModifiedAsc,
    TitleAsc,
    YearDesc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::ModifiedDesc => "modified_desc",
            SortOrder::ModifiedAsc => "modified_asc",
            SortOrder::TitleAsc => "title_asc",
            SortOrder::YearDesc => "year_desc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "modified_desc" => Some(SortOrder::ModifiedDesc),
            "modified_asc" => Some(SortOrder::ModifiedAsc),
            "title_asc" => Some(SortOrder::TitleAsc),
            "year_desc" => Some(SortOrder::YearDesc),
            _ => None,
        }
    }
}

/// Exact-match filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Category slug.
    pub category: Option<String>,
    /// Country slug.
    pub country: Option<String>,
    pub year: Option<i32>,
    /// Content type.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// A search request against the query cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// Case-insensitive substring over title, original title and slug.
    pub keyword: Option<String>,
    pub filters: SearchFilters,
    pub sort: SortOrder,
    /// 1-based page number; 0 is treated as 1.
    pub page: usize,
    /// Page size; defaults and clamps come from the cache configuration.
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn category(mut self, slug: impl Into<String>) -> Self {
        self.filters.category = Some(slug.into());
        self
    }

    pub fn country(mut self, slug: impl Into<String>) -> Self {
        self.filters.country = Some(slug.into());
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.filters.year = Some(year);
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.filters.kind = Some(kind.into());
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resolve defaults so equivalent queries compare equal.
    pub fn normalize(&self, default_limit: usize, max_limit: usize) -> NormalizedQuery {
        let keyword = self
            .keyword
            .as_deref()
            .map(fold_text)
            .filter(|k| !k.is_empty());

        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        NormalizedQuery {
            keyword,
            filters: SearchFilters {
                category: clean(&self.filters.category),
                country: clean(&self.filters.country),
                year: self.filters.year,
                kind: clean(&self.filters.kind),
            },
            sort: self.sort,
            page: self.page.max(1),
            limit: self
                .limit
                .unwrap_or(default_limit)
                .clamp(1, max_limit.max(1)),
        }
    }
}

/// A query with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedQuery {
    pub keyword: Option<String>,
    pub filters: SearchFilters,
    pub sort: SortOrder,
    pub page: usize,
    pub limit: usize,
}

impl NormalizedQuery {
    /// Stable key for result memoization.
    pub fn cache_key(&self) -> String {
        format!(
            "k={}|c={}|n={}|y={}|t={}|s={}|p={}|l={}",
            self.keyword.as_deref().unwrap_or(""),
            self.filters.category.as_deref().unwrap_or(""),
            self.filters.country.as_deref().unwrap_or(""),
            self.filters.year.map(|y| y.to_string()).unwrap_or_default(),
            self.filters.kind.as_deref().unwrap_or(""),
            self.sort.as_str(),
            self.page,
            self.limit
        )
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub items: Vec<CatalogItem>,
    pub total_items: usize,
    pub total_pages: usize,
    pub page: usize,
    pub limit: usize,
    /// False until a snapshot (persisted or live) is available.
    pub ready: bool,
    /// True while serving a persisted snapshot that no sync has refreshed yet.
    pub stale: bool,
    /// Snapshot generation the results came from.
    pub generation: u64,
}

impl SearchPage {
    /// Empty page returned before any snapshot is available.
    pub fn not_ready(query: &NormalizedQuery) -> Self {
        Self {
            items: Vec::new(),
            total_items: 0,
            total_pages: 0,
            page: query.page,
            limit: query.limit,
            ready: false,
            stale: false,
            generation: 0,
        }
    }
}

/// Number of pages needed for `total` items.
pub fn page_count(total: usize, limit: usize) -> usize {
    if limit == 0 {
        0
    } else {
        total.div_ceil(limit)
    }
}
