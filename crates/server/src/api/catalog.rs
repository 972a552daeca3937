//! Catalog API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use reelsync_core::{CatalogItem, CatalogStats, SearchPage, SearchQuery, SortOrder, StoreError};
use serde::Deserialize;

use super::ErrorResponse;
use crate::state::AppState;

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchParams {
    fn into_query(self) -> Result<SearchQuery, String> {
        let sort = match self.sort.as_deref() {
            None | Some("") => SortOrder::default(),
            Some(s) => SortOrder::parse(s).ok_or_else(|| format!("Unknown sort order: {}", s))?,
        };

        let mut query = SearchQuery::new().sort(sort).page(self.page.unwrap_or(1));
        query.keyword = self.q;
        query.filters.category = self.category;
        query.filters.country = self.country;
        query.filters.year = self.year;
        query.filters.kind = self.kind;
        query.limit = self.limit;
        Ok(query)
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn store_error(key: &str, e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("Record not found: {}", key))),
        ),
        e => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        ),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/catalog/search
///
/// Keyword and filter search over the in-memory snapshot. Never waits on a
/// running sync.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchPage>, ApiError> {
    let query = params
        .into_query()
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e))))?;

    Ok(Json(state.service().search(&query).await))
}

/// GET /api/v1/catalog/items/{id}
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CatalogItem>, ApiError> {
    state
        .service()
        .get_by_id(&id)
        .map(Json)
        .map_err(|e| store_error(&id, e))
}

/// GET /api/v1/catalog/slug/{slug}
pub async fn get_by_slug(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<CatalogItem>, ApiError> {
    state
        .service()
        .get_by_slug(&slug)
        .map(Json)
        .map_err(|e| store_error(&slug, e))
}

/// GET /api/v1/catalog/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<CatalogStats> {
    Json(state.service().get_stats().await)
}
