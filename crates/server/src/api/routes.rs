use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{catalog, handlers, middleware::metrics_middleware, sync};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Catalog reads
        .route("/catalog/search", get(catalog::search))
        .route("/catalog/stats", get(catalog::get_stats))
        .route("/catalog/items/{id}", get(catalog::get_item))
        .route("/catalog/slug/{slug}", get(catalog::get_by_slug))
        // Sync
        .route("/sync", post(sync::trigger_sync))
        .route("/sync", get(sync::get_status));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
