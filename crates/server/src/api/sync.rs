//! Sync trigger and status handlers.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use reelsync_core::{ActiveRun, SchedulerStatus, SyncMode, TriggerOutcome};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    /// Omitted: full when the catalog is stale, incremental otherwise.
    #[serde(default)]
    pub mode: Option<SyncMode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStartedResponse {
    pub run_id: String,
    pub mode: SyncMode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflictResponse {
    pub error: String,
    pub active_run: ActiveRun,
}

/// POST /api/v1/sync
///
/// Start a sync in the background. Answers 202 with the run id, or 409 when
/// a run is already active (the trigger is dropped, not queued).
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SyncRequest>,
) -> impl IntoResponse {
    let service = state.service();
    let outcome = match request.mode {
        Some(mode) => service.trigger_sync(mode),
        None => service.scheduler().trigger_planned(),
    };

    match outcome {
        TriggerOutcome::Started(handle) => {
            info!(run_id = %handle.run_id, mode = handle.mode.as_str(), "Manual sync triggered");
            (
                StatusCode::ACCEPTED,
                Json(SyncStartedResponse {
                    run_id: handle.run_id.clone(),
                    mode: handle.mode,
                }),
            )
                .into_response()
        }
        TriggerOutcome::AlreadyRunning(active_run) => (
            StatusCode::CONFLICT,
            Json(SyncConflictResponse {
                error: "Sync already in progress".to_string(),
                active_run,
            }),
        )
            .into_response(),
    }
}

/// GET /api/v1/sync
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(state.service().scheduler_status().await)
}
