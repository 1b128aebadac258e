//! Run inspection routes.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use manifold_core::model::run::FlowRun;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlowRun>, ApiError> {
    state
        .store
        .get_run(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {id}")))
}

#[derive(Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<FlowRun>>, ApiError> {
    Ok(Json(state.store.list_runs(id, query.limit).await?))
}

/// Integration events recorded for a run, in order.
pub async fn run_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let events = state.store.events_for_run(id).await?;
    Ok(Json(json!({"runId": id, "events": events})))
}
