//! Error-report triage routes.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use manifold_core::model::report::{ErrorReport, TriageStatus};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ReportsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportsQuery>,
) -> Result<Json<Vec<ErrorReport>>, ApiError> {
    Ok(Json(state.store.list_reports(query.limit).await?))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ErrorReport>, ApiError> {
    state
        .store
        .get_report(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("report {id}")))
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: TriageStatus,
}

/// Advance a report along `new → investigating → resolved | ignored |
/// escalated`. Illegal transitions are a conflict.
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> Result<Json<ErrorReport>, ApiError> {
    let mut report = state
        .store
        .get_report(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("report {id}")))?;

    if !report.status.can_transition_to(body.status) {
        return Err(ApiError::Conflict(format!(
            "cannot move report from {:?} to {:?}",
            report.status, body.status
        )));
    }
    report.status = body.status;
    report.updated_at = Utc::now();
    state.store.update_report(&report).await?;
    Ok(Json(report))
}
