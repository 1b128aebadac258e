//! Flow CRUD, version lifecycle, and DSL import/export.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use manifold_core::model::flow::Flow;
use manifold_core::model::version::{bump_version, ChangeType, Environment, FlowVersion, VersionStatus};

use crate::error::ApiError;
use crate::state::AppState;

/// Re-register scheduler jobs and poller loops after a flow change.
fn reregister(state: &AppState, flow: &Flow) {
    state.scheduler.register_flow(flow);
    state.pollers.register_flow(flow);
}

pub async fn create_flow(
    State(state): State<AppState>,
    Json(mut flow): Json<Flow>,
) -> Result<impl IntoResponse, ApiError> {
    flow.validate()?;
    flow.created_at = Utc::now();
    flow.updated_at = flow.created_at;
    state.store.create_flow(&flow).await?;
    reregister(&state, &flow);
    Ok((axum::http::StatusCode::CREATED, Json(flow)))
}

pub async fn list_flows(State(state): State<AppState>) -> Result<Json<Vec<Flow>>, ApiError> {
    Ok(Json(state.store.list_flows().await?))
}

pub async fn get_flow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Flow>, ApiError> {
    state
        .store
        .get_flow(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("flow {id}")))
}

pub async fn update_flow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut flow): Json<Flow>,
) -> Result<Json<Flow>, ApiError> {
    flow.id = id;
    flow.validate()?;
    flow.updated_at = Utc::now();
    state.store.update_flow(&flow).await?;
    reregister(&state, &flow);
    Ok(Json(flow))
}

pub async fn delete_flow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.delete_flow(id).await? {
        return Err(ApiError::NotFound(format!("flow {id}")));
    }
    state.scheduler.unregister_flow(id);
    state.pollers.unregister_flow(id);
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ── Version lifecycle ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateVersionBody {
    #[serde(alias = "changeType")]
    pub change_type: ChangeType,
    #[serde(alias = "changeDescription")]
    pub change_description: String,
    #[serde(default = "default_environment")]
    pub environment: Environment,
}

fn default_environment() -> Environment {
    Environment::Dev
}

pub async fn create_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateVersionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let flow = state
        .store
        .get_flow(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("flow {id}")))?;

    let version = FlowVersion {
        id: Uuid::new_v4(),
        flow_id: flow.id,
        version: bump_version(&flow.version, body.change_type),
        change_type: body.change_type,
        change_description: body.change_description,
        status: VersionStatus::Draft,
        environment: body.environment,
        snapshot: serde_json::to_value(&flow)
            .map_err(|e| ApiError::Internal(e.to_string()))?,
        created_at: Utc::now(),
        approved_at: None,
        deployed_at: None,
    };
    state.store.create_version(&version).await?;
    Ok((axum::http::StatusCode::CREATED, Json(version)))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<FlowVersion>>, ApiError> {
    Ok(Json(state.store.list_versions(id).await?))
}

pub async fn approve_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlowVersion>, ApiError> {
    let mut version = state
        .store
        .get_version(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("version {id}")))?;
    if version.status != VersionStatus::Draft {
        return Err(ApiError::Conflict(format!(
            "version is {:?}, only drafts can be approved",
            version.status
        )));
    }
    version.status = VersionStatus::Approved;
    version.approved_at = Some(Utc::now());
    state.store.update_version(&version).await?;
    Ok(Json(version))
}

/// Deploy a version: its snapshot becomes the live flow definition and
/// scheduler/poller registrations are refreshed.
pub async fn deploy_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlowVersion>, ApiError> {
    let mut version = state
        .store
        .get_version(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("version {id}")))?;
    if version.status != VersionStatus::Approved {
        return Err(ApiError::Conflict(
            "only approved versions can be deployed".into(),
        ));
    }

    let mut flow: Flow = serde_json::from_value(version.snapshot.clone())
        .map_err(|e| ApiError::Internal(format!("corrupt snapshot: {e}")))?;
    flow.version = version.version.clone();
    flow.updated_at = Utc::now();
    state.store.update_flow(&flow).await?;
    reregister(&state, &flow);

    version.status = VersionStatus::Deployed;
    version.deployed_at = Some(Utc::now());
    state.store.update_version(&version).await?;
    Ok(Json(version))
}

/// Roll back to the previously deployed version of this flow.
pub async fn rollback_flow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlowVersion>, ApiError> {
    let versions = state.store.list_versions(id).await?;
    let mut deployed = versions
        .into_iter()
        .filter(|v| v.status == VersionStatus::Deployed)
        .collect::<Vec<_>>();
    // Newest first: [0] is live, [1] is the rollback target.
    if deployed.len() < 2 {
        return Err(ApiError::Conflict(
            "no previously deployed version to roll back to".into(),
        ));
    }
    let mut current = deployed.remove(0);
    let mut target = deployed.remove(0);

    let mut flow: Flow = serde_json::from_value(target.snapshot.clone())
        .map_err(|e| ApiError::Internal(format!("corrupt snapshot: {e}")))?;
    flow.version = target.version.clone();
    flow.updated_at = Utc::now();
    state.store.update_flow(&flow).await?;
    reregister(&state, &flow);

    current.status = VersionStatus::RolledBack;
    state.store.update_version(&current).await?;
    target.deployed_at = Some(Utc::now());
    state.store.update_version(&target).await?;
    Ok(Json(target))
}

// ── DSL import/export ─────────────────────────────────────────────────────

/// Import a flow definition as YAML or JSON. Missing ids are generated.
pub async fn import_flow(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let is_yaml = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("yaml"))
        .unwrap_or(false);

    let mut raw: Value = if is_yaml {
        serde_yaml::from_str(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid YAML: {e}")))?
    } else {
        serde_json::from_str(&body)
            .or_else(|_| serde_yaml::from_str(&body))
            .map_err(|e| ApiError::BadRequest(format!("invalid flow document: {e}")))?
    };

    // Fill generated/maintenance fields the DSL omits.
    if let Some(object) = raw.as_object_mut() {
        object
            .entry("id")
            .or_insert_with(|| json!(Uuid::new_v4()));
        object
            .entry("organization_id")
            .or_insert_with(|| json!(Uuid::new_v4()));
        object.entry("version").or_insert(json!("1.0.0"));
        object.entry("enabled").or_insert(json!(true));
        let now = json!(Utc::now());
        object.entry("created_at").or_insert_with(|| now.clone());
        object.entry("updated_at").or_insert(now);
    }

    let flow: Flow = serde_json::from_value(raw)
        .map_err(|e| ApiError::BadRequest(format!("invalid flow document: {e}")))?;
    flow.validate()?;
    state.store.create_flow(&flow).await?;
    reregister(&state, &flow);
    Ok((axum::http::StatusCode::CREATED, Json(flow)))
}

#[derive(Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

pub async fn export_flow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let flow = state
        .store
        .get_flow(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("flow {id}")))?;

    match query.format.as_deref().unwrap_or("json") {
        "yaml" => {
            let yaml = serde_yaml::to_string(&flow)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            Ok((
                [(header::CONTENT_TYPE, "application/yaml")],
                yaml,
            )
                .into_response())
        }
        "json" => Ok(Json(flow).into_response()),
        other => Err(ApiError::BadRequest(format!("unknown format '{other}'"))),
    }
}
