//! Ingress routes: webhook intake and manual execution.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use manifold_core::model::flow::NodeKind;
use manifold_core::model::run::TriggeredBy;
use manifold_core::model::trigger::{TriggerEvent, TRIGGER_TOPIC};
use manifold_engine::RunSeed;

use crate::error::ApiError;
use crate::state::AppState;

/// Resolve a webhook slug: a flow id, or a flow whose metadata carries
/// `webhook_slug`.
async fn flow_for_slug(state: &AppState, slug: &str) -> Result<Uuid, ApiError> {
    if let Ok(id) = Uuid::parse_str(slug) {
        if state.store.get_flow(id).await?.is_some() {
            return Ok(id);
        }
    }
    let flows = state.store.list_enabled_flows().await?;
    flows
        .iter()
        .find(|f| {
            f.metadata
                .get("webhook_slug")
                .and_then(Value::as_str)
                .map(|s| s == slug)
                .unwrap_or(false)
        })
        .map(|f| f.id)
        .ok_or_else(|| ApiError::NotFound(format!("no flow registered for webhook '{slug}'")))
}

/// `POST /api/webhook/{slug}` — validate, enqueue, return immediately.
pub async fn ingest_webhook(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let flow_id = flow_for_slug(&state, &slug).await?;
    let flow = state
        .store
        .get_flow(flow_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("flow {flow_id}")))?;
    if !flow.enabled {
        return Err(ApiError::Conflict("flow is disabled".into()));
    }
    if !flow
        .nodes
        .iter()
        .any(|n| matches!(n.kind, NodeKind::WebhookTrigger | NodeKind::IngressTrigger))
    {
        return Err(ApiError::BadRequest(
            "flow has no webhook trigger".into(),
        ));
    }

    let event = TriggerEvent::new(flow_id, TriggeredBy::Webhook, body);
    let trace_id = event.trace_id.clone();
    state
        .queue
        .enqueue(
            TRIGGER_TOPIC,
            serde_json::to_value(&event).map_err(|e| ApiError::Internal(e.to_string()))?,
        )
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "accepted": true,
        "flowId": flow_id,
        "traceId": trace_id,
    })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub emulation_mode: bool,
}

/// `POST /api/flows/{id}/execute` — run synchronously and report the
/// terminal state.
pub async fn execute_flow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ExecuteBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let seed = RunSeed {
        flow_id: id,
        trigger_node: None,
        triggered_by: TriggeredBy::Manual,
        input: body.input.unwrap_or(Value::Null),
        trace_id: Uuid::new_v4().to_string(),
        emulation: body.emulation_mode,
    };
    let run = state.orchestrator.execute(seed).await?;
    Ok(Json(json!({
        "executionId": run.id,
        "status": run.status,
        "duration": run.duration_ms,
        "error": run.error,
        "errorNode": run.error_node,
    })))
}
