//! Vault administration, secrets, and auth adapter/policy management.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use manifold_core::model::adapter::{AuthAdapter, InboundAuthPolicy};
use manifold_core::model::secret::IntegrationType;
use manifold_vault::VaultStatus;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SeedBody {
    pub seed: String,
}

pub async fn vault_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let status = state.vault.status().await?;
    Ok(Json(json!({
        "status": match status {
            VaultStatus::Uninitialized => "uninitialized",
            VaultStatus::Locked => "locked",
            VaultStatus::Unlocked => "unlocked",
        },
    })))
}

pub async fn vault_init(
    State(state): State<AppState>,
    Json(body): Json<SeedBody>,
) -> Result<Json<Value>, ApiError> {
    let recovery_code = state.vault.initialize(&body.seed).await?;
    Ok(Json(json!({
        "initialized": true,
        // Shown exactly once; the operator stores it out of band.
        "recoveryCode": recovery_code,
    })))
}

pub async fn vault_unlock(
    State(state): State<AppState>,
    Json(body): Json<SeedBody>,
) -> Result<Json<Value>, ApiError> {
    state.vault.unlock(&body.seed).await?;
    Ok(Json(json!({"unlocked": true})))
}

pub async fn vault_lock(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.vault.lock().await;
    Ok(Json(json!({"locked": true})))
}

/// Destructive: erases every stored secret.
pub async fn vault_reset(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.vault.reset().await?;
    Ok(Json(json!({"reset": true})))
}

// ── Secrets ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SecretBody {
    pub integration_type: IntegrationType,
    pub label: String,
    pub payload: Value,
    #[serde(default)]
    pub metadata: Value,
}

pub async fn create_secret(
    State(state): State<AppState>,
    Json(body): Json<SecretBody>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .vault
        .write_secret(
            None,
            body.integration_type,
            &body.label,
            &body.payload,
            body.metadata,
        )
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(record)))
}

pub async fn rotate_secret(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SecretBody>,
) -> Result<Json<manifold_core::model::secret::SecretRecord>, ApiError> {
    let record = state
        .vault
        .write_secret(
            Some(id),
            body.integration_type,
            &body.label,
            &body.payload,
            body.metadata,
        )
        .await?;
    Ok(Json(record))
}

/// Listing returns metadata only — never decrypted payloads.
pub async fn list_secrets(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let secrets = state.vault.list_secrets().await?;
    let listing: Vec<Value> = secrets
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "integrationType": s.integration_type,
                "label": s.label,
                "metadata": s.metadata,
                "enabled": s.enabled,
                "lastRotatedAt": s.last_rotated_at,
            })
        })
        .collect();
    Ok(Json(json!(listing)))
}

pub async fn delete_secret(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.vault.delete_secret(id).await? {
        return Err(ApiError::NotFound(format!("secret {id}")));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ── Adapters & inbound policies ───────────────────────────────────────────

pub async fn put_adapter(
    State(state): State<AppState>,
    Json(adapter): Json<AuthAdapter>,
) -> Result<Json<AuthAdapter>, ApiError> {
    state.store.put_adapter(&adapter).await?;
    Ok(Json(adapter))
}

pub async fn list_adapters(
    State(state): State<AppState>,
) -> Result<Json<Vec<AuthAdapter>>, ApiError> {
    Ok(Json(state.store.list_adapters().await?))
}

pub async fn delete_adapter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.delete_adapter(id).await? {
        return Err(ApiError::NotFound(format!("adapter {id}")));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn put_policy(
    State(state): State<AppState>,
    Json(policy): Json<InboundAuthPolicy>,
) -> Result<Json<InboundAuthPolicy>, ApiError> {
    state.store.put_policy(&policy).await?;
    Ok(Json(policy))
}

pub async fn list_policies(
    State(state): State<AppState>,
) -> Result<Json<Vec<InboundAuthPolicy>>, ApiError> {
    Ok(Json(state.store.list_policies().await?))
}

pub async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.delete_policy(id).await? {
        return Err(ApiError::NotFound(format!("policy {id}")));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}
