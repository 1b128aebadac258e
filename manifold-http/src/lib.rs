//! # manifold-http — the engine's HTTP surface
//!
//! Inbound routes per the external contract:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /api/webhook/{slug}` | Webhook intake → queue |
//! | `POST /api/flows/{id}/execute` | Synchronous manual trigger |
//! | `POST/GET /api/flows…` | Flow CRUD |
//! | `/api/flows/{id}/versions`, `…/approve`, `…/deploy`, `…/rollback` | Version lifecycle |
//! | `POST /api/flows/import`, `GET /api/flows/{id}/export` | DSL import/export (YAML/JSON) |
//! | `/api/runs`, `/api/reports` | Run inspection and triage |
//! | `/api/vault`, `/api/secrets`, `/api/adapters`, `/api/policies` | Credential administration |
//! | `GET /healthz` | Liveness |
//!
//! Every request passes the inbound-policy middleware first; handlers can
//! read the authenticated [`manifold_auth::Principal`] from extensions.

pub mod error;
pub mod policy;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Assemble the full router over the shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/webhook/{slug}", post(routes::ingress::ingest_webhook))
        .route("/api/flows", post(routes::flows::create_flow).get(routes::flows::list_flows))
        .route("/api/flows/import", post(routes::flows::import_flow))
        .route(
            "/api/flows/{id}",
            get(routes::flows::get_flow)
                .put(routes::flows::update_flow)
                .delete(routes::flows::delete_flow),
        )
        .route("/api/flows/{id}/execute", post(routes::ingress::execute_flow))
        .route(
            "/api/flows/{id}/versions",
            post(routes::flows::create_version).get(routes::flows::list_versions),
        )
        .route(
            "/api/flows/versions/{id}/approve",
            post(routes::flows::approve_version),
        )
        .route(
            "/api/flows/versions/{id}/deploy",
            post(routes::flows::deploy_version),
        )
        .route("/api/flows/{id}/rollback", post(routes::flows::rollback_flow))
        .route("/api/flows/{id}/export", get(routes::flows::export_flow))
        .route("/api/flows/{id}/runs", get(routes::runs::list_runs))
        .route("/api/runs/{id}", get(routes::runs::get_run))
        .route("/api/runs/{id}/events", get(routes::runs::run_events))
        .route("/api/reports", get(routes::reports::list_reports))
        .route("/api/reports/{id}", get(routes::reports::get_report))
        .route("/api/reports/{id}/status", post(routes::reports::update_status))
        .route("/api/vault/status", get(routes::vault::vault_status))
        .route("/api/vault/init", post(routes::vault::vault_init))
        .route("/api/vault/unlock", post(routes::vault::vault_unlock))
        .route("/api/vault/lock", post(routes::vault::vault_lock))
        .route("/api/vault/reset", post(routes::vault::vault_reset))
        .route(
            "/api/secrets",
            post(routes::vault::create_secret).get(routes::vault::list_secrets),
        )
        .route(
            "/api/secrets/{id}",
            put(routes::vault::rotate_secret).delete(routes::vault::delete_secret),
        )
        .route(
            "/api/adapters",
            post(routes::vault::put_adapter).get(routes::vault::list_adapters),
        )
        .route("/api/adapters/{id}", delete(routes::vault::delete_adapter))
        .route(
            "/api/policies",
            post(routes::vault::put_policy).get(routes::vault::list_policies),
        )
        .route("/api/policies/{id}", delete(routes::vault::delete_policy))
        .layer(middleware::from_fn_with_state(state.clone(), policy::enforce))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
